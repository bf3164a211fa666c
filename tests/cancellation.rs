// tests/cancellation.rs

//! Cancellation and the single-active-session rule

mod common;

use common::*;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use updraft::{Artifact, CallbackProgress, Error, InstallPhase, InstallRequest, ProgressEvent};

const STARTED_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_cancel_while_mounting() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    let destination = temp.path().join("Foo.app");
    make_bundle(&volume.join("Foo.app"), "v2");
    make_bundle(&destination, "v1");

    let (disk, started) = FakeDiskImage::new(&volume).blocking_first_attach();
    let disk = Arc::new(disk);
    let installer = Arc::new(
        fake_installer(test_config(&temp.path().join("scratch"))).with_disk_image_tool(disk.clone()),
    );

    let request = InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
        .with_destination(&destination);
    let handle = installer.spawn(request).unwrap();
    started.recv_timeout(STARTED_TIMEOUT).unwrap();

    assert_eq!(handle.phase(), InstallPhase::Mounting);
    assert!(handle.cancel());

    let events_rx = handle.events().clone();
    assert!(matches!(handle.wait(), Err(Error::Cancelled)));
    let events: Vec<ProgressEvent> = events_rx.try_iter().collect();
    assert_eq!(
        phases_of(&events),
        vec![InstallPhase::Preparing, InstallPhase::Mounting, InstallPhase::Error]
    );
    assert_eq!(read_marker(&destination), "v1");
    assert_eq!(disk.detach_count(), 0);
    assert_eq!(installer.current_phase(), None);
}

#[test]
fn test_cancel_while_extracting_removes_partial_output() {
    let temp = TempDir::new().unwrap();
    let scratch = temp.path().join("scratch");
    let destination = temp.path().join("Foo.app");
    make_bundle(&destination, "v1");

    let (archive, started) = FakeArchive::new("Foo.app", "v2").blocking();
    let installer =
        Arc::new(fake_installer(test_config(&scratch)).with_archive_tool(Arc::new(archive)));

    let request = InstallRequest::new(Artifact::new(temp.path().join("Foo.zip")))
        .with_destination(&destination);
    let handle = installer.spawn(request).unwrap();
    started.recv_timeout(STARTED_TIMEOUT).unwrap();

    // The partial extraction is on disk while the tool runs
    assert_eq!(entries(&scratch).len(), 1);
    assert!(installer.cancel());

    assert!(matches!(handle.wait(), Err(Error::Cancelled)));
    assert!(entries(&scratch).is_empty());
    assert_eq!(read_marker(&destination), "v1");
}

#[test]
fn test_cancel_ignored_once_copying() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    let destination = temp.path().join("Foo.app");
    make_bundle(&volume.join("Foo.app"), "v2");
    make_bundle(&destination, "v1");

    let installer = Arc::new(
        fake_installer(test_config(&temp.path().join("scratch")))
            .with_disk_image_tool(Arc::new(FakeDiskImage::new(&volume))),
    );

    let accepted = Arc::new(AtomicBool::new(true));
    let sink = {
        let installer = Arc::clone(&installer);
        let accepted = Arc::clone(&accepted);
        CallbackProgress::new(move |event| {
            if let ProgressEvent::Phase {
                phase: InstallPhase::Copying,
                ..
            } = event
            {
                accepted.store(installer.cancel(), Ordering::SeqCst);
            }
        })
    };

    let request = InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
        .with_destination(&destination);
    let report = installer.install(&request, &sink).unwrap();

    assert!(!accepted.load(Ordering::SeqCst));
    assert_eq!(report.installed_path, destination);
    assert_eq!(read_marker(&destination), "v2");
}

#[test]
fn test_cancel_without_running_session() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    make_bundle(&volume.join("Foo.app"), "v2");

    let installer = fake_installer(test_config(&temp.path().join("scratch")))
        .with_disk_image_tool(Arc::new(FakeDiskImage::new(&volume)));
    assert!(!installer.cancel());

    let request = InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
        .with_destination(temp.path().join("Foo.app"));
    installer.install(&request, &updraft::SilentProgress).unwrap();

    assert!(!installer.cancel());
    assert_eq!(installer.current_phase(), None);
}

#[test]
fn test_new_session_supersedes_running_one() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    let destination = temp.path().join("Foo.app");
    make_bundle(&volume.join("Foo.app"), "v2");
    make_bundle(&destination, "v1");

    let (disk, started) = FakeDiskImage::new(&volume).blocking_first_attach();
    let disk = Arc::new(disk);
    let installer = Arc::new(
        fake_installer(test_config(&temp.path().join("scratch"))).with_disk_image_tool(disk.clone()),
    );
    let request = InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
        .with_destination(&destination);

    let first = installer.spawn(request.clone()).unwrap();
    started.recv_timeout(STARTED_TIMEOUT).unwrap();

    let second = installer.spawn(request).unwrap();
    assert_ne!(first.session_id(), second.session_id());

    let first_events = first.events().clone();
    assert!(matches!(first.wait(), Err(Error::Cancelled)));
    let report = second.wait().unwrap();

    assert_eq!(
        phases_of(&first_events.try_iter().collect::<Vec<_>>()),
        vec![InstallPhase::Preparing, InstallPhase::Mounting, InstallPhase::Error]
    );
    assert_eq!(read_marker(&report.installed_path), "v2");
    assert_eq!(disk.attach_count(), 2);
    assert_eq!(disk.detach_count(), 1);
}

#[test]
fn test_background_install_reports_events() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    let destination = temp.path().join("Foo.app");
    make_bundle(&volume.join("Foo.app"), "v2");
    fs::write(volume.join(".DS_Store"), "").unwrap();

    let installer = Arc::new(
        fake_installer(test_config(&temp.path().join("scratch")))
            .with_disk_image_tool(Arc::new(FakeDiskImage::new(&volume))),
    );
    let handle = installer
        .spawn(
            InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
                .with_destination(&destination),
        )
        .unwrap();
    let session_id = handle.session_id();

    let events_rx = handle.events().clone();
    let report = handle.wait().unwrap();
    let events: Vec<ProgressEvent> = events_rx.try_iter().collect();

    assert_eq!(report.session_id, session_id);
    assert_eq!(phases_of(&events).last(), Some(&InstallPhase::Complete));
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::Phase { phase: InstallPhase::Preparing, message }) if message.contains("Foo.dmg")
    ));
}

#[test]
fn test_first_event_arrives_before_wait() {
    let temp = TempDir::new().unwrap();
    let volume = temp.path().join("volume");
    make_bundle(&volume.join("Foo.app"), "v2");

    let installer = Arc::new(
        fake_installer(test_config(&temp.path().join("scratch")))
            .with_disk_image_tool(Arc::new(FakeDiskImage::new(&volume))),
    );
    let handle = installer
        .spawn(
            InstallRequest::new(Artifact::new(temp.path().join("Foo.dmg")))
                .with_destination(temp.path().join("Foo.app")),
        )
        .unwrap();

    // Blocking receive: the first event always arrives
    let first = handle.events().recv_timeout(STARTED_TIMEOUT).unwrap();
    assert!(matches!(
        first,
        ProgressEvent::Phase {
            phase: InstallPhase::Preparing,
            ..
        }
    ));
    handle.wait().unwrap();
}
