// tests/common/mod.rs

//! Shared test utilities: bundle fixtures and fake platform capabilities.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use updraft::archive::ArchiveTool;
use updraft::diskimage::{DiskImageTool, UnmountError};
use updraft::privilege::{ElevationError, Elevator, WriteAccess};
use updraft::process::{CancelToken, ProcessError};
use updraft::quarantine::NoQuarantine;
use updraft::{
    ArchiveFormat, BundleInstaller, CallbackProgress, Error, InstallPhase, InstallerConfig,
    ProgressEvent,
};

/// Upper bound for fakes that block until cancelled
const BLOCK_LIMIT: Duration = Duration::from_secs(10);

/// Create a structurally valid bundle whose metadata file contains `marker`
pub fn make_bundle(path: &Path, marker: &str) {
    fs::create_dir_all(path.join("Contents/MacOS")).unwrap();
    fs::write(path.join("Contents/Info.plist"), marker).unwrap();
    fs::write(path.join("Contents/MacOS/app"), format!("#!/bin/sh\n# {}\n", marker)).unwrap();
}

/// Marker of an installed bundle
pub fn read_marker(bundle: &Path) -> String {
    fs::read_to_string(bundle.join("Contents/Info.plist")).unwrap()
}

/// Sorted entry names of a directory, hidden ones included
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(read) => read
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Wait on `cancel` for at most `BLOCK_LIMIT`
fn block_until_cancelled(cancel: &CancelToken) -> bool {
    let start = Instant::now();
    while start.elapsed() < BLOCK_LIMIT {
        if cancel.is_cancelled() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Disk-image tool that "mounts" a prepared directory
#[derive(Debug)]
pub struct FakeDiskImage {
    volume: PathBuf,
    block_first_attach: AtomicBool,
    fail_detach: bool,
    started: Mutex<Option<flume::Sender<()>>>,
    pub attaches: AtomicUsize,
    pub detached: Mutex<Vec<PathBuf>>,
}

impl FakeDiskImage {
    pub fn new(volume: &Path) -> Self {
        Self {
            volume: volume.to_path_buf(),
            block_first_attach: AtomicBool::new(false),
            fail_detach: false,
            started: Mutex::new(None),
            attaches: AtomicUsize::new(0),
            detached: Mutex::new(Vec::new()),
        }
    }

    /// Make the first attach hang until its session is cancelled; the
    /// returned receiver fires when it starts hanging
    pub fn blocking_first_attach(self) -> (Self, flume::Receiver<()>) {
        let (sender, receiver) = flume::unbounded();
        self.block_first_attach.store(true, Ordering::SeqCst);
        *self.started.lock() = Some(sender);
        (self, receiver)
    }

    pub fn failing_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detached.lock().len()
    }
}

impl DiskImageTool for FakeDiskImage {
    fn attach(&self, _image: &Path, cancel: &CancelToken) -> updraft::Result<PathBuf> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        if self.block_first_attach.swap(false, Ordering::SeqCst) {
            if let Some(sender) = self.started.lock().as_ref() {
                let _ = sender.send(());
            }
            return if block_until_cancelled(cancel) {
                Err(Error::Cancelled)
            } else {
                Err(Error::MountFailed("fake attach never cancelled".to_string()))
            };
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.volume.clone())
    }

    fn detach(&self, mount_point: &Path) -> Result<(), UnmountError> {
        self.detached.lock().push(mount_point.to_path_buf());
        if self.fail_detach {
            return Err(UnmountError {
                mount_point: mount_point.to_path_buf(),
                reason: "hdiutil: couldn't eject - Resource busy".to_string(),
            });
        }
        Ok(())
    }
}

/// Archive tool that writes a bundle at a fixed relative path
#[derive(Debug)]
pub struct FakeArchive {
    bundle_at: String,
    marker: String,
    block: bool,
    started: Option<flume::Sender<()>>,
}

impl FakeArchive {
    pub fn new(bundle_at: &str, marker: &str) -> Self {
        Self {
            bundle_at: bundle_at.to_string(),
            marker: marker.to_string(),
            block: false,
            started: None,
        }
    }

    /// Extraction writes a partial tree, then hangs until cancelled
    pub fn blocking(mut self) -> (Self, flume::Receiver<()>) {
        let (sender, receiver) = flume::unbounded();
        self.block = true;
        self.started = Some(sender);
        (self, receiver)
    }
}

impl ArchiveTool for FakeArchive {
    fn extract(
        &self,
        _archive: &Path,
        _format: ArchiveFormat,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<(), ProcessError> {
        if self.block {
            fs::write(dest.join("partial.bin"), "half").unwrap();
            if let Some(sender) = &self.started {
                let _ = sender.send(());
            }
            if block_until_cancelled(cancel) {
                return Err(ProcessError::Cancelled {
                    tool: "fake-archive".to_string(),
                });
            }
        }
        make_bundle(&dest.join(&self.bundle_at), &self.marker);
        Ok(())
    }
}

/// How a fake elevation prompt behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// The user dismisses the dialog
    Dismiss,
    /// Granted: the script runs unprivileged through /bin/sh
    Grant,
    /// Granted, but the script is silently skipped
    GrantWithoutCopy,
}

#[derive(Debug)]
pub struct FakeElevator {
    prompt: Prompt,
    pub prompts: AtomicUsize,
}

impl FakeElevator {
    pub fn new(prompt: Prompt) -> Self {
        Self {
            prompt,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl Elevator for FakeElevator {
    fn run_script(&self, script: &str) -> Result<(), ElevationError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        match self.prompt {
            Prompt::Dismiss => Err(ElevationError::Denied),
            Prompt::GrantWithoutCopy => Ok(()),
            Prompt::Grant => {
                let status = std::process::Command::new("/bin/sh")
                    .arg("-c")
                    .arg(script)
                    .status()
                    .map_err(|e| ElevationError::Failed(e.to_string()))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(ElevationError::Failed(status.to_string()))
                }
            }
        }
    }
}

/// Write-access probe with a fixed answer
#[derive(Debug)]
pub struct FixedAccess(pub bool);

impl WriteAccess for FixedAccess {
    fn can_write(&self, _dir: &Path) -> bool {
        self.0
    }
}

/// Collects progress events
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl EventLog {
    pub fn sink(&self) -> CallbackProgress<impl Fn(ProgressEvent) + Send + Sync> {
        let events = self.events.clone();
        CallbackProgress::new(move |event| events.lock().push(event))
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn phases(&self) -> Vec<InstallPhase> {
        phases_of(&self.events())
    }
}

/// Phase sequence of an event list, warnings dropped
pub fn phases_of(events: &[ProgressEvent]) -> Vec<InstallPhase> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Phase { phase, .. } => Some(*phase),
            ProgressEvent::Warning(_) => None,
        })
        .collect()
}

/// Config whose scratch directories live under `scratch_root`
pub fn test_config(scratch_root: &Path) -> InstallerConfig {
    let mut config = InstallerConfig::default();
    config.scratch.root = Some(scratch_root.to_path_buf());
    config
}

/// Installer wired to fakes: writable destination, no quarantine, a
/// dismissing elevator
pub fn fake_installer(config: InstallerConfig) -> BundleInstaller {
    BundleInstaller::new(config)
        .with_write_access(Arc::new(FixedAccess(true)))
        .with_elevator(Arc::new(FakeElevator::new(Prompt::Dismiss)))
        .with_quarantine_tool(Arc::new(NoQuarantine))
}
