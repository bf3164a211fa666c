// src/installer/mod.rs

//! Bundle installer orchestration
//!
//! [`BundleInstaller::install`] drives one session through its phases:
//!
//! 1. `Preparing`: classify the artifact, resolve the destination, check the
//!    size hint against free space. Unsupported artifacts stop here with no
//!    side effects.
//! 2. `Mounting` or `Extracting`: acquire the scratch resource and locate the
//!    bundle in it.
//! 3. `Copying`: staged replacement of the destination, elevated when the
//!    user cannot write its parent.
//! 4. `Verifying`: structural check of the installed bundle, then a
//!    best-effort quarantine strip.
//! 5. `Unmounting` or `Cleaning`: release the scratch resource, on every path.
//! 6. `Complete` on success, `Error` otherwise.
//!
//! Only one session runs at a time. Starting a new one cancels the current
//! session (if it is still cancellable) and waits for it to tear down.

mod session;
mod worker;

pub use session::{InstallPhase, InstallSession, SessionControl};
pub use worker::InstallHandle;

use crate::archive::{ArchiveExtractor, ArchiveTool, CommandArchiveTool};
use crate::artifact::{Artifact, ArtifactKind, InstallSource};
use crate::bundle::{replace_bundle, BundleLayout, InstallableBundle};
use crate::config::InstallerConfig;
use crate::diskimage::{DiskImageMounter, DiskImageTool, Hdiutil};
use crate::error::{Error, Result};
use crate::privilege::{self, Elevator, PrivilegeBroker, UnixAccess, WriteAccess};
use crate::progress::{Diagnostic, DiagnosticKind, ProgressSink};
use crate::quarantine::{self, strip_quarantine, QuarantineTool};
use crate::scratch::ScratchResource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to start one install
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub artifact: Artifact,
    /// Target bundle path; the running application's bundle when unset
    pub destination: Option<PathBuf>,
    /// Advisory size of the installed bundle in bytes
    pub size_hint: Option<u64>,
}

impl InstallRequest {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            artifact,
            destination: None,
            size_hint: None,
        }
    }

    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }
}

/// Result of a successful install
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub session_id: Uuid,
    pub installed_path: PathBuf,
    pub artifact_kind: ArtifactKind,
    /// Whether the copy ran with elevated privileges
    pub elevated: bool,
    pub warnings: Vec<Diagnostic>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// What the copy step produced
struct Installed {
    path: PathBuf,
    kind: ArtifactKind,
    elevated: bool,
}

/// Installs application bundles from downloaded artifacts
#[derive(Debug)]
pub struct BundleInstaller {
    config: InstallerConfig,
    mounter: DiskImageMounter,
    extractor: ArchiveExtractor,
    broker: PrivilegeBroker,
    quarantine: Arc<dyn QuarantineTool>,
    /// Control of the most recently started session
    current: Mutex<Option<Arc<SessionControl>>>,
    /// Held for the whole lifetime of a running session
    gate: Mutex<()>,
}

impl BundleInstaller {
    /// Create an installer using the platform's native tools
    pub fn new(config: InstallerConfig) -> Self {
        let tools = &config.tools;
        let mounter = DiskImageMounter::new(
            Arc::new(Hdiutil::new(&tools.hdiutil)),
            config.layout.clone(),
        );
        let extractor = ArchiveExtractor::new(
            Arc::new(CommandArchiveTool::from_tools(tools)),
            config.layout.clone(),
            config.search.archive_max_depth,
        );
        let broker = PrivilegeBroker::new(privilege::platform_default(tools), Arc::new(UnixAccess));
        let quarantine = quarantine::from_config(&config.quarantine, &tools.xattr);

        Self {
            config,
            mounter,
            extractor,
            broker,
            quarantine,
            current: Mutex::new(None),
            gate: Mutex::new(()),
        }
    }

    pub fn with_disk_image_tool(mut self, tool: Arc<dyn DiskImageTool>) -> Self {
        self.mounter = DiskImageMounter::new(tool, self.config.layout.clone());
        self
    }

    pub fn with_archive_tool(mut self, tool: Arc<dyn ArchiveTool>) -> Self {
        self.extractor = ArchiveExtractor::new(
            tool,
            self.config.layout.clone(),
            self.config.search.archive_max_depth,
        );
        self
    }

    pub fn with_elevator(mut self, elevator: Arc<dyn Elevator>) -> Self {
        self.broker = self.broker.with_elevator(elevator);
        self
    }

    pub fn with_write_access(mut self, access: Arc<dyn WriteAccess>) -> Self {
        self.broker = self.broker.with_access(access);
        self
    }

    pub fn with_quarantine_tool(mut self, tool: Arc<dyn QuarantineTool>) -> Self {
        self.quarantine = tool;
        self
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Install the artifact, blocking until the session ends
    pub fn install(
        &self,
        request: &InstallRequest,
        progress: &dyn ProgressSink,
    ) -> Result<InstallReport> {
        let control = self.register();
        self.execute(&control, request, progress)
    }

    /// Cancel the running session
    ///
    /// Returns false when there is no session or it is past the point where
    /// cancellation is honoured.
    pub fn cancel(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|control| control.cancel())
    }

    /// Phase of the running session, if any
    pub fn current_phase(&self) -> Option<InstallPhase> {
        self.current.lock().as_ref().map(|control| control.phase())
    }

    /// Make a new session current, cancelling its predecessor
    fn register(&self) -> Arc<SessionControl> {
        let control = Arc::new(SessionControl::new());
        let previous = self.current.lock().replace(Arc::clone(&control));
        if let Some(previous) = previous
            && !previous.is_finished()
        {
            info!(
                "Session {} supersedes {}, cancelling it",
                control.id(),
                previous.id()
            );
            previous.cancel();
        }
        control
    }

    fn unregister(&self, control: &Arc<SessionControl>) {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .is_some_and(|active| Arc::ptr_eq(active, control))
        {
            *current = None;
        }
    }

    /// Run a registered session once the previous one has torn down
    fn execute(
        &self,
        control: &Arc<SessionControl>,
        request: &InstallRequest,
        progress: &dyn ProgressSink,
    ) -> Result<InstallReport> {
        let _running = self.gate.lock();
        let started = Instant::now();
        info!(
            "Install session {} for {}",
            control.id(),
            request.artifact.path().display()
        );

        let mut session = InstallSession::new(Arc::clone(control), progress);
        let outcome = self.drive(&mut session, request);
        session.release_scratch();

        let result = match outcome {
            Ok(installed) => {
                session.mark(
                    InstallPhase::Complete,
                    &format!("Installed {}", installed.path.display()),
                );
                info!(
                    "Installed {} in {:.2?}",
                    installed.path.display(),
                    started.elapsed()
                );
                Ok(InstallReport {
                    session_id: control.id(),
                    installed_path: installed.path,
                    artifact_kind: installed.kind,
                    elevated: installed.elevated,
                    warnings: session.into_warnings(),
                    started_at: control.started_at(),
                    duration: started.elapsed(),
                })
            }
            Err(e) => {
                warn!("Install session {} failed: {}", control.id(), e);
                session.mark(InstallPhase::Error, &e.to_string());
                Err(e)
            }
        };

        self.unregister(control);
        result
    }

    fn drive(&self, session: &mut InstallSession<'_>, request: &InstallRequest) -> Result<Installed> {
        let artifact = &request.artifact;
        session.enter(
            InstallPhase::Preparing,
            &format!("Preparing {}", artifact.path().display()),
        )?;

        let source = artifact.classify()?;
        let destination = match &request.destination {
            Some(destination) => destination.clone(),
            None => running_bundle(&self.config.layout)?,
        };
        if let Some(hint) = request.size_hint
            && let Some(diagnostic) = check_free_space(&destination, hint)
        {
            session.warn(diagnostic);
        }

        let preferred = destination.file_name().map(OsString::from);
        let bundle = self.acquire(session, artifact, source, preferred)?;

        session.enter(
            InstallPhase::Copying,
            &format!(
                "Copying {} to {}",
                bundle.path().display(),
                destination.display()
            ),
        )?;
        let elevated = self.broker.requires_elevation(&destination);
        if elevated {
            self.broker
                .elevated_copy(bundle.path(), &destination, &self.config.layout)?;
        } else if let Some(diagnostic) =
            replace_bundle(bundle.path(), &destination, &self.config.layout)?
        {
            session.warn(diagnostic);
        }

        session.enter(
            InstallPhase::Verifying,
            &format!("Verifying {}", destination.display()),
        )?;
        self.config.layout.verify(&destination)?;
        if let Some(diagnostic) = strip_quarantine(self.quarantine.as_ref(), &destination) {
            session.warn(diagnostic);
        }

        Ok(Installed {
            path: destination,
            kind: source.kind(),
            elevated,
        })
    }

    /// Mount or extract, hand the scratch resource to the session, and find
    /// the bundle inside it
    fn acquire(
        &self,
        session: &mut InstallSession<'_>,
        artifact: &Artifact,
        source: InstallSource,
        preferred: Option<OsString>,
    ) -> Result<InstallableBundle> {
        let preferred = preferred.as_deref();
        match source {
            InstallSource::DiskImage => {
                session.enter(
                    InstallPhase::Mounting,
                    &format!("Mounting {}", artifact.path().display()),
                )?;
                let volume = self.mounter.mount(artifact, session.token())?;
                let located = self.mounter.locate_bundle(&volume, preferred);
                session.adopt(ScratchResource::Volume(volume));
                located
            }
            InstallSource::Archive(format) => {
                session.enter(
                    InstallPhase::Extracting,
                    &format!("Extracting {}", artifact.path().display()),
                )?;
                let dir = self.extractor.extract(
                    artifact,
                    format,
                    self.config.scratch.root.as_deref(),
                    session.token(),
                )?;
                let located = self.extractor.locate_bundle(dir.path(), preferred);
                session.adopt(ScratchResource::Directory(dir));
                located
            }
        }
    }
}

/// Bundle containing the running executable
pub fn running_bundle(layout: &BundleLayout) -> Result<PathBuf> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::DestinationUnavailable(format!("cannot locate executable: {}", e)))?;
    bundle_containing(&exe, layout).ok_or_else(|| {
        Error::DestinationUnavailable(format!(
            "{} is not inside a .{} bundle",
            exe.display(),
            layout.extension
        ))
    })
}

fn bundle_containing(path: &Path, layout: &BundleLayout) -> Option<PathBuf> {
    path.ancestors()
        .skip(1)
        .find(|ancestor| layout.has_extension(ancestor))
        .map(Path::to_path_buf)
}

/// Compare the size hint with the free space on the destination volume
fn check_free_space(destination: &Path, needed: u64) -> Option<Diagnostic> {
    let probe = destination.ancestors().skip(1).find(|p| p.exists())?;
    let stats = match nix::sys::statvfs::statvfs(probe) {
        Ok(stats) => stats,
        Err(e) => {
            debug!("Cannot stat filesystem of {}: {}", probe.display(), e);
            return None;
        }
    };
    #[allow(clippy::unnecessary_cast)]
    let available = stats.blocks_available() as u64 * stats.fragment_size() as u64;
    if available >= needed {
        return None;
    }

    let diagnostic = Diagnostic::new(
        DiagnosticKind::LowDiskSpace,
        format!(
            "{} has {} bytes free, update needs about {}",
            probe.display(),
            available,
            needed
        ),
    );
    warn!("{}", diagnostic);
    Some(diagnostic)
}
