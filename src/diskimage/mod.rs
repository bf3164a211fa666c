// src/diskimage/mod.rs

//! Disk-image mounting
//!
//! The attach and detach steps are delegated to a [`DiskImageTool`]. The
//! default implementation drives `hdiutil`; tests substitute a fake that
//! hands out a prepared directory as the "volume".
//!
//! A [`MountedVolume`] owns its mount: it is detached exactly once, either by
//! an explicit [`MountedVolume::release`] or when dropped.

mod plist;

pub use plist::{attached_devices, parse_mount_points};

use crate::artifact::Artifact;
use crate::bundle::{BundleLayout, InstallableBundle};
use crate::error::{BundleOrigin, Error, Result};
use crate::process::{run_tool, CancelToken, ProcessError};
use crate::progress::{Diagnostic, DiagnosticKind};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Volumes are searched at the top level and one folder down
pub const VOLUME_SEARCH_DEPTH: usize = 2;

/// Detaching a volume failed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Failed to unmount {}: {reason}", .mount_point.display())]
pub struct UnmountError {
    pub mount_point: PathBuf,
    pub reason: String,
}

/// Platform capability to attach and detach disk images
pub trait DiskImageTool: Send + Sync + fmt::Debug {
    /// Attach `image` read-only and return its mount point
    ///
    /// Fails with `MountFailed`, or `Cancelled` if `cancel` tripped while the
    /// attach was in flight. A failed attach must not leave the image mounted.
    fn attach(&self, image: &Path, cancel: &CancelToken) -> Result<PathBuf>;

    /// Force-detach a previously attached volume
    fn detach(&self, mount_point: &Path) -> std::result::Result<(), UnmountError>;
}

/// `hdiutil`-backed disk-image tool
#[derive(Debug, Clone)]
pub struct Hdiutil {
    program: PathBuf,
}

impl Hdiutil {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Hdiutil {
    /// Best-effort detach of every device attached from `image`
    ///
    /// Used when attach went through but left no volume to own the mount.
    fn detach_image(&self, image: &Path) {
        let mut cmd = Command::new(&self.program);
        cmd.arg("info").arg("-plist");
        let output = match run_tool("hdiutil info", &mut cmd, None, &CancelToken::never()) {
            Ok(output) => output,
            Err(e) => {
                warn!("Cannot list attached images to release {}: {}", image.display(), e);
                return;
            }
        };

        let image = image.canonicalize().unwrap_or_else(|_| image.to_path_buf());
        let devices = match attached_devices(&output.stdout, &image) {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Unreadable image list while releasing {}: {}", image.display(), e);
                return;
            }
        };
        for device in devices {
            match self.detach(&device) {
                Ok(()) => info!(
                    "Detached {} left attached from {}",
                    device.display(),
                    image.display()
                ),
                Err(e) => warn!("{}", e),
            }
        }
    }
}

impl Default for Hdiutil {
    fn default() -> Self {
        Self::new("/usr/bin/hdiutil")
    }
}

impl DiskImageTool for Hdiutil {
    fn attach(&self, image: &Path, cancel: &CancelToken) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("attach")
            .arg("-plist")
            .arg("-nobrowse")
            .arg("-noverify")
            .arg("-noautoopen")
            .arg("-readonly")
            .arg(image);

        // Images with an embedded license agreement wait for a "yes"
        let output = match run_tool("hdiutil attach", &mut cmd, Some(b"yes\n"), cancel) {
            Ok(output) => output,
            Err(ProcessError::Cancelled { .. }) => {
                // The attach may have completed before the client was killed
                self.detach_image(image);
                return Err(Error::Cancelled);
            }
            Err(e) => return Err(Error::MountFailed(format!("{}: {}", image.display(), e))),
        };

        // From here on the image is attached: every failure detaches it
        let detail = match parse_mount_points(&output.stdout) {
            Ok(points) => match points.into_iter().next() {
                Some(mount_point) => return Ok(mount_point),
                None => "no mounted volume reported".to_string(),
            },
            Err(e) => format!("unreadable attach output: {}", e),
        };
        self.detach_image(image);
        Err(Error::MountFailed(format!("{}: {}", image.display(), detail)))
    }

    fn detach(&self, mount_point: &Path) -> std::result::Result<(), UnmountError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("detach").arg("-force").arg(mount_point);

        run_tool("hdiutil detach", &mut cmd, None, &CancelToken::never())
            .map(|_| ())
            .map_err(|e| UnmountError {
                mount_point: mount_point.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

/// An attached disk-image volume
#[derive(Debug)]
pub struct MountedVolume {
    mount_point: PathBuf,
    tool: Arc<dyn DiskImageTool>,
    attached: bool,
}

impl MountedVolume {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Detach the volume
    pub fn detach(mut self) -> std::result::Result<(), UnmountError> {
        self.detach_once()
    }

    /// Detach the volume, turning failure into a warning diagnostic
    pub fn release(self) -> Option<Diagnostic> {
        match self.detach() {
            Ok(()) => None,
            Err(e) => {
                let diagnostic = Diagnostic::new(DiagnosticKind::UnmountFailed, e.to_string());
                warn!("{}", diagnostic);
                Some(diagnostic)
            }
        }
    }

    fn detach_once(&mut self) -> std::result::Result<(), UnmountError> {
        if !self.attached {
            return Ok(());
        }
        self.attached = false;
        self.tool.detach(&self.mount_point)?;
        debug!("Detached {}", self.mount_point.display());
        Ok(())
    }
}

impl Drop for MountedVolume {
    fn drop(&mut self) {
        if let Err(e) = self.detach_once() {
            warn!("{}", e);
        }
    }
}

/// Mounts disk-image artifacts and finds the bundle on them
#[derive(Debug, Clone)]
pub struct DiskImageMounter {
    tool: Arc<dyn DiskImageTool>,
    layout: BundleLayout,
}

impl DiskImageMounter {
    pub fn new(tool: Arc<dyn DiskImageTool>, layout: BundleLayout) -> Self {
        Self { tool, layout }
    }

    /// Attach the artifact read-only
    pub fn mount(&self, artifact: &Artifact, cancel: &CancelToken) -> Result<MountedVolume> {
        info!("Mounting {}", artifact.path().display());
        let mount_point = self.tool.attach(artifact.path(), cancel)?;
        debug!("Mounted at {}", mount_point.display());

        Ok(MountedVolume {
            mount_point,
            tool: Arc::clone(&self.tool),
            attached: true,
        })
    }

    /// Find the bundle at the top of the volume or one folder down
    pub fn locate_bundle(
        &self,
        volume: &MountedVolume,
        preferred_name: Option<&OsStr>,
    ) -> Result<InstallableBundle> {
        self.layout
            .locate(volume.mount_point(), VOLUME_SEARCH_DEPTH, preferred_name)
            .ok_or_else(|| Error::BundleNotFound {
                origin: BundleOrigin::DiskImage,
                detail: volume.mount_point().display().to_string(),
            })
    }

    /// Force-detach the volume
    pub fn unmount(&self, volume: MountedVolume) -> std::result::Result<(), UnmountError> {
        info!("Unmounting {}", volume.mount_point().display());
        volume.detach()
    }
}
