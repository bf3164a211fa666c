// src/scratch.rs

//! Scratch resources owned by an install session
//!
//! A scratch resource is either a mounted disk-image volume or an extraction
//! directory. Each is released exactly once: explicitly through `release()`,
//! which reports failures as diagnostics, or on drop as a fallback so that an
//! early return or panic never leaks a mount or a directory.

use crate::bundle::make_removable;
use crate::diskimage::MountedVolume;
use crate::installer::InstallPhase;
use crate::progress::{Diagnostic, DiagnosticKind};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Prefix for scratch directory names
const SCRATCH_PREFIX: &str = "updraft-";

/// A temporary extraction directory
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, or under the system temp dir
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Created scratch directory {}", dir.path().display());
        Ok(Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory, reporting failure as a diagnostic
    pub fn release(mut self) -> Option<Diagnostic> {
        self.remove()
    }

    fn remove(&mut self) -> Option<Diagnostic> {
        let dir = self.dir.take()?;
        // Extracted payloads may contain read-only directories
        make_removable(dir.path());
        match dir.close() {
            Ok(()) => {
                debug!("Removed scratch directory {}", self.path.display());
                None
            }
            Err(e) => {
                let diagnostic = Diagnostic::new(
                    DiagnosticKind::CleanupFailed,
                    format!(
                        "Failed to remove scratch directory {}: {}",
                        self.path.display(),
                        e
                    ),
                );
                warn!("{}", diagnostic);
                Some(diagnostic)
            }
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}

/// Any scratch resource a session may hold
#[derive(Debug)]
pub enum ScratchResource {
    Volume(MountedVolume),
    Directory(ScratchDir),
}

impl ScratchResource {
    /// Root directory the bundle search starts from
    pub fn root(&self) -> &Path {
        match self {
            Self::Volume(volume) => volume.mount_point(),
            Self::Directory(dir) => dir.path(),
        }
    }

    /// Phase reported while this resource is being released
    pub fn release_phase(&self) -> InstallPhase {
        match self {
            Self::Volume(_) => InstallPhase::Unmounting,
            Self::Directory(_) => InstallPhase::Cleaning,
        }
    }

    /// Release the resource; failures are advisory
    pub fn release(self) -> Option<Diagnostic> {
        match self {
            Self::Volume(volume) => volume.release(),
            Self::Directory(dir) => dir.release(),
        }
    }
}
