// src/archive.rs

//! Archive extraction
//!
//! Archives are unpacked by the platform tools so that metadata survives:
//! `ditto -x -k` for zip on macOS (resource forks, extended attributes),
//! `unzip` for zip elsewhere, and `tar -xpf` for tarballs of any compression.
//! The payload lands in a fresh [`ScratchDir`] which the caller owns.

use crate::artifact::{ArchiveFormat, Artifact};
use crate::bundle::{BundleLayout, InstallableBundle};
use crate::config::ToolPaths;
use crate::error::{BundleOrigin, Error, Result};
use crate::process::{run_tool, CancelToken, ProcessError};
use crate::progress::Diagnostic;
use crate::scratch::ScratchDir;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// Platform capability to unpack an archive into a directory
pub trait ArchiveTool: Send + Sync + fmt::Debug {
    fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<(), ProcessError>;
}

/// Extraction through the system command-line tools
#[derive(Debug, Clone)]
pub struct CommandArchiveTool {
    ditto: PathBuf,
    unzip: PathBuf,
    tar: PathBuf,
    use_ditto: bool,
}

impl CommandArchiveTool {
    pub fn from_tools(tools: &ToolPaths) -> Self {
        Self {
            ditto: tools.ditto.clone(),
            unzip: tools.unzip.clone(),
            tar: tools.tar.clone(),
            use_ditto: cfg!(target_os = "macos"),
        }
    }
}

impl Default for CommandArchiveTool {
    fn default() -> Self {
        Self::from_tools(&ToolPaths::default())
    }
}

impl ArchiveTool for CommandArchiveTool {
    fn extract(
        &self,
        archive: &Path,
        format: ArchiveFormat,
        dest: &Path,
        cancel: &CancelToken,
    ) -> std::result::Result<(), ProcessError> {
        let (tool, mut cmd) = match format {
            ArchiveFormat::Zip if self.use_ditto => {
                let mut cmd = Command::new(&self.ditto);
                cmd.arg("-x").arg("-k").arg(archive).arg(dest);
                ("ditto", cmd)
            }
            ArchiveFormat::Zip => {
                let mut cmd = Command::new(&self.unzip);
                cmd.arg("-q").arg("-o").arg(archive).arg("-d").arg(dest);
                ("unzip", cmd)
            }
            // tar detects gzip, bzip2 and xz on its own when extracting
            ArchiveFormat::Tar => {
                let mut cmd = Command::new(&self.tar);
                cmd.arg("-xpf").arg(archive).arg("-C").arg(dest);
                ("tar", cmd)
            }
        };

        run_tool(tool, &mut cmd, None, cancel).map(|_| ())
    }
}

/// Extracts archive artifacts and finds the bundle inside
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    tool: Arc<dyn ArchiveTool>,
    layout: BundleLayout,
    max_depth: usize,
}

impl ArchiveExtractor {
    pub fn new(tool: Arc<dyn ArchiveTool>, layout: BundleLayout, max_depth: usize) -> Self {
        Self {
            tool,
            layout,
            max_depth,
        }
    }

    /// Unpack the artifact into a new scratch directory under `scratch_root`
    ///
    /// On failure the scratch directory is removed before returning.
    pub fn extract(
        &self,
        artifact: &Artifact,
        format: ArchiveFormat,
        scratch_root: Option<&Path>,
        cancel: &CancelToken,
    ) -> Result<ScratchDir> {
        let scratch = ScratchDir::create(scratch_root).map_err(|e| {
            Error::ExtractionFailed(format!("Failed to create scratch directory: {}", e))
        })?;

        info!(
            "Extracting {} into {}",
            artifact.path().display(),
            scratch.path().display()
        );

        match self
            .tool
            .extract(artifact.path(), format, scratch.path(), cancel)
        {
            Ok(()) => {
                debug!("Extracted {}", artifact.path().display());
                Ok(scratch)
            }
            Err(e) => {
                // Removal problems are already logged by the scratch dir
                let _ = scratch.release();
                if e.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    Err(Error::ExtractionFailed(format!(
                        "{}: {}",
                        artifact.path().display(),
                        e
                    )))
                }
            }
        }
    }

    /// Find the bundle in an extracted tree, up to the configured depth
    pub fn locate_bundle(
        &self,
        dir: &Path,
        preferred_name: Option<&OsStr>,
    ) -> Result<InstallableBundle> {
        self.layout
            .locate(dir, self.max_depth, preferred_name)
            .ok_or_else(|| Error::BundleNotFound {
                origin: BundleOrigin::Archive,
                detail: format!(
                    "{} (searched {} levels)",
                    dir.display(),
                    self.max_depth
                ),
            })
    }

    /// Best-effort removal of an extraction directory
    pub fn cleanup(&self, dir: ScratchDir) -> Option<Diagnostic> {
        dir.release()
    }
}
