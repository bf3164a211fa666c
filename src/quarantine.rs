// src/quarantine.rs

//! Removal of the download-quarantine marking from an installed bundle
//!
//! Stripping is best-effort. A bundle that keeps its marking still launches,
//! the OS just asks the user once more, so failure here is a warning.

use crate::config::QuarantineConfig;
use crate::process::{run_tool, CancelToken, ProcessError};
use crate::progress::{Diagnostic, DiagnosticKind};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

/// Platform capability to strip the quarantine attribute recursively
pub trait QuarantineTool: Send + Sync + fmt::Debug {
    fn strip(&self, bundle: &Path) -> Result<(), ProcessError>;
}

/// `xattr -r -d <attribute>`
#[derive(Debug, Clone)]
pub struct XattrQuarantine {
    program: PathBuf,
    attribute: String,
}

impl XattrQuarantine {
    pub fn new(program: impl Into<PathBuf>, attribute: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            attribute: attribute.into(),
        }
    }
}

impl QuarantineTool for XattrQuarantine {
    fn strip(&self, bundle: &Path) -> Result<(), ProcessError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-r").arg("-d").arg(&self.attribute).arg(bundle);
        run_tool("xattr", &mut cmd, None, &CancelToken::never()).map(|_| ())
    }
}

/// Does nothing; used where the platform has no quarantine marking
#[derive(Debug, Default, Clone, Copy)]
pub struct NoQuarantine;

impl QuarantineTool for NoQuarantine {
    fn strip(&self, _bundle: &Path) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Pick the tool for a configuration
pub fn from_config(config: &QuarantineConfig, xattr: &Path) -> Arc<dyn QuarantineTool> {
    if config.enabled {
        Arc::new(XattrQuarantine::new(xattr, config.attribute.clone()))
    } else {
        Arc::new(NoQuarantine)
    }
}

/// Strip the marking, reporting failure as a diagnostic
pub fn strip_quarantine(tool: &dyn QuarantineTool, bundle: &Path) -> Option<Diagnostic> {
    match tool.strip(bundle) {
        Ok(()) => {
            debug!("Stripped quarantine from {}", bundle.display());
            None
        }
        Err(e) => {
            let diagnostic = Diagnostic::new(
                DiagnosticKind::QuarantineStripFailed,
                format!(
                    "Failed to strip quarantine from {}: {}",
                    bundle.display(),
                    e
                ),
            );
            warn!("{}", diagnostic);
            Some(diagnostic)
        }
    }
}
