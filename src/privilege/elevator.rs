// src/privilege/elevator.rs

//! OS-native elevation prompts
//!
//! An [`Elevator`] runs one shell script with administrator rights after an
//! interactive prompt. Nothing is cached: every call prompts again and the
//! rights end with the script.
//!
//! - macOS: AppleScript `do shell script ... with administrator privileges`
//! - Linux: PolicyKit through `pkexec`

use crate::config::ToolPaths;
use crate::process::{run_tool, CancelToken, ProcessError};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// AppleScript error number for a dismissed authorization dialog
const APPLESCRIPT_USER_CANCELED: &str = "(-128)";

/// pkexec exit status when the dialog was dismissed
const PKEXEC_DISMISSED: i32 = 126;

/// Outcome of a failed elevation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElevationError {
    /// The user dismissed the prompt
    #[error("elevation prompt was dismissed")]
    Denied,

    /// Elevation was unavailable or the privileged script failed
    #[error("{0}")]
    Failed(String),
}

/// Runs a shell script with elevated rights
pub trait Elevator: Send + Sync + fmt::Debug {
    fn run_script(&self, script: &str) -> Result<(), ElevationError>;
}

/// macOS elevation through `osascript`
#[derive(Debug, Clone)]
pub struct AppleScriptElevator {
    osascript: PathBuf,
}

impl AppleScriptElevator {
    pub fn new(osascript: impl Into<PathBuf>) -> Self {
        Self {
            osascript: osascript.into(),
        }
    }
}

impl Elevator for AppleScriptElevator {
    fn run_script(&self, script: &str) -> Result<(), ElevationError> {
        let source = format!(
            "do shell script \"{}\" with administrator privileges",
            applescript_escape(script)
        );
        debug!("Requesting administrator privileges via osascript");

        let mut cmd = Command::new(&self.osascript);
        cmd.arg("-e").arg(source);
        run_tool("osascript", &mut cmd, None, &CancelToken::never())
            .map(|_| ())
            .map_err(|e| classify_osascript(&e))
    }
}

/// Linux elevation through PolicyKit
#[derive(Debug, Clone)]
pub struct PkexecElevator {
    pkexec: PathBuf,
    shell: PathBuf,
}

impl PkexecElevator {
    pub fn new(pkexec: impl Into<PathBuf>, shell: impl Into<PathBuf>) -> Self {
        Self {
            pkexec: pkexec.into(),
            shell: shell.into(),
        }
    }
}

impl Elevator for PkexecElevator {
    fn run_script(&self, script: &str) -> Result<(), ElevationError> {
        debug!("Requesting administrator privileges via pkexec");

        let mut cmd = Command::new(&self.pkexec);
        cmd.arg(&self.shell).arg("-c").arg(script);
        run_tool("pkexec", &mut cmd, None, &CancelToken::never())
            .map(|_| ())
            .map_err(|e| classify_pkexec(&e))
    }
}

/// The elevation mechanism native to this platform
pub fn platform_default(tools: &ToolPaths) -> Arc<dyn Elevator> {
    if cfg!(target_os = "macos") {
        Arc::new(AppleScriptElevator::new(&tools.osascript))
    } else {
        Arc::new(PkexecElevator::new(&tools.pkexec, &tools.shell))
    }
}

/// Quote a string for inclusion in an AppleScript string literal
fn applescript_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn classify_osascript(error: &ProcessError) -> ElevationError {
    if error.stderr().contains(APPLESCRIPT_USER_CANCELED) {
        ElevationError::Denied
    } else {
        ElevationError::Failed(error.to_string())
    }
}

fn classify_pkexec(error: &ProcessError) -> ElevationError {
    if error.exit_code() == Some(PKEXEC_DISMISSED) {
        ElevationError::Denied
    } else {
        ElevationError::Failed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: i32, stderr: &str) -> ProcessError {
        ProcessError::Failed {
            tool: "elevator".to_string(),
            status: format!("exit status: {}", code),
            code: Some(code),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_applescript_escape() {
        assert_eq!(
            applescript_escape(r#"cp "a\b" 'c'"#),
            r#"cp \"a\\b\" 'c'"#
        );
    }

    #[test]
    fn test_osascript_cancel_is_denial() {
        let denied = failed(1, "0:90: execution error: User canceled. (-128)");
        assert_eq!(classify_osascript(&denied), ElevationError::Denied);

        let broken = failed(1, "0:90: execution error: cp: No such file (1)");
        assert!(matches!(classify_osascript(&broken), ElevationError::Failed(_)));
    }

    #[test]
    fn test_pkexec_dismissal_is_denial() {
        assert_eq!(classify_pkexec(&failed(126, "")), ElevationError::Denied);
        assert!(matches!(
            classify_pkexec(&failed(127, "Not authorized")),
            ElevationError::Failed(msg) if msg.contains("Not authorized")
        ));
    }

    #[test]
    fn test_missing_elevator_program_is_failure() {
        let elevator = PkexecElevator::new("/nonexistent/pkexec", "/bin/sh");
        assert!(matches!(
            elevator.run_script("true"),
            Err(ElevationError::Failed(_))
        ));
    }
}
