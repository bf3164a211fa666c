// src/relaunch.rs

//! Relaunching the freshly installed bundle
//!
//! The running process cannot start the new bundle and then exit cleanly:
//! the new instance may refuse to start while the old one is alive, and a
//! graceful shutdown can stall on UI state. Instead a detached launcher
//! process is started which sleeps for a short delay and then opens the
//! bundle, and the current process terminates at once.
//!
//! The launcher runs in its own process group so it survives the
//! termination of this process and the signals sent to its group.

use crate::config::{RelaunchConfig, ToolPaths, BUNDLE_PLACEHOLDER};
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Shell program run by the launcher: `$1` is the delay, the rest the command
const LAUNCHER_SCRIPT: &str = r#"sleep "$1"; shift; exec "$@""#;

/// Errors starting the relaunch
#[derive(Error, Debug)]
pub enum RelaunchError {
    #[error("Relaunch command is empty")]
    EmptyCommand,

    #[error("Failed to start launcher: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Starts a process that outlives this one
pub trait Launcher: Send + Sync + fmt::Debug {
    /// Start `bundle` after `delay`, without waiting for it
    fn launch_detached(&self, bundle: &Path, delay: Duration) -> Result<(), RelaunchError>;
}

/// Launches through `sh -c 'sleep ...; exec <command>'`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    shell: PathBuf,
    command: Vec<String>,
}

impl CommandLauncher {
    /// `command` may contain the `{bundle}` placeholder
    pub fn new(shell: impl Into<PathBuf>, command: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            command,
        }
    }

    pub fn from_config(config: &RelaunchConfig, tools: &ToolPaths) -> Self {
        Self::new(&tools.shell, config.command.clone())
    }

    /// Command line with the bundle path substituted
    fn expand(&self, bundle: &Path) -> Vec<String> {
        let bundle = bundle.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace(BUNDLE_PLACEHOLDER, &bundle))
            .collect()
    }
}

impl Launcher for CommandLauncher {
    fn launch_detached(&self, bundle: &Path, delay: Duration) -> Result<(), RelaunchError> {
        let command = self.expand(bundle);
        if command.is_empty() {
            return Err(RelaunchError::EmptyCommand);
        }

        let seconds = format!("{}.{:03}", delay.as_secs(), delay.subsec_millis());
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(LAUNCHER_SCRIPT)
            .arg("updraft-relaunch")
            .arg(&seconds)
            .args(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()?;

        info!(
            "Scheduled relaunch of {} in {}s (launcher pid {})",
            bundle.display(),
            seconds,
            child.id()
        );
        Ok(())
    }
}

/// Ensures at most one relaunch is ever triggered
pub struct RelaunchCoordinator {
    pending: AtomicBool,
    launcher: Arc<dyn Launcher>,
    terminator: Box<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for RelaunchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaunchCoordinator")
            .field("pending", &self.pending)
            .field("launcher", &self.launcher)
            .finish_non_exhaustive()
    }
}

impl RelaunchCoordinator {
    /// Coordinator that exits the process after launching
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            pending: AtomicBool::new(false),
            launcher,
            terminator: Box::new(|| std::process::exit(0)),
        }
    }

    pub fn from_config(config: &RelaunchConfig, tools: &ToolPaths) -> Self {
        Self::new(Arc::new(CommandLauncher::from_config(config, tools)))
    }

    /// Replace the termination step; embedders with their own shutdown
    /// path (and tests) use this
    pub fn with_terminator(mut self, terminator: impl Fn() + Send + Sync + 'static) -> Self {
        self.terminator = Box::new(terminator);
        self
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Start the detached launcher for `target`, then terminate
    ///
    /// Returns `Ok(false)` without doing anything when a relaunch is already
    /// pending. If the launcher cannot be started the process keeps running
    /// and a later call may try again.
    pub fn relaunch(&self, target: &Path, delay: Duration) -> Result<bool, RelaunchError> {
        if self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Relaunch already pending, ignoring request for {}", target.display());
            return Ok(false);
        }

        if let Err(e) = self.launcher.launch_detached(target, delay) {
            self.pending.store(false, Ordering::SeqCst);
            return Err(e);
        }

        self.terminate_now();
        Ok(true)
    }

    /// Terminate the current process without a graceful shutdown
    pub fn terminate_now(&self) {
        info!("Terminating for relaunch");
        (self.terminator)();
    }
}
