// src/progress.rs

//! Progress reporting for install sessions
//!
//! The installer reports phase transitions and advisory warnings through the
//! [`ProgressSink`] trait. Implementations cover the common consumers:
//!
//! - `SilentProgress`: No-op for scripted/quiet modes
//! - `LogProgress`: Logs every event to tracing
//! - `CallbackProgress`: Forwards events to a closure
//! - `ChannelProgress`: Sends events over a `flume` channel to another thread
//!
//! # Example
//!
//! ```ignore
//! use updraft::progress::{CallbackProgress, ProgressEvent};
//!
//! let progress = CallbackProgress::new(|event| match event {
//!     ProgressEvent::Phase { phase, message } => println!("{phase}: {message}"),
//!     ProgressEvent::Warning(diag) => eprintln!("warning: {diag}"),
//! });
//! installer.install(&request, &progress)?;
//! ```

use crate::installer::InstallPhase;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// Category of a non-fatal problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// Detaching the disk image failed
    UnmountFailed,
    /// Removing a scratch directory failed
    CleanupFailed,
    /// Removing the quarantine marking failed
    QuarantineStripFailed,
    /// The displaced previous bundle could not be deleted
    StaleBundleRemains,
    /// The destination volume has less free space than the size hint
    LowDiskSpace,
}

/// A warning-level problem that does not fail the install
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Events emitted during an install session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The session entered (or reported within) a phase
    Phase { phase: InstallPhase, message: String },
    /// A non-fatal problem occurred
    Warning(Diagnostic),
}

/// Receiver of install progress
///
/// Implementations must be thread-safe (Send + Sync); the installer may run
/// on a worker thread while the sink is observed elsewhere.
pub trait ProgressSink: Send + Sync {
    /// Report the current phase with a human-readable message
    fn phase(&self, phase: InstallPhase, message: &str);

    /// Report a non-fatal problem
    fn warning(&self, diagnostic: &Diagnostic);
}

/// Silent progress sink (no-op)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn phase(&self, _phase: InstallPhase, _message: &str) {}

    fn warning(&self, _diagnostic: &Diagnostic) {}
}

/// Logging progress sink
///
/// Phase messages go to tracing at info level, warnings at warn level.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ProgressSink for LogProgress {
    fn phase(&self, phase: InstallPhase, message: &str) {
        info!("{} [{}]: {}", self.name, phase, message);
    }

    fn warning(&self, diagnostic: &Diagnostic) {
        warn!("{}: {}", self.name, diagnostic);
    }
}

/// Callback-based progress sink
///
/// Useful for GUI integration or for collecting events in tests.
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressSink for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn phase(&self, phase: InstallPhase, message: &str) {
        (self.callback)(ProgressEvent::Phase {
            phase,
            message: message.to_string(),
        });
    }

    fn warning(&self, diagnostic: &Diagnostic) {
        (self.callback)(ProgressEvent::Warning(diagnostic.clone()));
    }
}

/// Channel-backed progress sink
///
/// Sends never block. A disconnected receiver is ignored: the install does
/// not depend on anyone listening.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: flume::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: flume::Sender<ProgressEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink together with an unbounded receiver
    pub fn unbounded() -> (Self, flume::Receiver<ProgressEvent>) {
        let (sender, receiver) = flume::unbounded();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn phase(&self, phase: InstallPhase, message: &str) {
        let _ = self.sender.send(ProgressEvent::Phase {
            phase,
            message: message.to_string(),
        });
    }

    fn warning(&self, diagnostic: &Diagnostic) {
        let _ = self.sender.send(ProgressEvent::Warning(diagnostic.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callback_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let progress = CallbackProgress::new(move |event| {
            events_clone.lock().unwrap().push(event);
        });

        progress.phase(InstallPhase::Preparing, "starting");
        progress.warning(&Diagnostic::new(DiagnosticKind::UnmountFailed, "busy"));

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert!(matches!(
            &captured[0],
            ProgressEvent::Phase { phase: InstallPhase::Preparing, message } if message == "starting"
        ));
        assert!(matches!(
            &captured[1],
            ProgressEvent::Warning(d) if d.kind == DiagnosticKind::UnmountFailed
        ));
    }

    #[test]
    fn test_channel_progress() {
        let (progress, receiver) = ChannelProgress::unbounded();
        progress.phase(InstallPhase::Copying, "copying");

        let event = receiver.try_recv().unwrap();
        assert_eq!(
            event,
            ProgressEvent::Phase {
                phase: InstallPhase::Copying,
                message: "copying".to_string()
            }
        );
    }

    #[test]
    fn test_channel_progress_ignores_dropped_receiver() {
        let (progress, receiver) = ChannelProgress::unbounded();
        drop(receiver);
        // Must not panic
        progress.phase(InstallPhase::Complete, "done");
        progress.warning(&Diagnostic::new(DiagnosticKind::CleanupFailed, "x"));
    }

    #[test]
    fn test_silent_and_log_progress() {
        SilentProgress.phase(InstallPhase::Verifying, "verify");
        LogProgress::new("install").phase(InstallPhase::Verifying, "verify");
        LogProgress::new("install")
            .warning(&Diagnostic::new(DiagnosticKind::LowDiskSpace, "low"));
    }
}
