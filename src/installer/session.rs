// src/installer/session.rs

//! Install sessions and their phase state machine
//!
//! ```text
//! Preparing -> Mounting | Extracting -> Copying -> Verifying
//!           -> Unmounting | Cleaning -> Complete
//! any non-terminal phase -> Error
//! ```
//!
//! Cancellation is phase-gated. [`SessionControl::cancel`] only trips the
//! token while the session is in a cancellable phase, and entering `Copying`
//! checks the token under the same lock, so a cancel request either lands
//! before the copy starts or is ignored.

use crate::error::{Error, Result};
use crate::process::CancelToken;
use crate::progress::{Diagnostic, ProgressSink};
use crate::scratch::ScratchResource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Phases of an install session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallPhase {
    /// Classifying the artifact and resolving the destination
    Preparing,
    /// Attaching the disk image
    Mounting,
    /// Unpacking the archive
    Extracting,
    /// Moving the bundle into the destination - POINT OF NO RETURN
    Copying,
    /// Checking the installed bundle
    Verifying,
    /// Detaching the disk image
    Unmounting,
    /// Removing the extraction directory
    Cleaning,
    /// Installed and all scratch resources released
    Complete,
    /// The session failed
    Error,
}

impl InstallPhase {
    /// Returns true if a cancel request is honoured in this phase
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Preparing | Self::Mounting | Self::Extracting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Mounting => "mounting",
            Self::Extracting => "extracting",
            Self::Copying => "copying",
            Self::Verifying => "verifying",
            Self::Unmounting => "unmounting",
            Self::Cleaning => "cleaning",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Shared handle on a session's phase and cancellation state
#[derive(Debug)]
pub struct SessionControl {
    id: Uuid,
    started_at: DateTime<Utc>,
    phase: Mutex<InstallPhase>,
    token: CancelToken,
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: Mutex::new(InstallPhase::Preparing),
            token: CancelToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> InstallPhase {
        *self.phase.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Request cancellation
    ///
    /// Returns false, and changes nothing, once the session has reached
    /// `Copying` or any later phase.
    pub fn cancel(&self) -> bool {
        let phase = self.phase.lock();
        if phase.is_cancellable() {
            info!("Cancelling install session {} during {}", self.id, *phase);
            self.token.cancel();
            true
        } else {
            debug!("Ignoring cancel for session {} during {}", self.id, *phase);
            false
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Move to `next`, failing with `Cancelled` if a cancel request is
    /// pending and `next` is still gated by cancellation
    fn advance(&self, next: InstallPhase) -> Result<()> {
        let mut phase = self.phase.lock();
        let gated = next.is_cancellable() || next == InstallPhase::Copying;
        if gated && self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *phase = next;
        Ok(())
    }

    /// Move to `next` unconditionally; used for release and terminal phases
    fn force(&self, next: InstallPhase) {
        *self.phase.lock() = next;
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

/// One install attempt
///
/// Owns the scratch resource created during the attempt. Dropping the
/// session releases anything still held, so every exit path cleans up.
pub struct InstallSession<'a> {
    control: Arc<SessionControl>,
    sink: &'a dyn ProgressSink,
    scratch: Option<ScratchResource>,
    warnings: Vec<Diagnostic>,
}

impl<'a> InstallSession<'a> {
    pub fn new(control: Arc<SessionControl>, sink: &'a dyn ProgressSink) -> Self {
        Self {
            control,
            sink,
            scratch: None,
            warnings: Vec::new(),
        }
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    pub fn token(&self) -> &CancelToken {
        self.control.token()
    }

    /// Enter a phase, honouring a pending cancel request
    pub fn enter(&self, phase: InstallPhase, message: &str) -> Result<()> {
        self.control.advance(phase)?;
        self.sink.phase(phase, message);
        Ok(())
    }

    /// Enter a phase that cancellation cannot block
    pub fn mark(&self, phase: InstallPhase, message: &str) {
        self.control.force(phase);
        self.sink.phase(phase, message);
    }

    /// Record an advisory problem
    pub fn warn(&mut self, diagnostic: Diagnostic) {
        self.sink.warning(&diagnostic);
        self.warnings.push(diagnostic);
    }

    /// Take ownership of a scratch resource
    pub fn adopt(&mut self, resource: ScratchResource) {
        debug!("Session {} holds {}", self.control.id(), resource.root().display());
        // A session acquires at most one resource; release any predecessor
        if let Some(previous) = self.scratch.replace(resource)
            && let Some(diagnostic) = previous.release()
        {
            self.warn(diagnostic);
        }
    }

    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Release the scratch resource, reporting the unmount/cleanup phase
    pub fn release_scratch(&mut self) {
        let Some(resource) = self.scratch.take() else {
            return;
        };
        let phase = resource.release_phase();
        let message = match phase {
            InstallPhase::Unmounting => format!("Unmounting {}", resource.root().display()),
            _ => format!("Removing {}", resource.root().display()),
        };
        self.mark(phase, &message);
        if let Some(diagnostic) = resource.release() {
            self.warn(diagnostic);
        }
    }

    /// Warnings collected so far
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn into_warnings(mut self) -> Vec<Diagnostic> {
        self.release_scratch();
        std::mem::take(&mut self.warnings)
    }
}

impl Drop for InstallSession<'_> {
    fn drop(&mut self) {
        // Fallback for early exits; normal paths release explicitly
        if let Some(resource) = self.scratch.take() {
            let _ = resource.release();
        }
    }
}
