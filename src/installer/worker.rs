// src/installer/worker.rs

//! Background installs
//!
//! Tool invocations block for as long as the tool runs, so UI-facing callers
//! run the session on a worker thread and observe it through a channel.

use super::{BundleInstaller, InstallPhase, InstallReport, InstallRequest, SessionControl};
use crate::error::Result;
use crate::progress::{ChannelProgress, ProgressEvent};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Handle on an install running on a worker thread
#[derive(Debug)]
pub struct InstallHandle {
    control: Arc<SessionControl>,
    events: flume::Receiver<ProgressEvent>,
    thread: JoinHandle<Result<InstallReport>>,
}

impl InstallHandle {
    pub fn session_id(&self) -> Uuid {
        self.control.id()
    }

    pub fn phase(&self) -> InstallPhase {
        self.control.phase()
    }

    /// Progress events, in the order the session emitted them
    pub fn events(&self) -> &flume::Receiver<ProgressEvent> {
        &self.events
    }

    /// Request cancellation; see [`SessionControl::cancel`]
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Block until the session ends
    pub fn wait(self) -> Result<InstallReport> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl BundleInstaller {
    /// Start an install on a dedicated thread
    ///
    /// The session is registered before this returns, so a superseded
    /// session is cancelled immediately and `cancel()` on the handle is
    /// effective right away.
    pub fn spawn(self: &Arc<Self>, request: InstallRequest) -> io::Result<InstallHandle> {
        let control = self.register();
        let (sink, events) = ChannelProgress::unbounded();

        let installer = Arc::clone(self);
        let worker_control = Arc::clone(&control);
        let spawned = thread::Builder::new()
            .name(format!("updraft-install-{}", control.id().simple()))
            .spawn(move || installer.execute(&worker_control, &request, &sink));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.unregister(&control);
                return Err(e);
            }
        };

        Ok(InstallHandle {
            control,
            events,
            thread,
        })
    }
}
