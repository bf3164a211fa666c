// src/process.rs

//! Supervised execution of external tools
//!
//! Every capability the pipeline delegates to the platform (attach, detach,
//! extract, elevate, strip quarantine) runs through [`run_tool`]:
//!
//! - stdout and stderr are captured on reader threads so a chatty tool can
//!   never deadlock on a full pipe
//! - optional stdin bytes are fed from a writer thread
//! - the child is polled with `wait_timeout`; when the supplied
//!   [`CancelToken`] trips, the child is killed and reaped before returning
//! - a non-zero exit is always an error carrying the captured stderr
//!
//! There is no implicit timeout. Callers that need a deadline trip the token.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cooperative cancellation flag shared between a session and its tools
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token nobody holds a handle to trip; used for non-cancellable steps
    pub fn never() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Errors from running an external tool
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("Failed waiting for {tool}: {source}")]
    Wait {
        tool: String,
        source: std::io::Error,
    },

    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl ProcessError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Exit code of a tool that ran to completion unsuccessfully
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }

    /// Captured stderr of a failed tool, empty otherwise
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Captured output of a successful tool run
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `command` to completion, honouring `cancel`
///
/// `tool` is a short label used in logs and error messages.
pub fn run_tool(
    tool: &str,
    command: &mut Command,
    stdin: Option<&[u8]>,
    cancel: &CancelToken,
) -> Result<ToolOutput, ProcessError> {
    if cancel.is_cancelled() {
        return Err(ProcessError::Cancelled {
            tool: tool.to_string(),
        });
    }

    debug!("Running {}: {:?}", tool, command);

    let mut child = command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(bytes), Some(mut pipe)) => {
            let bytes = bytes.to_vec();
            // The tool may exit without reading; a broken pipe is not our failure
            Some(thread::spawn(move || {
                let _ = pipe.write_all(&bytes);
            }))
        }
        _ => None,
    };
    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    // On cancellation the readers are left to finish on their own: a killed
    // tool's descendants may still hold the pipes open
    let status = supervise(tool, &mut child, cancel)?;

    if let Some(writer) = writer {
        let _ = writer.join();
    }
    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);

    if status.success() {
        return Ok(ToolOutput { stdout, stderr });
    }

    let stderr_text = String::from_utf8_lossy(&stderr).trim().to_string();
    for line in stderr_text.lines() {
        warn!("[{}] {}", tool, line);
    }

    Err(ProcessError::Failed {
        tool: tool.to_string(),
        status: status.to_string(),
        code: status.code(),
        stderr: stderr_text,
    })
}

/// Wait for the child, killing it if the token trips
fn supervise(tool: &str, child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, ProcessError> {
    loop {
        let waited = child
            .wait_timeout(POLL_INTERVAL)
            .map_err(|source| ProcessError::Wait {
                tool: tool.to_string(),
                source,
            })?;

        if let Some(status) = waited {
            return Ok(status);
        }

        if cancel.is_cancelled() {
            debug!("Cancelling {} (pid {})", tool, child.id());
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::Cancelled {
                tool: tool.to_string(),
            });
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_reader(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
