// src/privilege/mod.rs

//! Privilege brokering for destinations the user cannot write
//!
//! [`PrivilegeBroker::requires_elevation`] checks write access to the
//! destination's parent. When it is missing, [`PrivilegeBroker::elevated_copy`]
//! performs the same staged swap as an unprivileged install, but inside a
//! single script run by an [`Elevator`]. Elevated rights last for exactly
//! that one script.

mod elevator;

pub use elevator::{
    platform_default, AppleScriptElevator, ElevationError, Elevator, PkexecElevator,
};

use crate::bundle::{sibling, BundleLayout};
use crate::error::{Error, Result};
use nix::unistd::{access, AccessFlags};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Probe for write permission on a directory
pub trait WriteAccess: Send + Sync + fmt::Debug {
    fn can_write(&self, dir: &Path) -> bool;
}

/// access(2)-based probe for the real user
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixAccess;

impl WriteAccess for UnixAccess {
    fn can_write(&self, dir: &Path) -> bool {
        // A missing directory is writable if we could create it
        let existing = dir.ancestors().find(|p| p.exists());
        match existing {
            Some(path) => access(path, AccessFlags::W_OK | AccessFlags::X_OK).is_ok(),
            None => false,
        }
    }
}

/// Decides when elevation is needed and performs elevated copies
#[derive(Debug, Clone)]
pub struct PrivilegeBroker {
    elevator: Arc<dyn Elevator>,
    access: Arc<dyn WriteAccess>,
    copy_command: &'static str,
}

impl PrivilegeBroker {
    pub fn new(elevator: Arc<dyn Elevator>, access: Arc<dyn WriteAccess>) -> Self {
        Self {
            elevator,
            access,
            // ditto keeps resource forks and extended attributes
            copy_command: if cfg!(target_os = "macos") {
                "/usr/bin/ditto"
            } else {
                "cp -pR"
            },
        }
    }

    pub fn with_elevator(mut self, elevator: Arc<dyn Elevator>) -> Self {
        self.elevator = elevator;
        self
    }

    pub fn with_access(mut self, access: Arc<dyn WriteAccess>) -> Self {
        self.access = access;
        self
    }

    /// True when the current user cannot write the destination's parent
    pub fn requires_elevation(&self, destination: &Path) -> bool {
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let needed = !self.access.can_write(parent);
        debug!(
            "Write access to {}: {}",
            parent.display(),
            if needed { "denied" } else { "granted" }
        );
        needed
    }

    /// Replace `destination` with `source` under elevated rights
    ///
    /// Prompts every time. A dismissed prompt is `AuthorizationDenied`; any
    /// other failure, including a failed copy inside the script or a staged
    /// copy missing part of `layout`, is `AuthorizationFailed`.
    pub fn elevated_copy(
        &self,
        source: &Path,
        destination: &Path,
        layout: &BundleLayout,
    ) -> Result<()> {
        let script = self.copy_script(source, destination, layout)?;
        info!(
            "Copying {} to {} with elevated privileges",
            source.display(),
            destination.display()
        );

        self.elevator.run_script(&script).map_err(|e| match e {
            ElevationError::Denied => Error::AuthorizationDenied,
            ElevationError::Failed(detail) => Error::AuthorizationFailed(detail),
        })
    }

    /// Shell script performing the staged swap
    fn copy_script(
        &self,
        source: &Path,
        destination: &Path,
        layout: &BundleLayout,
    ) -> Result<String> {
        let id = Uuid::new_v4();
        let staged = sibling(destination, "new", &id)?;
        let displaced = sibling(destination, "old", &id)?;
        let parent = destination.parent().unwrap_or(Path::new("."));

        let src = shell_quote(source)?;
        let dst = shell_quote(destination)?;
        let new = shell_quote(&staged)?;
        let old = shell_quote(&displaced)?;
        let dir = shell_quote(parent)?;
        let exec_dir = shell_quote(&staged.join(&layout.executable_dir))?;
        let metadata = shell_quote(&staged.join(&layout.metadata_file))?;
        let copy = self.copy_command;

        Ok(format!(
            "mkdir -p {dir} || exit 1\n\
             if ! {copy} {src} {new}; then rm -rf {new}; exit 1; fi\n\
             [ -d {exec_dir} ] && [ -f {metadata} ] || {{ rm -rf {new}; exit 1; }}\n\
             if [ -e {dst} ] || [ -L {dst} ]; then\n\
             \x20 mv {dst} {old} || {{ rm -rf {new}; exit 1; }}\n\
             fi\n\
             if ! mv {new} {dst}; then\n\
             \x20 if [ -e {old} ]; then mv {old} {dst}; fi\n\
             \x20 rm -rf {new}\n\
             \x20 exit 1\n\
             fi\n\
             rm -rf {old}\n\
             exit 0\n"
        ))
    }
}

/// Single-quote a path for /bin/sh
fn shell_quote(path: &Path) -> Result<String> {
    let text = path.to_str().ok_or_else(|| {
        Error::AuthorizationFailed(format!("{} is not valid UTF-8", path.display()))
    })?;
    Ok(format!("'{}'", text.replace('\'', r"'\''")))
}
