// src/lib.rs

//! Updraft: update installation for desktop application bundles
//!
//! Takes a downloaded update artifact and puts the bundle inside it where the
//! running application lives.
//!
//! # Architecture
//!
//! - Artifacts: classified by declared kind, extension, then magic bytes
//! - Scratch resources: a mounted disk image or an extraction directory,
//!   owned by one session and released exactly once
//! - Staged replacement: the destination is always fully old or fully new
//! - Elevation: one prompt per privileged copy, denial distinct from failure
//! - Sessions: one at a time, cancellable until copying starts
//! - Relaunch: a detached launcher opens the new bundle after we exit

pub mod archive;
pub mod artifact;
pub mod bundle;
pub mod config;
pub mod diskimage;
mod error;
pub mod installer;
pub mod privilege;
pub mod process;
pub mod progress;
pub mod quarantine;
pub mod relaunch;
pub mod scratch;

pub use artifact::{ArchiveFormat, Artifact, ArtifactKind, InstallSource};
pub use bundle::{BundleLayout, InstallableBundle};
pub use config::{ConfigError, InstallerConfig};
pub use error::{BundleOrigin, Error, ErrorCategory, Result};
pub use installer::{
    BundleInstaller, InstallHandle, InstallPhase, InstallReport, InstallRequest, SessionControl,
};
pub use process::CancelToken;
pub use progress::{
    CallbackProgress, ChannelProgress, Diagnostic, DiagnosticKind, LogProgress, ProgressEvent,
    ProgressSink, SilentProgress,
};
pub use relaunch::{RelaunchCoordinator, RelaunchError};
