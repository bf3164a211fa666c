// src/error.rs

//! Error taxonomy for the installation pipeline
//!
//! Every stage of an install returns one of these variants. Callers map them
//! to user-facing text; this crate only supplies the typed signal.
//!
//! Advisory failures (unmount, scratch cleanup, quarantine strip) are never
//! errors. They surface as [`crate::progress::Diagnostic`] warnings instead.

use std::fmt;
use thiserror::Error;

/// Where a bundle search was performed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOrigin {
    /// Mounted disk-image volume
    DiskImage,
    /// Extracted archive scratch directory
    Archive,
}

impl fmt::Display for BundleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiskImage => write!(f, "disk image"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Failure kinds, used to decide how a caller recovers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Artifact type the pipeline refuses to handle
    Unsupported,
    /// Mount, extraction, or bundle discovery failed
    ResourceAcquisition,
    /// Elevation was denied or could not be performed
    Authorization,
    /// Bytes were written but the result is not a valid bundle, or the copy failed
    Integrity,
    /// The session was cancelled before copying began
    Cancellation,
}

/// Errors surfaced by [`crate::BundleInstaller::install`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Artifact is a flat installer package or could not be classified
    #[error("Unsupported artifact type: {0}")]
    UnsupportedType(String),

    /// No destination was supplied and the running bundle could not be found
    #[error("Install destination unavailable: {0}")]
    DestinationUnavailable(String),

    /// The disk-image attach tool failed or reported no mount point
    #[error("Failed to mount disk image: {0}")]
    MountFailed(String),

    /// The archive tool exited non-zero
    #[error("Failed to extract archive: {0}")]
    ExtractionFailed(String),

    /// No structurally valid bundle was found on the volume or in the archive
    #[error("No installable bundle found in {origin}: {detail}")]
    BundleNotFound { origin: BundleOrigin, detail: String },

    /// Copying the bundle into place failed
    #[error("Failed to copy bundle into place: {0}")]
    CopyFailed(String),

    /// The user dismissed the elevation prompt
    #[error("Authorization denied by user")]
    AuthorizationDenied,

    /// Elevation could not be obtained or the privileged copy failed
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// The installed bundle does not satisfy the bundle contract
    #[error("Installed bundle failed verification: {0}")]
    VerificationFailed(String),

    /// The session was cancelled before copying began
    #[error("Installation cancelled")]
    Cancelled,
}

impl Error {
    /// Classify the error for recovery decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedType(_) | Self::DestinationUnavailable(_) => {
                ErrorCategory::Unsupported
            }
            Self::MountFailed(_) | Self::ExtractionFailed(_) | Self::BundleNotFound { .. } => {
                ErrorCategory::ResourceAcquisition
            }
            Self::AuthorizationDenied | Self::AuthorizationFailed(_) => {
                ErrorCategory::Authorization
            }
            Self::CopyFailed(_) | Self::VerificationFailed(_) => ErrorCategory::Integrity,
            Self::Cancelled => ErrorCategory::Cancellation,
        }
    }

    /// True when re-prompting on user action may succeed
    ///
    /// Only a denied elevation prompt qualifies. Authorization failures are
    /// never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AuthorizationDenied)
    }

    /// Short stable identifier, used in machine-readable output
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedType(_) => "unsupported-type",
            Self::DestinationUnavailable(_) => "destination-unavailable",
            Self::MountFailed(_) => "mount-failed",
            Self::ExtractionFailed(_) => "extraction-failed",
            Self::BundleNotFound { .. } => "bundle-not-found",
            Self::CopyFailed(_) => "copy-failed",
            Self::AuthorizationDenied => "authorization-denied",
            Self::AuthorizationFailed(_) => "authorization-failed",
            Self::VerificationFailed(_) => "verification-failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
