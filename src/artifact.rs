// src/artifact.rs

//! Downloaded update artifacts and their classification
//!
//! An artifact arrives with a declared kind (from release metadata) which may
//! be `Unknown`. Classification trusts a declared kind, otherwise sniffs the
//! file extension and then magic bytes. Nothing here mounts, extracts, or
//! writes; an unsupported artifact is rejected before any side effect.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Length of the UDIF trailer at the end of a disk image
const UDIF_TRAILER_LEN: u64 = 512;

/// Declared or sniffed artifact type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    DiskImage,
    Archive,
    /// Flat installer package; never installed by this pipeline
    Package,
    Unknown,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DiskImage => "disk-image",
            Self::Archive => "archive",
            Self::Package => "package",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disk-image" | "dmg" => Ok(Self::DiskImage),
            "archive" | "zip" | "tar" => Ok(Self::Archive),
            "package" | "pkg" => Ok(Self::Package),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown artifact kind: {}", other)),
        }
    }
}

/// Archive container format, which decides the extraction tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    Zip,
    /// Tarball, plain or compressed (gzip, bzip2, xz)
    Tar,
}

impl ArchiveFormat {
    /// Detect from file name
    pub fn from_extension(path: &Path) -> Option<Self> {
        let name = lowercase_name(path)?;
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if [
            ".tar", ".tar.gz", ".tgz", ".tar.bz2", ".tbz", ".tbz2", ".tar.xz", ".txz",
        ]
        .iter()
        .any(|ext| name.ends_with(ext))
        {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect from the first bytes of the file
    ///
    /// Magic bytes:
    /// - Zip: `50 4b 03 04`
    /// - Gzip: `1f 8b`
    /// - Bzip2: `42 5a 68` ("BZh")
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - POSIX tar: "ustar" at offset 257
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.starts_with(b"PK\x03\x04") {
            Some(Self::Zip)
        } else if data.starts_with(&[0x1f, 0x8b])
            || data.starts_with(b"BZh")
            || data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
            || data.get(257..262) == Some(b"ustar".as_slice())
        {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect by extension, falling back to magic bytes
    pub fn detect(path: &Path) -> Option<Self> {
        Self::from_extension(path).or_else(|| {
            read_header(path)
                .ok()
                .and_then(|header| Self::from_magic_bytes(&header))
        })
    }
}

/// An immutable reference to a downloaded update file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    declared: ArtifactKind,
}

impl Artifact {
    /// Artifact with no declared kind; classification will sniff it
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            declared: ArtifactKind::Unknown,
        }
    }

    /// Artifact whose kind was declared by release metadata
    pub fn with_kind(path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            declared: kind,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declared_kind(&self) -> ArtifactKind {
        self.declared
    }

    /// Resolve the artifact kind without touching anything but its header
    pub fn sniff(&self) -> ArtifactKind {
        if self.declared != ArtifactKind::Unknown {
            return self.declared;
        }
        let kind = sniff_path(&self.path);
        debug!("Sniffed {} as {}", self.path.display(), kind);
        kind
    }

    /// Classify for installation
    ///
    /// Packages and unrecognised files fail with `UnsupportedType`; archives
    /// additionally need a recognisable container format.
    pub fn classify(&self) -> Result<InstallSource> {
        match self.sniff() {
            ArtifactKind::DiskImage => Ok(InstallSource::DiskImage),
            ArtifactKind::Archive => ArchiveFormat::detect(&self.path)
                .map(InstallSource::Archive)
                .ok_or_else(|| {
                    Error::UnsupportedType(format!(
                        "{}: unrecognised archive format",
                        self.path.display()
                    ))
                }),
            ArtifactKind::Package => Err(Error::UnsupportedType(format!(
                "{}: installer packages require a different installer",
                self.path.display()
            ))),
            ArtifactKind::Unknown => Err(Error::UnsupportedType(format!(
                "{}: unable to determine artifact type",
                self.path.display()
            ))),
        }
    }
}

/// How an installable bundle is obtained from a classified artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSource {
    DiskImage,
    Archive(ArchiveFormat),
}

impl InstallSource {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::DiskImage => ArtifactKind::DiskImage,
            Self::Archive(_) => ArtifactKind::Archive,
        }
    }
}

fn lowercase_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_ascii_lowercase)
}

fn sniff_path(path: &Path) -> ArtifactKind {
    if let Some(name) = lowercase_name(path) {
        if name.ends_with(".dmg") {
            return ArtifactKind::DiskImage;
        }
        if name.ends_with(".pkg") || name.ends_with(".mpkg") {
            return ArtifactKind::Package;
        }
    }
    if ArchiveFormat::from_extension(path).is_some() {
        return ArtifactKind::Archive;
    }

    let Ok(header) = read_header(path) else {
        return ArtifactKind::Unknown;
    };
    if header.starts_with(b"xar!") {
        return ArtifactKind::Package;
    }
    if ArchiveFormat::from_magic_bytes(&header).is_some() {
        return ArtifactKind::Archive;
    }
    if has_udif_trailer(path) {
        return ArtifactKind::DiskImage;
    }
    ArtifactKind::Unknown
}

/// Read up to the first 512 bytes of a file
fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut header = Vec::with_capacity(512);
    file.take(512).read_to_end(&mut header)?;
    Ok(header)
}

/// UDIF disk images end with a 512-byte trailer starting with "koly"
fn has_udif_trailer(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let Ok(len) = file.metadata().map(|m| m.len()) else {
        return false;
    };
    if len < UDIF_TRAILER_LEN || file.seek(SeekFrom::Start(len - UDIF_TRAILER_LEN)).is_err() {
        return false;
    }
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).is_ok() && &magic == b"koly"
}
