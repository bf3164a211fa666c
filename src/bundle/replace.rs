// src/bundle/replace.rs

//! Staged bundle replacement
//!
//! The destination is never written in place. The new bundle is copied to a
//! hidden sibling first, so the old bundle stays intact until the copy has
//! fully landed. The swap itself is two renames within one directory:
//!
//! ```text
//! copy   source          -> .Name.updraft-new-<id>
//! verify .Name...new
//! rename destination     -> .Name.updraft-old-<id>   (if present)
//! rename .Name...new     -> destination
//! remove .Name...old                                  (best-effort)
//! ```
//!
//! Any failure before the second rename, including a staged copy that does
//! not satisfy the bundle layout, leaves the destination untouched;
//! a failed second rename moves the old bundle back.

use super::BundleLayout;
use crate::error::{Error, Result};
use crate::progress::{Diagnostic, DiagnosticKind};
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Recursively copy a directory tree, preserving symlinks and permissions
pub fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    // Directory modes are applied last so read-only directories can still be filled
    let mut dir_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let dest = target.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            let mode = entry.metadata().map_err(io::Error::other)?.permissions();
            dir_modes.push((dest, mode));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }

    for (dir, mode) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, mode)?;
    }
    Ok(())
}

/// Hidden sibling path used during the swap
pub(crate) fn sibling(destination: &Path, tag: &str, id: &Uuid) -> Result<PathBuf> {
    let parent = destination.parent().ok_or_else(|| {
        Error::CopyFailed(format!("{} has no parent directory", destination.display()))
    })?;
    let name = destination.file_name().ok_or_else(|| {
        Error::CopyFailed(format!("{} has no file name", destination.display()))
    })?;
    Ok(parent.join(format!(
        ".{}.updraft-{}-{}",
        name.to_string_lossy(),
        tag,
        id.simple()
    )))
}

/// Make a tree writable by its owner so it can be deleted
pub(crate) fn make_removable(path: &Path) {
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_dir()
            && let Ok(meta) = entry.metadata()
        {
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o700);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            make_removable(path);
            fs::remove_dir_all(path)
        }
        Err(e) => Err(e),
    }
}

/// Replace `destination` with a copy of `source`
///
/// The staged copy must satisfy `layout` before the old bundle is moved
/// aside. Returns a warning diagnostic when the displaced old bundle could
/// not be deleted; the install itself still succeeded.
pub fn replace_bundle(
    source: &Path,
    destination: &Path,
    layout: &BundleLayout,
) -> Result<Option<Diagnostic>> {
    let id = Uuid::new_v4();
    let staged = sibling(destination, "new", &id)?;
    let displaced = sibling(destination, "old", &id)?;

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::CopyFailed(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    debug!("Staging {} at {}", source.display(), staged.display());
    if let Err(e) = copy_tree(source, &staged) {
        let _ = remove_tree(&staged);
        return Err(Error::CopyFailed(format!(
            "Failed to copy {} to {}: {}",
            source.display(),
            staged.display(),
            e
        )));
    }
    if let Err(e) = layout.verify(&staged) {
        let _ = remove_tree(&staged);
        return Err(Error::CopyFailed(format!(
            "Incomplete copy of {}: {}",
            source.display(),
            e
        )));
    }

    let had_previous = fs::symlink_metadata(destination).is_ok();
    if had_previous && let Err(e) = fs::rename(destination, &displaced) {
        let _ = remove_tree(&staged);
        return Err(Error::CopyFailed(format!(
            "Failed to move aside {}: {}",
            destination.display(),
            e
        )));
    }

    if let Err(e) = fs::rename(&staged, destination) {
        if had_previous && let Err(restore) = fs::rename(&displaced, destination) {
            warn!(
                "Failed to restore {} from {}: {}",
                destination.display(),
                displaced.display(),
                restore
            );
        }
        let _ = remove_tree(&staged);
        return Err(Error::CopyFailed(format!(
            "Failed to move new bundle into {}: {}",
            destination.display(),
            e
        )));
    }

    info!("Installed {} at {}", source.display(), destination.display());

    if !had_previous {
        return Ok(None);
    }
    match remove_tree(&displaced) {
        Ok(()) => Ok(None),
        Err(e) => {
            let diagnostic = Diagnostic::new(
                DiagnosticKind::StaleBundleRemains,
                format!(
                    "Previous bundle left at {}: {}",
                    displaced.display(),
                    e
                ),
            );
            warn!("{}", diagnostic);
            Ok(Some(diagnostic))
        }
    }
}
