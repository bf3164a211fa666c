// src/bundle/mod.rs

//! Application bundles: the structural contract, discovery, and verification
//!
//! A bundle is a directory named `<Name>.<extension>` that contains a
//! metadata file and an executable-container subdirectory (on macOS:
//! `Contents/Info.plist` and `Contents/MacOS`). Bundles are discovered inside
//! scratch resources, never constructed.
//!
//! Discovery rules:
//! - hidden entries are skipped, symlinks are never followed or accepted
//! - a candidate must satisfy the structural contract, not just the name
//! - the search never descends into a bundle
//! - a name matching the destination wins, then the shallowest, then lexical order

mod replace;

pub use replace::{copy_tree, replace_bundle};
pub(crate) use replace::{make_removable, sibling};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Structural contract a directory must satisfy to be installable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleLayout {
    /// Directory extension identifying bundle candidates (without the dot)
    pub extension: String,
    /// Metadata file, relative to the bundle root
    pub metadata_file: PathBuf,
    /// Executable-container subdirectory, relative to the bundle root
    pub executable_dir: PathBuf,
}

impl Default for BundleLayout {
    fn default() -> Self {
        Self {
            extension: "app".to_string(),
            metadata_file: PathBuf::from("Contents/Info.plist"),
            executable_dir: PathBuf::from("Contents/MacOS"),
        }
    }
}

/// A located bundle inside a scratch resource
///
/// Only valid while the mount or scratch directory that produced it is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallableBundle {
    path: PathBuf,
}

impl InstallableBundle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&OsStr> {
        self.path.file_name()
    }
}

impl BundleLayout {
    /// Whether the path carries the bundle extension
    pub fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Whether `path` is a directory satisfying the structural contract
    pub fn qualifies(&self, path: &Path) -> bool {
        self.check(path).is_ok()
    }

    /// Verify an installed bundle
    ///
    /// Fails with `VerificationFailed` naming the first missing piece.
    pub fn verify(&self, path: &Path) -> Result<()> {
        self.check(path).map_err(Error::VerificationFailed)
    }

    fn check(&self, path: &Path) -> std::result::Result<(), String> {
        if !path.is_dir() {
            return Err(format!("{} is not a directory", path.display()));
        }
        let executable_dir = path.join(&self.executable_dir);
        if !executable_dir.is_dir() {
            return Err(format!(
                "{} is missing {}",
                path.display(),
                self.executable_dir.display()
            ));
        }
        let metadata = path.join(&self.metadata_file);
        if !metadata.is_file() {
            return Err(format!(
                "{} is missing {}",
                path.display(),
                self.metadata_file.display()
            ));
        }
        Ok(())
    }

    /// Find the best bundle under `root`, searching at most `max_depth` levels
    ///
    /// Depth 1 is the top level of `root`.
    pub fn locate(
        &self,
        root: &Path,
        max_depth: usize,
        preferred_name: Option<&OsStr>,
    ) -> Option<InstallableBundle> {
        let mut walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        let mut best: Option<(usize, bool, PathBuf)> = None;

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            if is_hidden(entry.file_name()) {
                if is_dir {
                    walker.skip_current_dir();
                }
                continue;
            }
            if !is_dir || !self.has_extension(entry.path()) {
                continue;
            }

            // Never look inside a bundle, qualifying or not
            walker.skip_current_dir();

            if !self.qualifies(entry.path()) {
                debug!(
                    "Rejecting {}: does not satisfy the bundle layout",
                    entry.path().display()
                );
                continue;
            }

            let preferred = preferred_name.is_some_and(|name| entry.file_name() == name);
            let better = match &best {
                None => true,
                Some((depth, was_preferred, _)) => {
                    (preferred && !was_preferred)
                        || (preferred == *was_preferred && entry.depth() < *depth)
                }
            };
            if better {
                best = Some((entry.depth(), preferred, entry.path().to_path_buf()));
            }
        }

        best.map(|(_, _, path)| {
            debug!("Located bundle {}", path.display());
            InstallableBundle { path }
        })
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn make_bundle(path: &Path) {
        fs::create_dir_all(path.join("Contents/MacOS")).unwrap();
        fs::write(path.join("Contents/Info.plist"), "<plist/>").unwrap();
        fs::write(path.join("Contents/MacOS/app"), "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_verify_complete_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Foo.app");
        make_bundle(&bundle);

        let layout = BundleLayout::default();
        assert!(layout.verify(&bundle).is_ok());
    }

    #[test]
    fn test_verify_missing_pieces() {
        let temp = TempDir::new().unwrap();
        let layout = BundleLayout::default();

        let missing = temp.path().join("Gone.app");
        assert!(matches!(layout.verify(&missing), Err(Error::VerificationFailed(_))));

        let no_plist = temp.path().join("NoPlist.app");
        fs::create_dir_all(no_plist.join("Contents/MacOS")).unwrap();
        let err = layout.verify(&no_plist).unwrap_err();
        assert!(err.to_string().contains("Info.plist"));

        let no_exec = temp.path().join("NoExec.app");
        fs::create_dir_all(no_exec.join("Contents")).unwrap();
        fs::write(no_exec.join("Contents/Info.plist"), "").unwrap();
        let err = layout.verify(&no_exec).unwrap_err();
        assert!(err.to_string().contains("MacOS"));
    }

    #[test]
    fn test_locate_top_level() {
        let temp = TempDir::new().unwrap();
        make_bundle(&temp.path().join("Foo.app"));
        fs::write(temp.path().join("README"), "").unwrap();

        let found = BundleLayout::default().locate(temp.path(), 2, None).unwrap();
        assert_eq!(found.path(), temp.path().join("Foo.app"));
    }

    #[test]
    fn test_locate_prefers_name_over_depth() {
        let temp = TempDir::new().unwrap();
        make_bundle(&temp.path().join("Uninstaller.app"));
        make_bundle(&temp.path().join("Foo/Foo.app"));

        let layout = BundleLayout::default();
        let found = layout
            .locate(temp.path(), 2, Some(OsStr::new("Foo.app")))
            .unwrap();
        assert_eq!(found.path(), temp.path().join("Foo/Foo.app"));

        // Without a matching name the shallowest candidate still wins
        let found = layout
            .locate(temp.path(), 2, Some(OsStr::new("Bar.app")))
            .unwrap();
        assert_eq!(found.path(), temp.path().join("Uninstaller.app"));
    }

    #[test]
    fn test_locate_shallowest_then_lexical() {
        let temp = TempDir::new().unwrap();
        make_bundle(&temp.path().join("Nested/Deep.app"));
        make_bundle(&temp.path().join("Aaa.app"));
        make_bundle(&temp.path().join("Target.app"));

        let layout = BundleLayout::default();
        let found = layout.locate(temp.path(), 2, None).unwrap();
        assert_eq!(found.path(), temp.path().join("Aaa.app"));

        let found = layout
            .locate(temp.path(), 2, Some(OsStr::new("Target.app")))
            .unwrap();
        assert_eq!(found.path(), temp.path().join("Target.app"));
    }

    #[test]
    fn test_locate_respects_depth_limit() {
        let temp = TempDir::new().unwrap();
        make_bundle(&temp.path().join("a/b/Foo.app"));

        let layout = BundleLayout::default();
        assert!(layout.locate(temp.path(), 2, None).is_none());
        assert!(layout.locate(temp.path(), 3, None).is_some());
    }

    #[test]
    fn test_locate_rejects_name_only_matches() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("Fake.app/Contents")).unwrap();

        assert!(BundleLayout::default().locate(temp.path(), 4, None).is_none());
    }

    #[test]
    fn test_locate_skips_hidden_and_bundle_interiors() {
        let temp = TempDir::new().unwrap();
        make_bundle(&temp.path().join(".hidden/Secret.app"));
        make_bundle(&temp.path().join("Outer.app"));
        make_bundle(&temp.path().join("Outer.app/Contents/Helpers/Inner.app"));

        let found = BundleLayout::default().locate(temp.path(), 6, None).unwrap();
        assert_eq!(found.path(), temp.path().join("Outer.app"));

        fs::remove_dir_all(temp.path().join("Outer.app")).unwrap();
        assert!(BundleLayout::default().locate(temp.path(), 6, None).is_none());
    }

    #[test]
    fn test_locate_ignores_symlinks() {
        let temp = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        make_bundle(&elsewhere.path().join("Linked.app"));
        std::os::unix::fs::symlink(elsewhere.path(), temp.path().join("Applications")).unwrap();
        std::os::unix::fs::symlink(
            elsewhere.path().join("Linked.app"),
            temp.path().join("Linked.app"),
        )
        .unwrap();

        assert!(BundleLayout::default().locate(temp.path(), 3, None).is_none());
    }
}
