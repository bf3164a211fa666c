// src/config.rs

//! Installer configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a working configuration for the current platform.
//!
//! # Example config.toml
//!
//! ```toml
//! [layout]
//! extension = "app"
//! metadata_file = "Contents/Info.plist"
//! executable_dir = "Contents/MacOS"
//!
//! [search]
//! archive_max_depth = 4
//!
//! [scratch]
//! root = "/var/tmp/updraft"
//!
//! [tools]
//! hdiutil = "/usr/bin/hdiutil"
//!
//! [relaunch]
//! delay_ms = 1000
//! command = ["/usr/bin/open", "{bundle}"]
//! ```

use crate::bundle::BundleLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Placeholder substituted with the bundle path in the relaunch command
pub const BUNDLE_PLACEHOLDER: &str = "{bundle}";

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level installer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub layout: BundleLayout,
    pub search: SearchConfig,
    pub scratch: ScratchConfig,
    pub tools: ToolPaths,
    pub quarantine: QuarantineConfig,
    pub relaunch: RelaunchConfig,
}

/// Bundle discovery limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum directory depth searched inside an extracted archive
    pub archive_max_depth: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            archive_max_depth: 4,
        }
    }
}

/// Where extraction scratch directories are created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Parent for scratch directories; the system temp dir when unset
    pub root: Option<PathBuf>,
}

/// Paths of the external tools the pipeline invokes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub hdiutil: PathBuf,
    pub ditto: PathBuf,
    pub tar: PathBuf,
    pub unzip: PathBuf,
    pub xattr: PathBuf,
    pub osascript: PathBuf,
    pub pkexec: PathBuf,
    pub shell: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            hdiutil: PathBuf::from("/usr/bin/hdiutil"),
            ditto: PathBuf::from("/usr/bin/ditto"),
            tar: PathBuf::from("tar"),
            unzip: PathBuf::from("unzip"),
            xattr: PathBuf::from("/usr/bin/xattr"),
            osascript: PathBuf::from("/usr/bin/osascript"),
            pkexec: PathBuf::from("pkexec"),
            shell: PathBuf::from("/bin/sh"),
        }
    }
}

/// Quarantine stripping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Strip the attribute after install (only meaningful on macOS)
    pub enabled: bool,
    /// Extended attribute that carries the quarantine marking
    pub attribute: String,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(target_os = "macos"),
            attribute: "com.apple.quarantine".to_string(),
        }
    }
}

/// Relaunch behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaunchConfig {
    /// Delay before the detached launcher starts the new bundle
    pub delay_ms: u64,
    /// Launch command; `{bundle}` is replaced by the bundle path
    pub command: Vec<String>,
}

impl Default for RelaunchConfig {
    fn default() -> Self {
        let opener = if cfg!(target_os = "macos") {
            "/usr/bin/open"
        } else {
            "xdg-open"
        };
        Self {
            delay_ms: 1000,
            command: vec![opener.to_string(), BUNDLE_PLACEHOLDER.to_string()],
        }
    }
}

impl RelaunchConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl InstallerConfig {
    /// Default location: `$XDG_CONFIG_HOME/updraft/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("updraft").join("config.toml"))
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::parse(&content, path)
    }

    /// Load from `path` if given, else from the default path when it exists,
    /// else return defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.layout.extension.is_empty() {
            return Err(ConfigError::Invalid(
                "layout.extension must not be empty".to_string(),
            ));
        }
        if self.search.archive_max_depth == 0 {
            return Err(ConfigError::Invalid(
                "search.archive_max_depth must be at least 1".to_string(),
            ));
        }
        if self.relaunch.command.is_empty() {
            return Err(ConfigError::Invalid(
                "relaunch.command must name a program".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = InstallerConfig::parse("", Path::new("config.toml")).unwrap();
        assert_eq!(config.layout.extension, "app");
        assert_eq!(config.search.archive_max_depth, 4);
        assert_eq!(config.relaunch.delay(), Duration::from_secs(1));
        assert_eq!(config.quarantine.attribute, "com.apple.quarantine");
    }

    #[test]
    fn test_partial_override() {
        let content = r#"
[layout]
extension = "bundle"

[search]
archive_max_depth = 2

[tools]
tar = "/opt/bin/gtar"
"#;
        let config = InstallerConfig::parse(content, Path::new("config.toml")).unwrap();
        assert_eq!(config.layout.extension, "bundle");
        assert_eq!(config.layout.metadata_file, PathBuf::from("Contents/Info.plist"));
        assert_eq!(config.search.archive_max_depth, 2);
        assert_eq!(config.tools.tar, PathBuf::from("/opt/bin/gtar"));
        assert_eq!(config.tools.hdiutil, PathBuf::from("/usr/bin/hdiutil"));
    }

    #[test]
    fn test_rejects_zero_depth() {
        let err = InstallerConfig::parse("[search]\narchive_max_depth = 0\n", Path::new("c.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = InstallerConfig::parse("[layout\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[relaunch]\ndelay_ms = 250\n").unwrap();

        let config = InstallerConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.relaunch.delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_load_missing_file() {
        let err = InstallerConfig::load(Path::new("/nonexistent/updraft.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
