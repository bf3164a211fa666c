// src/cli.rs
//! CLI definitions for updraft
//!
//! This module contains the command-line interface definitions using clap.
//! The command implementations live in `main.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use updraft::ArtifactKind;

#[derive(Parser)]
#[command(name = "updraft")]
#[command(version)]
#[command(about = "Install application bundle updates from disk images and archives", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/updraft/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the bundle contained in an update artifact
    Install {
        /// Path to the disk image or archive
        artifact: PathBuf,

        /// Bundle to replace (default: the bundle containing this executable)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Declared artifact kind: disk-image, archive, package, unknown
        #[arg(short, long, default_value = "unknown")]
        kind: ArtifactKind,

        /// Expected installed size in bytes, used for a free-space warning
        #[arg(long)]
        size_hint: Option<u64>,

        /// Relaunch the installed bundle and exit
        #[arg(long)]
        relaunch: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how an artifact would be installed
    Classify {
        /// Path to the artifact
        artifact: PathBuf,

        /// Declared artifact kind
        #[arg(short, long, default_value = "unknown")]
        kind: ArtifactKind,
    },

    /// Check that a directory satisfies the bundle layout
    Verify {
        /// Path to the bundle
        bundle: PathBuf,
    },

    /// Launch a bundle after a delay from a detached process, then exit
    Relaunch {
        /// Path to the bundle
        bundle: PathBuf,

        /// Delay before launching (default from config)
        #[arg(long)]
        delay_ms: Option<u64>,
    },
}
