// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::info;
use updraft::{
    Artifact, BundleInstaller, Diagnostic, InstallPhase, InstallRequest, InstallSource,
    InstallerConfig, ProgressSink, RelaunchCoordinator,
};

/// Spinner showing the current install phase
struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{prefix}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressSink for SpinnerProgress {
    fn phase(&self, phase: InstallPhase, message: &str) {
        self.bar.set_prefix(phase.to_string());
        self.bar.set_message(message.to_string());
        if phase.is_terminal() {
            self.bar.finish_and_clear();
        }
    }

    fn warning(&self, diagnostic: &Diagnostic) {
        self.bar.println(format!("warning: {}", diagnostic));
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = InstallerConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Install {
            artifact,
            destination,
            kind,
            size_hint,
            relaunch,
            json,
        } => {
            let mut request = InstallRequest::new(Artifact::with_kind(&artifact, kind));
            request.destination = destination;
            request.size_hint = size_hint;

            let installer = BundleInstaller::new(config.clone());
            let result = if json {
                installer.install(&request, &updraft::LogProgress::new("install"))
            } else {
                installer.install(&request, &SpinnerProgress::new())
            };

            let report = match result {
                Ok(report) => report,
                Err(e) if json => {
                    let failure = serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string(),
                        "retryable": e.is_retryable(),
                    });
                    println!("{}", serde_json::to_string_pretty(&failure)?);
                    std::process::exit(1);
                }
                Err(e) => return Err(e).context("Installation failed"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for warning in &report.warnings {
                    eprintln!("warning: {}", warning);
                }
                println!(
                    "Installed {} ({}) in {:.1?}",
                    report.installed_path.display(),
                    report.artifact_kind,
                    report.duration
                );
            }

            if relaunch {
                relaunch_bundle(&config, &report.installed_path, config.relaunch.delay())?;
            }
            Ok(())
        }
        Commands::Classify { artifact, kind } => {
            let artifact = Artifact::with_kind(&artifact, kind);
            println!("kind: {}", artifact.sniff());
            match artifact.classify()? {
                InstallSource::DiskImage => println!("install: mount disk image"),
                InstallSource::Archive(format) => {
                    println!("install: extract {:?} archive", format)
                }
            }
            Ok(())
        }
        Commands::Verify { bundle } => {
            config.layout.verify(&bundle)?;
            println!("{} is a valid bundle", bundle.display());
            Ok(())
        }
        Commands::Relaunch { bundle, delay_ms } => {
            let delay = delay_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.relaunch.delay());
            relaunch_bundle(&config, &bundle, delay)
        }
    }
}

fn relaunch_bundle(config: &InstallerConfig, bundle: &Path, delay: Duration) -> Result<()> {
    info!("Relaunching {}", bundle.display());
    let coordinator = RelaunchCoordinator::from_config(&config.relaunch, &config.tools);
    coordinator
        .relaunch(bundle, delay)
        .with_context(|| format!("Failed to relaunch {}", bundle.display()))?;
    Ok(())
}
