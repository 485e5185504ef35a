//! trustmendctl - TLS-validation remediation CLI
//!
//! Detects skip-verify settings across managed services, patches the
//! GitOps artifacts, commits and syncs the change, and verifies the
//! result. Exit codes: 0 success, 1 prerequisite failure, 2 phase
//! failure, 3 aborted at a confirmation gate, 4 trust-install warning.

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;
use trustmend_common::config::RunConfig;

fn build_config(cli: &Cli, dry_run: bool) -> RunConfig {
    let mut config = RunConfig::from_env();
    if let Some(root) = &cli.repo_root {
        config.repo_root = root.clone();
    }
    if let Some(branch) = &cli.branch {
        config.target_branch = branch.clone();
    }
    if cli.yes {
        config.assume_yes = true;
    }
    if !cli.services.is_empty() {
        config.service_allowlist = cli.services.clone();
    }
    if dry_run {
        config.dry_run = true;
    }
    config
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TRUSTMEND_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match &cli.command {
        Commands::Run { dry_run } => {
            let config = build_config(&cli, *dry_run);
            commands::run(config).await
        }
        Commands::Check { json } => {
            let config = build_config(&cli, true);
            commands::check(config, *json)
        }
        Commands::Verify => {
            let config = build_config(&cli, false);
            commands::verify(config).await
        }
        Commands::Trust => {
            let config = build_config(&cli, false);
            commands::trust_install(config)
        }
        Commands::Rollback => {
            let config = build_config(&cli, false);
            commands::rollback(config)
        }
    };

    std::process::exit(exit_code);
}
