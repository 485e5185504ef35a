//! CLI - command-line argument parsing
//!
//! Defines the clap structure; execution logic lives in `commands`.
//! Every flag has an environment-variable twin so unattended runs can
//! be configured without arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TLS-validation remediation for GitOps-managed services
#[derive(Parser)]
#[command(name = "trustmendctl")]
#[command(about = "Replace skip-verify settings with cluster root CA trust", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Root of the GitOps working tree
    #[arg(long, global = true, env = "TRUSTMEND_REPO_ROOT")]
    pub repo_root: Option<PathBuf>,

    /// Branch to push the remediation commit to
    #[arg(long, global = true, env = "TRUSTMEND_BRANCH")]
    pub branch: Option<String>,

    /// Answer yes at every confirmation gate
    #[arg(long, short = 'y', global = true, env = "TRUSTMEND_ASSUME_YES")]
    pub yes: bool,

    /// Restrict remediation to these services (comma separated)
    #[arg(long, global = true, value_delimiter = ',')]
    pub services: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full remediation pipeline
    Run {
        /// Audit only; never mutate, commit, or deploy
        #[arg(long, env = "TRUSTMEND_DRY_RUN")]
        dry_run: bool,
    },

    /// Audit current TLS validation status
    Check {
        /// Machine-readable output
        #[arg(long)]
        json: bool,
    },

    /// Verify deployed services: log scan plus endpoint probes
    Verify,

    /// Install the cluster root CA into the local trust store
    Trust,

    /// Restore artifacts from their most recent backups
    Rollback,
}
