//! Version-control committer
//!
//! Stages exactly the changed artifact paths, commits with a
//! structured remediation message, and pushes to the configured
//! branch. Never stages unrelated local edits and never force-pushes.

use crate::errors::{RemedyError, Result};
use crate::exec::CommandRunner;
use std::path::{Path, PathBuf};

/// What the commit phase did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Commit created and pushed.
    Committed { message: String },
    /// Nothing was staged; no empty commit is produced.
    NothingToCommit,
}

/// Structured message identifying the remediation category.
pub fn commit_message(services: &[String], artifacts: &[PathBuf]) -> String {
    let mut message = format!(
        "fix(security): enforce TLS certificate validation ({})\n\n\
         Replace skip-verify settings with cluster root CA trust.\n\nArtifacts:\n",
        services.join(", ")
    );
    for artifact in artifacts {
        message.push_str(&format!("  - {}\n", artifact.display()));
    }
    message
}

/// Stage `paths`, commit, and push to `origin/<branch>`.
///
/// Returns `NothingToCommit` when the paths carry no staged diff,
/// which the orchestrator reports as skipped-idempotent.
pub fn commit_and_push(
    runner: &dyn CommandRunner,
    repo_root: &Path,
    paths: &[PathBuf],
    services: &[String],
    branch: &str,
) -> Result<CommitOutcome> {
    if paths.is_empty() {
        return Ok(CommitOutcome::NothingToCommit);
    }

    let root = repo_root.display().to_string();
    let mut add_args = vec!["-C", &root, "add", "--"];
    let rendered: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    add_args.extend(rendered.iter().map(String::as_str));

    let add = runner.run("git", &add_args);
    if !add.ok() {
        return Err(RemedyError::CommitFailed(format!(
            "git add: {}",
            add.complaint()
        )));
    }

    // Guard against a re-run where the files were already committed:
    // `diff --cached --quiet` exits 0 when nothing is staged.
    let mut diff_args = vec!["-C", &root, "diff", "--cached", "--quiet", "--"];
    diff_args.extend(rendered.iter().map(String::as_str));
    if runner.run("git", &diff_args).ok() {
        tracing::info!("no staged changes, skipping commit");
        return Ok(CommitOutcome::NothingToCommit);
    }

    let message = commit_message(services, paths);
    let commit = runner.run("git", &["-C", &root, "commit", "-m", &message]);
    if !commit.ok() {
        return Err(RemedyError::CommitFailed(commit.complaint().to_string()));
    }
    tracing::info!(branch, "commit created");

    let push = runner.run("git", &["-C", &root, "push", "origin", branch]);
    if !push.ok() {
        return Err(RemedyError::PushRejected(push.complaint().to_string()));
    }
    tracing::info!(branch, "pushed");

    Ok(CommitOutcome::Committed { message })
}
