//! Error taxonomy for the remediation pipeline
//!
//! Every component returns a typed outcome; nothing in this crate
//! terminates the process. Only the orchestrator decides whether an
//! error escalates to run termination, and the CLI maps the final
//! run state to an exit code.

use std::path::PathBuf;
use thiserror::Error;

/// All failure modes the pipeline distinguishes.
#[derive(Debug, Error)]
pub enum RemedyError {
    /// A required tool, path, or secret is absent before any mutation.
    /// Fatal in phase 0; maps to exit code 1.
    #[error("prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    /// One service's configuration artifact could not be read.
    /// Non-fatal per target; the audit fails only if every target
    /// is unreadable.
    #[error("artifact unreadable: {path}: {reason}")]
    ArtifactUnreadable { path: PathBuf, reason: String },

    /// A backup could not be written. Fatal: mutation without a
    /// backup is disallowed.
    #[error("backup write failed for {path}: {reason}")]
    BackupWrite { path: PathBuf, reason: String },

    /// A restore was requested but the backup file no longer exists.
    #[error("backup missing: {0}")]
    BackupMissing(PathBuf),

    /// The artifact's shape has drifted from what the patch expects.
    /// Fatal: must not be silently skipped.
    #[error("patch failed for {target}: {reason}")]
    PatchApply { target: String, reason: String },

    /// `git commit` failed (signing misconfiguration, conflicting
    /// history). Fatal.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// The remote rejected the push (history advanced). Fatal; the
    /// pipeline never force-pushes.
    #[error("push rejected: {0}")]
    PushRejected(String),

    /// A rollout did not reach ready within its timeout. Fatal for
    /// the deploy phase; other apps still report their status.
    #[error("rollout timed out for {app} after {elapsed_ms}ms")]
    RolloutTimeout { app: String, elapsed_ms: u64 },

    /// Local trust-store installation failed. Warning level: the
    /// service-side fix is already committed and deployed.
    #[error("trust install failed: {0}")]
    TrustInstall(String),

    /// Filesystem error outside the categories above.
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemedyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, RemedyError>;
