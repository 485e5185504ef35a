//! State auditor
//!
//! Read-only pass over every registered artifact, classifying each
//! service as secure, insecure, or unreadable. An unreadable artifact
//! is recorded and the audit continues; the phase only fails when
//! every target is unreadable.

use crate::targets::ServiceTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Per-service audit classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "detail")]
pub enum AuditState {
    /// Secure configuration markers present, insecure flag absent.
    Secure(String),
    /// The skip-verify flag is still set.
    Insecure(String),
    /// The artifact could not be read.
    Unreadable(String),
}

impl AuditState {
    pub fn is_secure(&self) -> bool {
        matches!(self, AuditState::Secure(_))
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, AuditState::Unreadable(_))
    }
}

/// One service's audit result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditFinding {
    pub service: String,
    pub artifact: String,
    pub state: AuditState,
}

/// Classify one artifact against its target's markers.
pub fn audit_target(repo_root: &Path, target: &ServiceTarget) -> AuditFinding {
    let path = repo_root.join(&target.artifact);
    let state = match fs::read_to_string(&path) {
        Ok(content) => classify(target, &content),
        Err(e) => AuditState::Unreadable(format!("{}: {}", path.display(), e)),
    };

    AuditFinding {
        service: target.name.clone(),
        artifact: target.artifact.display().to_string(),
        state,
    }
}

/// Audit every target. Never fails; the orchestrator inspects the
/// findings to decide whether the phase failed.
pub fn audit_all(repo_root: &Path, targets: &[ServiceTarget]) -> Vec<AuditFinding> {
    targets.iter().map(|t| audit_target(repo_root, t)).collect()
}

/// True when every finding is unreadable — the only audit outcome
/// that fails the phase.
pub fn all_unreadable(findings: &[AuditFinding]) -> bool {
    !findings.is_empty() && findings.iter().all(|f| f.state.is_unreadable())
}

fn classify(target: &ServiceTarget, content: &str) -> AuditState {
    if content.contains(&target.insecure_marker) {
        return AuditState::Insecure(format!("{} present (INSECURE)", target.insecure_marker));
    }
    if content.contains(&target.post_patch_marker) {
        return AuditState::Secure("proper CA trust configured".to_string());
    }
    // Neither marker: treat as insecure so the drift gets looked at
    // instead of silently passing.
    AuditState::Insecure("no explicit TLS configuration found".to_string())
}
