//! Patch applier
//!
//! Computes and applies the structural change for one service target:
//! flips the skip-verify setting, inserts the secure CA block(s) at the
//! declared anchors, and writes the result atomically. Re-application
//! is a no-op when the post-patch marker is already present.

use crate::backup::{BackupManager, BackupRecord};
use crate::errors::{RemedyError, Result};
use crate::targets::{Anchor, Insertion, ServiceTarget};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Result of one `apply` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchOutcome {
    pub target: String,
    /// Absolute artifact path, for staging in the commit phase.
    pub artifact: PathBuf,
    pub changed: bool,
    /// Present iff `changed` — a backup is taken before any mutation.
    pub backup: Option<BackupRecord>,
}

/// Apply a target's patch to its artifact under `repo_root`.
///
/// Idempotence contract: if the artifact already carries the
/// post-patch marker and lacks the insecure key, the file is not
/// touched and no backup is taken.
pub fn apply(
    repo_root: &Path,
    target: &ServiceTarget,
    backups: &mut BackupManager,
) -> Result<PatchOutcome> {
    let spec = target.patch.as_ref().ok_or_else(|| RemedyError::PatchApply {
        target: target.name.clone(),
        reason: "target is audit-only".to_string(),
    })?;

    let artifact = repo_root.join(&target.artifact);
    let content = fs::read_to_string(&artifact).map_err(|e| RemedyError::ArtifactUnreadable {
        path: artifact.clone(),
        reason: e.to_string(),
    })?;

    let already_secure = content.contains(&target.post_patch_marker);
    if already_secure && !content.contains(&spec.insecure_key) {
        tracing::info!(target = %target.name, "already patched, skipping");
        return Ok(PatchOutcome {
            target: target.name.clone(),
            artifact,
            changed: false,
            backup: None,
        });
    }

    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    rewrite_insecure_lines(&mut lines, &spec.insecure_key, spec.insecure_replacement.as_deref());

    // Secure blocks are only missing when the marker is absent.
    if !already_secure {
        for insertion in &spec.insertions {
            insert_block(&mut lines, insertion).map_err(|reason| RemedyError::PatchApply {
                target: target.name.clone(),
                reason,
            })?;
        }
    }

    let mut patched = lines.join("\n");
    if content.ends_with('\n') && !patched.ends_with('\n') {
        patched.push('\n');
    }

    if patched == content {
        return Ok(PatchOutcome {
            target: target.name.clone(),
            artifact,
            changed: false,
            backup: None,
        });
    }

    let backup = backups.snapshot(&artifact)?;
    atomic_write(&artifact, &patched)?;
    tracing::info!(target = %target.name, artifact = %artifact.display(), "patch applied");

    Ok(PatchOutcome {
        target: target.name.clone(),
        artifact,
        changed: true,
        backup: Some(backup),
    })
}

fn rewrite_insecure_lines(lines: &mut Vec<String>, key: &str, replacement: Option<&str>) {
    match replacement {
        Some(replacement) => {
            for line in lines.iter_mut() {
                if line.contains(key) {
                    *line = line.replace(key, replacement);
                }
            }
        }
        None => lines.retain(|line| !line.contains(key)),
    }
}

fn insert_block(lines: &mut Vec<String>, insertion: &Insertion) -> std::result::Result<(), String> {
    match &insertion.anchor {
        Anchor::DocumentEnd => {
            lines.extend(insertion.lines.iter().cloned());
            Ok(())
        }
        Anchor::AfterLine(needle) => {
            let idx = lines
                .iter()
                .position(|l| l.contains(needle.as_str()))
                .ok_or_else(|| format!("insertion point '{}' not found", needle))?;
            let indent: String = lines[idx]
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect();
            for (offset, line) in insertion.lines.iter().enumerate() {
                let rendered = if line.is_empty() {
                    String::new()
                } else {
                    format!("{}{}", indent, line)
                };
                lines.insert(idx + 1 + offset, rendered);
            }
            Ok(())
        }
    }
}

/// Write-temp-then-rename so a crash mid-write never leaves a
/// half-patched artifact.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", name));

    fs::write(&tmp, content).map_err(|e| RemedyError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        RemedyError::io(path, e)
    })
}
