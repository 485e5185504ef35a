//! Backup manager
//!
//! Snapshots an artifact to a sibling `.backup.<timestamp>` file before
//! any mutation and restores it on demand. A fresh backup is written
//! per run; prior backups are never overwritten. Each record carries
//! the SHA-256 of the original at snapshot time, verified on restore.

use crate::errors::{RemedyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_INFIX: &str = ".backup.";

/// Proof that an artifact was snapshotted before mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub created_utc: DateTime<Utc>,
    /// SHA-256 of the original content at snapshot time.
    pub sha256: String,
}

/// Owns the backups taken during one run.
#[derive(Debug, Default)]
pub struct BackupManager {
    records: Vec<BackupRecord>,
}

impl BackupManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `artifact` to a timestamped sibling path. Failing to write
    /// the backup is fatal to the run: mutation without a backup is
    /// disallowed.
    pub fn snapshot(&mut self, artifact: &Path) -> Result<BackupRecord> {
        let content = fs::read(artifact).map_err(|e| RemedyError::BackupWrite {
            path: artifact.to_path_buf(),
            reason: format!("cannot read original: {}", e),
        })?;

        let created_utc = Utc::now();
        let backup = backup_path(artifact, created_utc);
        fs::write(&backup, &content).map_err(|e| RemedyError::BackupWrite {
            path: backup.clone(),
            reason: e.to_string(),
        })?;

        let record = BackupRecord {
            original: artifact.to_path_buf(),
            backup,
            created_utc,
            sha256: sha256_hex(&content),
        };
        tracing::info!(original = %record.original.display(), backup = %record.backup.display(), "snapshot taken");
        self.records.push(record.clone());
        Ok(record)
    }

    /// Copy the backup back over the original. Verifies the backup
    /// still matches the checksum taken at snapshot time.
    pub fn restore(&self, record: &BackupRecord) -> Result<()> {
        let content = match fs::read(&record.backup) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RemedyError::BackupMissing(record.backup.clone()));
            }
            Err(e) => return Err(RemedyError::io(&record.backup, e)),
        };

        if sha256_hex(&content) != record.sha256 {
            return Err(RemedyError::BackupWrite {
                path: record.backup.clone(),
                reason: "backup content no longer matches its checksum".to_string(),
            });
        }

        fs::write(&record.original, &content)
            .map_err(|e| RemedyError::io(&record.original, e))?;
        tracing::info!(original = %record.original.display(), "restored from backup");
        Ok(())
    }

    /// Records taken so far this run, in order.
    pub fn records(&self) -> &[BackupRecord] {
        &self.records
    }
}

/// Most recent backup of `artifact` on disk, across runs. Timestamps
/// sort lexicographically, so the max file name is the latest.
pub fn latest_backup(artifact: &Path) -> Option<PathBuf> {
    let dir = artifact.parent()?;
    let prefix = format!("{}{}", artifact.file_name()?.to_str()?, BACKUP_INFIX);

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    candidates.sort();
    candidates.pop()
}

fn backup_path(artifact: &Path, stamp: DateTime<Utc>) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    artifact.with_file_name(format!(
        "{}{}{}",
        name,
        BACKUP_INFIX,
        stamp.format("%Y%m%dT%H%M%S%.3fZ")
    ))
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_then_restore_is_byte_identical() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "config:\n  key: value\n").unwrap();

        let mut manager = BackupManager::new();
        let record = manager.snapshot(&artifact).unwrap();

        fs::write(&artifact, "clobbered\n").unwrap();
        manager.restore(&record).unwrap();

        assert_eq!(fs::read_to_string(&artifact).unwrap(), "config:\n  key: value\n");
    }

    #[test]
    fn test_snapshot_preserves_prior_backups() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "v1\n").unwrap();

        let mut manager = BackupManager::new();
        let first = manager.snapshot(&artifact).unwrap();
        fs::write(&artifact, "v2\n").unwrap();
        let second = manager.snapshot(&artifact).unwrap();

        assert_ne!(first.backup, second.backup);
        assert_eq!(fs::read_to_string(&first.backup).unwrap(), "v1\n");
        assert_eq!(fs::read_to_string(&second.backup).unwrap(), "v2\n");
    }

    #[test]
    fn test_restore_missing_backup_is_typed() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "content\n").unwrap();

        let mut manager = BackupManager::new();
        let record = manager.snapshot(&artifact).unwrap();
        fs::remove_file(&record.backup).unwrap();

        match manager.restore(&record) {
            Err(RemedyError::BackupMissing(path)) => assert_eq!(path, record.backup),
            other => panic!("expected BackupMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_restore_rejects_tampered_backup() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "content\n").unwrap();

        let mut manager = BackupManager::new();
        let record = manager.snapshot(&artifact).unwrap();
        fs::write(&record.backup, "tampered\n").unwrap();

        assert!(manager.restore(&record).is_err());
    }

    #[test]
    fn test_snapshot_of_missing_artifact_fails() {
        let dir = tempdir().unwrap();
        let mut manager = BackupManager::new();
        let result = manager.snapshot(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(RemedyError::BackupWrite { .. })));
    }

    #[test]
    fn test_latest_backup_picks_newest() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "v1\n").unwrap();

        let older = dir.path().join("values.yaml.backup.20240101T000000.000Z");
        let newer = dir.path().join("values.yaml.backup.20250101T000000.000Z");
        fs::write(&older, "old").unwrap();
        fs::write(&newer, "new").unwrap();

        assert_eq!(latest_backup(&artifact), Some(newer));
    }

    #[test]
    fn test_latest_backup_none_without_backups() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("values.yaml");
        fs::write(&artifact, "v1\n").unwrap();
        assert_eq!(latest_backup(&artifact), None);
    }
}
