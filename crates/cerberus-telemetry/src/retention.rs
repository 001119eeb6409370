//! Retention policy enforcement for the daemon's JSONL event log directory.
//!
//! Grounded on teacher `pt-telemetry/src/retention.rs`'s principles (no
//! silent deletions — every prune is logged before the file disappears; a
//! dry-run mode for previewing pruning actions) applied to a single
//! day-rotated log directory instead of six partitioned Parquet tables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How long to keep event log files, and how much disk they may occupy.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub max_bytes: u64,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, max_bytes: u64) -> Self {
        RetentionPolicy { max_age_days, max_bytes }
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days as u64 * 86400)
    }
}

/// A file that retention enforcement pruned or would prune.
#[derive(Debug, Clone)]
pub struct PrunedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub reason: PruneReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneReason {
    AgeExceeded,
    BudgetExceeded,
}

struct Candidate {
    path: PathBuf,
    size_bytes: u64,
    modified: SystemTime,
}

/// Scans a log directory and removes files that violate `policy`.
pub fn enforce(dir: &Path, policy: &RetentionPolicy, dry_run: bool) -> Result<Vec<PrunedFile>, RetentionError> {
    let mut candidates = scan(dir)?;
    let mut pruned = Vec::new();

    let now = SystemTime::now();
    let max_age = policy.max_age();

    candidates.retain(|c| {
        let age = now.duration_since(c.modified).unwrap_or_default();
        if age > max_age {
            pruned.push(PrunedFile {
                path: c.path.clone(),
                size_bytes: c.size_bytes,
                reason: PruneReason::AgeExceeded,
            });
            false
        } else {
            true
        }
    });

    let mut total_bytes: u64 = candidates.iter().map(|c| c.size_bytes).sum();
    if total_bytes > policy.max_bytes {
        // Oldest files first, matching the original's "never silently lose
        // the newest data" preference.
        candidates.sort_by_key(|c| c.modified);
        for c in candidates {
            if total_bytes <= policy.max_bytes {
                break;
            }
            total_bytes = total_bytes.saturating_sub(c.size_bytes);
            pruned.push(PrunedFile {
                path: c.path,
                size_bytes: c.size_bytes,
                reason: PruneReason::BudgetExceeded,
            });
        }
    }

    for file in &pruned {
        if dry_run {
            info!(
                "[dry-run] would prune {} ({} bytes): {:?}",
                file.path.display(),
                file.size_bytes,
                file.reason
            );
        } else {
            info!(
                "pruning {} ({} bytes): {:?}",
                file.path.display(),
                file.size_bytes,
                file.reason
            );
            fs::remove_file(&file.path)?;
        }
    }

    Ok(pruned)
}

fn scan(dir: &Path) -> Result<Vec<Candidate>, RetentionError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            let metadata = entry.metadata()?;
            candidates.push(Candidate {
                path,
                size_bytes: metadata.len(),
                modified: metadata.modified()?,
            });
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(path: &Path, bytes: usize, age_days: u64) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(&vec![0u8; bytes]).unwrap();
        drop(file);
        let mtime = SystemTime::now() - Duration::from_secs(age_days * 86400);
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)).unwrap();
    }

    #[test]
    fn old_file_is_pruned_by_age() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("cerberus-2020-01-01.jsonl");
        write_file(&old, 100, 400);

        let policy = RetentionPolicy::new(30, u64::MAX);
        let pruned = enforce(dir.path(), &policy, false).unwrap();

        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].reason, PruneReason::AgeExceeded);
        assert!(!old.exists());
    }

    #[test]
    fn recent_file_is_kept() {
        let dir = tempdir().unwrap();
        let fresh = dir.path().join("cerberus-today.jsonl");
        write_file(&fresh, 100, 1);

        let policy = RetentionPolicy::new(30, u64::MAX);
        let pruned = enforce(dir.path(), &policy, false).unwrap();

        assert!(pruned.is_empty());
        assert!(fresh.exists());
    }

    #[test]
    fn dry_run_does_not_delete() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("cerberus-old.jsonl");
        write_file(&old, 100, 400);

        let policy = RetentionPolicy::new(30, u64::MAX);
        let pruned = enforce(dir.path(), &policy, true).unwrap();

        assert_eq!(pruned.len(), 1);
        assert!(old.exists());
    }

    #[test]
    fn budget_prunes_oldest_first() {
        let dir = tempdir().unwrap();
        let older = dir.path().join("cerberus-a.jsonl");
        let newer = dir.path().join("cerberus-b.jsonl");
        write_file(&older, 1024, 5);
        write_file(&newer, 1024, 2);

        let policy = RetentionPolicy::new(365, 1024);
        let pruned = enforce(dir.path(), &policy, false).unwrap();

        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].path, older);
        assert!(newer.exists());
    }
}
