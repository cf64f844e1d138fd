//! Durable record of which files have been processed.
//!
//! Two human-readable JSON files live in the data directory:
//! `processed.json` and `failed.json`, each an object keyed by content
//! fingerprint. Deleting an entry by hand makes that one file eligible for
//! processing again.
//!
//! Every mutation rewrites the affected file through a temp file in the same
//! directory followed by an atomic rename, so a crash never leaves a torn
//! record behind. All mutations go through one async mutex, so concurrent
//! orchestrators sharing a `StateStore` are serialized.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{FileIdentity, ProcessingRecord, RecordOutcome, RecordStatus};

/// File holding Completed records
pub const PROCESSED_FILE: &str = "processed.json";

/// File holding Failed records
pub const FAILED_FILE: &str = "failed.json";

type RecordMap = BTreeMap<String, ProcessingRecord>;

/// Errors that can occur with the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Data directory {0} is locked by another process")]
    Locked(PathBuf),
}

/// Which part of the store a reset applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    Processed,
    Failed,
    All,
}

/// Store-wide counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub processed: usize,
    pub failed: usize,
}

impl StoreStats {
    pub fn total(&self) -> usize {
        self.processed + self.failed
    }
}

#[derive(Debug, Default)]
struct Ledger {
    processed: RecordMap,
    failed: RecordMap,
}

/// JSON-file backed processing state
pub struct StateStore {
    processed_path: PathBuf,
    failed_path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl StateStore {
    /// Open (or create) the store in `data_dir`
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir).await?;

        let processed_path = data_dir.join(PROCESSED_FILE);
        let failed_path = data_dir.join(FAILED_FILE);

        let ledger = Ledger {
            processed: load_records(&processed_path).await?,
            failed: load_records(&failed_path).await?,
        };

        debug!(
            processed = ledger.processed.len(),
            failed = ledger.failed.len(),
            dir = %data_dir.display(),
            "Opened state store"
        );

        Ok(Self {
            processed_path,
            failed_path,
            ledger: Mutex::new(ledger),
        })
    }

    /// Close the store. Every write is already durable; this only marks the
    /// end of the store's lifetime for a run.
    pub async fn close(self) -> StoreStats {
        let stats = self.stats().await;
        debug!(processed = stats.processed, failed = stats.failed, "Closed state store");
        stats
    }

    pub fn processed_path(&self) -> &Path {
        &self.processed_path
    }

    pub fn failed_path(&self) -> &Path {
        &self.failed_path
    }

    /// True iff a Completed record exists for this identity
    pub async fn is_done(&self, identity: &FileIdentity) -> bool {
        let ledger = self.ledger.lock().await;
        ledger
            .processed
            .get(&identity.fingerprint)
            .map(|r| r.status == RecordStatus::Completed)
            .unwrap_or(false)
    }

    /// Failed record for this identity, if any
    pub async fn failed_record(&self, identity: &FileIdentity) -> Option<ProcessingRecord> {
        let ledger = self.ledger.lock().await;
        ledger.failed.get(&identity.fingerprint).cloned()
    }

    /// Any record for this identity (Completed wins over Failed)
    pub async fn get(&self, identity: &FileIdentity) -> Option<ProcessingRecord> {
        let ledger = self.ledger.lock().await;
        ledger
            .processed
            .get(&identity.fingerprint)
            .or_else(|| ledger.failed.get(&identity.fingerprint))
            .cloned()
    }

    /// Upsert the terminal outcome for an identity. Durable on return.
    pub async fn record(
        &self,
        identity: &FileIdentity,
        outcome: RecordOutcome,
    ) -> Result<ProcessingRecord, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let key = identity.fingerprint.clone();

        let previous_attempts = ledger
            .processed
            .get(&key)
            .or_else(|| ledger.failed.get(&key))
            .map(|r| r.attempts)
            .unwrap_or(0);

        let record = ProcessingRecord::from_outcome(identity.clone(), outcome, previous_attempts);

        // Write the destination first: a crash between the two writes leaves
        // the identity in both files, and Completed takes precedence on read.
        let ledger = &mut *ledger;
        let (dest, dest_path, other, other_path) = match record.status {
            RecordStatus::Completed => (
                &mut ledger.processed,
                &self.processed_path,
                &mut ledger.failed,
                &self.failed_path,
            ),
            RecordStatus::Failed => (
                &mut ledger.failed,
                &self.failed_path,
                &mut ledger.processed,
                &self.processed_path,
            ),
        };

        commit(dest_path, dest, |map| map.insert(key.clone(), record.clone())).await?;
        if other.contains_key(&key) {
            commit(other_path, other, |map| map.remove(&key)).await?;
        }

        debug!(file = %identity, status = ?record.status, attempts = record.attempts, "Recorded outcome");
        Ok(record)
    }

    /// Remove every record for an identity. Returns true if anything was removed.
    pub async fn clear(&self, identity: &FileIdentity) -> Result<bool, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let key = &identity.fingerprint;
        let mut removed = false;

        if ledger.processed.contains_key(key) {
            commit(&self.processed_path, &mut ledger.processed, |map| map.remove(key)).await?;
            removed = true;
        }
        if ledger.failed.contains_key(key) {
            commit(&self.failed_path, &mut ledger.failed, |map| map.remove(key)).await?;
            removed = true;
        }

        if removed {
            info!(file = %identity, "Cleared record");
        }
        Ok(removed)
    }

    /// Remove all records, backing up both files first
    pub async fn clear_all(&self) -> Result<Vec<PathBuf>, StoreError> {
        self.reset(ResetScope::All).await
    }

    /// Empty part of the store. Non-empty files are copied to
    /// `<name>_backup_<unix-ts>.json` first (`_<n>` is appended if that name
    /// exists); the backup paths are returned.
    pub async fn reset(&self, scope: ResetScope) -> Result<Vec<PathBuf>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let mut backups = Vec::new();

        if matches!(scope, ResetScope::Processed | ResetScope::All) {
            if let Some(backup) = backup_file(&self.processed_path).await? {
                backups.push(backup);
            }
            commit(&self.processed_path, &mut ledger.processed, |map| map.clear()).await?;
        }

        if matches!(scope, ResetScope::Failed | ResetScope::All) {
            if let Some(backup) = backup_file(&self.failed_path).await? {
                backups.push(backup);
            }
            commit(&self.failed_path, &mut ledger.failed, |map| map.clear()).await?;
        }

        info!(?scope, backups = backups.len(), "Reset state store");
        Ok(backups)
    }

    /// Drop failed records recorded before `cutoff`. Returns the number removed.
    pub async fn prune_failed(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let removed = ledger
            .failed
            .values()
            .filter(|r| r.timestamp < cutoff)
            .count();

        if removed > 0 {
            commit(&self.failed_path, &mut ledger.failed, |map| {
                map.retain(|_, r| r.timestamp >= cutoff)
            })
            .await?;
            info!(removed, "Pruned old failed records");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> StoreStats {
        let ledger = self.ledger.lock().await;
        StoreStats {
            processed: ledger.processed.len(),
            failed: ledger.failed.len(),
        }
    }

    /// Completed records, oldest first
    pub async fn list_processed(&self) -> Vec<ProcessingRecord> {
        let ledger = self.ledger.lock().await;
        sorted_by_time(ledger.processed.values())
    }

    /// Failed records, oldest first
    pub async fn list_failed(&self) -> Vec<ProcessingRecord> {
        let ledger = self.ledger.lock().await;
        sorted_by_time(ledger.failed.values())
    }
}

fn sorted_by_time<'a>(records: impl Iterator<Item = &'a ProcessingRecord>) -> Vec<ProcessingRecord> {
    let mut out: Vec<ProcessingRecord> = records.cloned().collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    out
}

/// Load a record map; a missing or blank file is an empty map
async fn load_records(path: &Path) -> Result<RecordMap, StoreError> {
    if !path.exists() {
        return Ok(RecordMap::new());
    }

    let content = fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(RecordMap::new());
    }

    serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `change` to a copy of `current`, persist the copy, then swap it in.
/// A failed write leaves `current` matching what is on disk.
async fn commit<R>(
    path: &Path,
    current: &mut RecordMap,
    change: impl FnOnce(&mut RecordMap) -> R,
) -> Result<R, StoreError> {
    let mut next = current.clone();
    let result = change(&mut next);
    write_records(path, &next).await?;
    *current = next;
    Ok(result)
}

/// Replace `path` with the serialized map via temp file + fsync + rename
async fn write_records(path: &Path, records: &RecordMap) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(records)?;
    bytes.push(b'\n');
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

/// Copy a non-empty store file aside before it is emptied
async fn backup_file(path: &Path) -> Result<Option<PathBuf>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).await?;
    let trimmed = content.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(None);
    }
    if serde_json::from_str::<RecordMap>(trimmed).is_err() {
        warn!(path = %path.display(), "Backing up unreadable store file as-is");
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("store");
    let backup = backup_path(path, stem, Utc::now().timestamp());
    fs::copy(path, &backup).await?;
    info!(backup = %backup.display(), "Backed up store file");
    Ok(Some(backup))
}

/// `<stem>_backup_<ts>.json`, with `_<n>` appended when that name is taken
fn backup_path(path: &Path, stem: &str, timestamp: i64) -> PathBuf {
    let mut candidate = path.with_file_name(format!("{}_backup_{}.json", stem, timestamp));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{}_backup_{}_{}.json", stem, timestamp, n));
        n += 1;
    }
    candidate
}
