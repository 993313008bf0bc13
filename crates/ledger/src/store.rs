//! Persistent ledger using sled

use crate::{Ledger, LedgerEntry};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

const ENTRIES_TREE: &str = "entries";
const META_TREE: &str = "meta";
const LAST_ACCEPTANCE_KEY: &[u8] = b"last_acceptance";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ledger database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode ledger entry: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

/// On-disk ledger rows plus the cooldown cell
///
/// Rows are keyed by a big-endian sequence number so sled iterates them in
/// append order. At most `retention` rows survive an append.
pub struct LedgerStore {
    db: Db,
    entries: Tree,
    meta: Tree,
    retention: usize,
    /// Next sequence number
    seq_counter: AtomicU64,
}

impl LedgerStore {
    /// Open or create the store at `<dir>/ledger.db`
    pub fn open(dir: &Path, retention: usize) -> Result<Self, StoreError> {
        let db = sled::open(dir.join("ledger.db"))?;
        let entries = db.open_tree(ENTRIES_TREE)?;
        let meta = db.open_tree(META_TREE)?;

        let next_seq = match entries.last()? {
            Some((key, _)) => decode_seq(&key)? + 1,
            None => 0,
        };

        debug!(dir = %dir.display(), rows = entries.len(), "ledger store opened");

        Ok(Self {
            db,
            entries,
            meta,
            retention: retention.max(1),
            seq_counter: AtomicU64::new(next_seq),
        })
    }

    /// Rebuild the in-memory ledger from the newest `retention` rows
    pub fn load(&self) -> Result<Ledger, StoreError> {
        let mut newest = Vec::with_capacity(self.retention.min(1024));
        for item in self.entries.iter().rev().take(self.retention) {
            let (key, value) = item?;
            match LedgerEntry::deserialize(&value) {
                Ok(entry) => newest.push(entry),
                Err(e) => {
                    // Older rows are still usable; a bad row must not lose the baseline
                    warn!(seq = decode_seq(&key).unwrap_or_default(), error = %e, "skipping unreadable ledger row");
                }
            }
        }

        let mut ledger = Ledger::new(self.retention);
        for entry in newest.into_iter().rev() {
            ledger.append(entry);
        }
        Ok(ledger)
    }

    /// Append an entry and prune rows beyond retention
    pub fn append(&self, entry: &LedgerEntry) -> Result<u64, StoreError> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(seq.to_be_bytes(), entry.serialize()?)?;
        self.prune()?;

        // Flush to ensure durability
        self.db.flush()?;
        Ok(seq)
    }

    /// Persist the time of the last accepted trigger
    pub fn record_acceptance(&self, timestamp_ms: u64) -> Result<(), StoreError> {
        self.meta
            .insert(LAST_ACCEPTANCE_KEY, timestamp_ms.to_be_bytes().to_vec())?;
        self.db.flush()?;
        Ok(())
    }

    pub fn last_acceptance(&self) -> Result<Option<u64>, StoreError> {
        match self.meta.get(LAST_ACCEPTANCE_KEY)? {
            Some(value) => Ok(Some(decode_seq(&value)?)),
            None => Ok(None),
        }
    }

    /// Number of stored rows
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    fn prune(&self) -> Result<(), StoreError> {
        let excess = self.entries.len().saturating_sub(self.retention);
        if excess == 0 {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for item in self.entries.iter().keys().take(excess) {
            batch.remove(item?);
        }
        self.entries.apply_batch(batch)?;

        debug!(removed = excess, "pruned ledger rows beyond retention");
        Ok(())
    }
}

fn decode_seq(bytes: &[u8]) -> Result<u64, StoreError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8-byte key, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UploadRecord;
    use qs_core::{FingerprintEngine, FingerprintPolicy};
    use tempfile::TempDir;
    use ulid::Ulid;

    fn entry(content: &[u8], ts: u64) -> LedgerEntry {
        LedgerEntry::new(
            Ulid::new(),
            FingerprintEngine::default().fingerprint_bytes(content),
            ts,
            format!("upload {}", ts),
            UploadRecord {
                attempts: 2,
                artifact_bytes: 10,
            },
        )
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = LedgerStore::open(dir.path(), 10).unwrap();
            store.append(&entry(b"A", 1)).unwrap();
            store.append(&entry(b"B", 2)).unwrap();
        }

        let store = LedgerStore::open(dir.path(), 10).unwrap();
        let ledger = store.load().unwrap();
        assert_eq!(ledger.len(), 2);

        let last = ledger.last().unwrap();
        assert_eq!(last.timestamp_ms, 2);
        assert_eq!(last.message, "upload 2");
        assert_eq!(last.outcome.attempts, 2);
        assert!(ledger.is_duplicate(&FingerprintEngine::default().fingerprint_bytes(b"B")));

        // Sequence continues after the last row
        assert_eq!(store.append(&entry(b"C", 3)).unwrap(), 2);
    }

    #[test]
    fn test_append_prunes_beyond_retention() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path(), 3).unwrap();
        for ts in 0..6u64 {
            store.append(&entry(&ts.to_le_bytes(), ts)).unwrap();
        }

        assert_eq!(store.count(), 3);
        let stamps: Vec<u64> = store.load().unwrap().entries().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![3, 4, 5]);
    }

    #[test]
    fn test_load_with_smaller_retention() {
        let dir = TempDir::new().unwrap();
        {
            let store = LedgerStore::open(dir.path(), 10).unwrap();
            for ts in 0..5u64 {
                store.append(&entry(&ts.to_le_bytes(), ts)).unwrap();
            }
        }

        let store = LedgerStore::open(dir.path(), 2).unwrap();
        let stamps: Vec<u64> = store.load().unwrap().entries().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![3, 4]);
    }

    #[test]
    fn test_acceptance_cell() {
        let dir = TempDir::new().unwrap();
        {
            let store = LedgerStore::open(dir.path(), 5).unwrap();
            assert_eq!(store.last_acceptance().unwrap(), None);
            store.record_acceptance(65_000).unwrap();
        }

        let store = LedgerStore::open(dir.path(), 5).unwrap();
        assert_eq!(store.last_acceptance().unwrap(), Some(65_000));
    }
}
