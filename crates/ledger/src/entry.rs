//! Ledger entry data structures

use qs_core::Fingerprint;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// One successful upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique ID (ULID for timestamp + uniqueness)
    pub id: Ulid,
    /// Job that produced the upload
    pub job_id: Ulid,
    /// Fingerprint of the uploaded snapshot
    pub fingerprint: Fingerprint,
    /// Completion time (Unix milliseconds)
    pub timestamp_ms: u64,
    /// Message sent with the artifact
    pub message: String,
    pub outcome: UploadRecord,
}

/// How the upload went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Attempts used, first try included
    pub attempts: u32,
    /// Size of the uploaded artifact
    pub artifact_bytes: u64,
}

impl LedgerEntry {
    pub fn new(
        job_id: Ulid,
        fingerprint: Fingerprint,
        timestamp_ms: u64,
        message: String,
        outcome: UploadRecord,
    ) -> Self {
        Self {
            id: Ulid::new(),
            job_id,
            fingerprint,
            timestamp_ms,
            message,
            outcome,
        }
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub(crate) fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
