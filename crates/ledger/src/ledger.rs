//! Bounded upload history

use crate::LedgerEntry;
use qs_core::Fingerprint;
use std::collections::VecDeque;

/// Successful uploads, oldest first, at most `retention` of them
///
/// Only appends and FIFO eviction modify it. The newest entry is the
/// baseline for duplicate detection.
#[derive(Debug, Clone)]
pub struct Ledger {
    entries: VecDeque<LedgerEntry>,
    retention: usize,
}

impl Ledger {
    /// Empty ledger; a retention of zero is treated as one
    pub fn new(retention: usize) -> Self {
        let retention = retention.max(1);
        Self {
            entries: VecDeque::with_capacity(retention.min(1024)),
            retention,
        }
    }

    /// True iff `fingerprint` equals the newest entry's
    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        self.entries
            .back()
            .map_or(false, |last| last.fingerprint == *fingerprint)
    }

    /// Append, evicting the oldest entries beyond retention
    pub fn append(&mut self, entry: LedgerEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.retention {
            self.entries.pop_front();
        }
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.back()
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LedgerEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retention(&self) -> usize {
        self.retention
    }
}
