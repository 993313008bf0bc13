//! Per-path debouncing
//!
//! A save produces a burst of events (temp write, rename, backup rotation).
//! Each path fires once, after its events have been quiet for `delay`.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer<K = PathBuf> {
    delay: Duration,
    /// Key -> deadline
    pending: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Debouncer<K> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Note an event; pushes the key's deadline out to `now + delay`
    pub fn record(&mut self, key: K, now: Instant) {
        self.pending.insert(key, now + self.delay);
    }

    /// Remove and return every key whose quiet period has elapsed
    pub fn drain_ready(&mut self, now: Instant) -> Vec<K> {
        let ready: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            self.pending.remove(key);
        }
        ready
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
