//! Minimum interval between accepted triggers

use std::time::Duration;

/// Bounds how often triggers are accepted, whatever the content velocity
///
/// A zero duration disables the gate.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    cooldown: Duration,
    last_accepted: Option<u64>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: None,
        }
    }

    /// Accept and record `now_ms` iff the cooldown has elapsed
    pub fn try_accept(&mut self, now_ms: u64) -> bool {
        if !self.would_accept(now_ms) {
            return false;
        }
        self.last_accepted = Some(now_ms);
        true
    }

    pub fn would_accept(&self, now_ms: u64) -> bool {
        self.remaining(now_ms).is_zero()
    }

    /// Time left until the next acceptance; zero when open
    pub fn remaining(&self, now_ms: u64) -> Duration {
        match self.last_accepted {
            None => Duration::ZERO,
            Some(last) => {
                // A clock that went backwards counts as no time elapsed
                let elapsed = Duration::from_millis(now_ms.saturating_sub(last));
                self.cooldown.saturating_sub(elapsed)
            }
        }
    }

    /// Seed from a persisted acceptance time
    pub fn restore(&mut self, last_accepted_ms: u64) {
        self.last_accepted = Some(last_accepted_ms);
    }

    pub fn last_accepted(&self) -> Option<u64> {
        self.last_accepted
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
