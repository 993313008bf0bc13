//! Job data structures

use ledger::UploadRecord;
use qs_core::{ChangeSummary, Fingerprint, Snapshot};
use std::fmt;
use thiserror::Error;
use ulid::Ulid;

pub type JobId = Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One accepted trigger on its way to the webhook
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub snapshot: Snapshot,
    pub fingerprint: Fingerprint,
    pub summary: ChangeSummary,
    pub message: String,
    /// Upload attempts made so far
    pub attempts: u32,
    pub accepted_at_ms: u64,
    state: JobState,
}

impl Job {
    pub fn new(
        snapshot: Snapshot,
        fingerprint: Fingerprint,
        summary: ChangeSummary,
        message: String,
        accepted_at_ms: u64,
    ) -> Self {
        Self {
            id: Ulid::new(),
            snapshot,
            fingerprint,
            summary,
            message,
            attempts: 0,
            accepted_at_ms,
            state: JobState::Pending,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`; ignored once the job is terminal
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }
}

/// Terminal result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(UploadRecord),
    Failed(JobFailure),
    Cancelled(String),
}

impl JobOutcome {
    pub fn state(&self) -> JobState {
        match self {
            Self::Succeeded(_) => JobState::Succeeded,
            Self::Failed(_) => JobState::Failed,
            Self::Cancelled(_) => JobState::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("archive failed: {0}")]
    Archive(String),
    #[error("upload rejected: {0}")]
    Upload(String),
    #[error("upload failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("could not stage snapshot: {0}")]
    Staging(String),
}
