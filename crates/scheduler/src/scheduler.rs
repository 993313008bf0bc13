//! Single-flight job scheduler

use crate::context::Context;
use crate::cooldown::CooldownGate;
use parking_lot::Mutex;
use pipeline::{Job, JobId, JobOutcome};
use qs_core::{compose, ChangeSummary, Fingerprint, ReadError, Snapshot};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Accepted(JobId),
    Rejected(Rejection),
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Expected reasons not to start a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    CooldownActive { remaining: Duration },
    NoChangeDetected,
    /// Remembered as the pending request and re-evaluated later
    JobAlreadyRunning,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CooldownActive { remaining } => {
                write!(f, "cooldown active, {}s remaining", remaining.as_secs_f64().ceil() as u64)
            }
            Self::NoChangeDetected => f.write_str("no change since the last upload"),
            Self::JobAlreadyRunning => f.write_str("a job is already running; request queued"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("scheduler is shutting down")]
    Stopped,
    #[error("submission task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Manual,
    Save,
    Autosave,
}

/// A request to upload the current document state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Message override
    pub message: Option<String>,
}

impl Trigger {
    pub fn manual(message: Option<String>) -> Self {
        Self {
            kind: TriggerKind::Manual,
            message,
        }
    }

    pub fn save() -> Self {
        Self {
            kind: TriggerKind::Save,
            message: None,
        }
    }
}

/// Terminal notification for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcome: JobOutcome,
    pub attempts: u32,
    pub message: String,
    pub summary: ChangeSummary,
    pub finished_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// Running with a pending request
    Draining,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Pollable view of the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub running: Option<JobId>,
    pub cooldown_remaining: Duration,
    pub last_report: Option<JobReport>,
    pub ledger_len: usize,
}

struct RunningJob {
    id: JobId,
    cancel: CancellationToken,
}

struct Inner {
    gate: CooldownGate,
    running: Option<RunningJob>,
    /// A submission is capturing the document outside the lock
    evaluating: bool,
    /// Latest request seen while busy; earlier ones are replaced
    pending: Option<Trigger>,
    last_report: Option<JobReport>,
    stopped: bool,
}

impl Inner {
    fn busy(&self) -> bool {
        self.evaluating || self.running.is_some()
    }
}

/// Snapshot and fingerprint taken outside the state lock
struct Candidate {
    snapshot: Snapshot,
    fingerprint: Fingerprint,
    summary: ChangeSummary,
}

struct Shared {
    ctx: Context,
    state: Mutex<Inner>,
    jobs: mpsc::Sender<(Job, CancellationToken)>,
    reports: mpsc::UnboundedSender<JobReport>,
    next_seq: AtomicU64,
}

/// Accepts triggers and runs at most one job at a time
///
/// A submission first claims the evaluation slot under the state lock, then
/// captures and fingerprints the document with the lock released, and
/// commits under the lock again. The claim makes the Idle to Running
/// transition single-flight: a concurrent submitter observes the slot taken
/// and becomes the pending request. `status()`, `cancel()` and the worker
/// never wait behind a capture.
pub struct Scheduler {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the worker on `handle`; reports arrive on the returned receiver
    pub fn start(ctx: Context, handle: &Handle) -> (Self, mpsc::UnboundedReceiver<JobReport>) {
        let mut gate = CooldownGate::new(ctx.config.cooldown());
        if let Some(store) = &ctx.store {
            match store.last_acceptance() {
                Ok(Some(ts)) => gate.restore(ts),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "could not restore cooldown state"),
            }
        }

        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            ctx,
            state: Mutex::new(Inner {
                gate,
                running: None,
                evaluating: false,
                pending: None,
                last_report: None,
                stopped: false,
            }),
            jobs: jobs_tx,
            reports: reports_tx,
            next_seq: AtomicU64::new(1),
        });

        let shutdown = CancellationToken::new();
        let worker = handle.spawn(run_worker(shared.clone(), jobs_rx, shutdown.clone()));

        let scheduler = Self {
            shared,
            shutdown,
            worker: Mutex::new(Some(worker)),
        };
        (scheduler, reports_rx)
    }

    /// Manual submission at `now_ms`
    ///
    /// Blocks while the document is copied and hashed; async callers use
    /// [`Scheduler::submit_trigger_async`].
    pub fn submit(
        &self,
        now_ms: u64,
        message: Option<String>,
    ) -> Result<Submission, SchedulerError> {
        self.shared.submit(now_ms, Trigger::manual(message))
    }

    /// Submission at the context clock's current time
    pub fn submit_trigger(&self, trigger: Trigger) -> Result<Submission, SchedulerError> {
        let now_ms = self.shared.ctx.clock.now_ms();
        self.shared.submit(now_ms, trigger)
    }

    /// `submit_trigger` on the blocking pool
    pub async fn submit_trigger_async(
        &self,
        trigger: Trigger,
    ) -> Result<Submission, SchedulerError> {
        let shared = self.shared.clone();
        tokio::task::spawn_blocking(move || {
            let now_ms = shared.ctx.clock.now_ms();
            shared.submit(now_ms, trigger)
        })
        .await
        .map_err(|e| SchedulerError::Task(e.to_string()))?
    }

    /// Cancel the running job and drop any pending request
    ///
    /// Returns whether a job was running.
    pub fn cancel(&self) -> bool {
        let mut inner = self.shared.state.lock();
        inner.pending = None;
        match &inner.running {
            Some(job) => {
                info!(job_id = %job.id, "cancellation requested");
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let now_ms = self.shared.ctx.clock.now_ms();
        let inner = self.shared.state.lock();
        let state = match (&inner.running, &inner.pending) {
            (None, _) => SchedulerState::Idle,
            (Some(_), None) => SchedulerState::Running,
            (Some(_), Some(_)) => SchedulerState::Draining,
        };
        SchedulerStatus {
            state,
            running: inner.running.as_ref().map(|job| job.id),
            cooldown_remaining: inner.gate.remaining(now_ms),
            last_report: inner.last_report.clone(),
            ledger_len: self.shared.ctx.ledger.lock().len(),
        }
    }

    /// Stop accepting triggers, cancel the running job and wait for the worker
    pub async fn shutdown(&self) {
        {
            let mut inner = self.shared.state.lock();
            inner.stopped = true;
            inner.pending = None;
            if let Some(job) = &inner.running {
                job.cancel.cancel();
            }
        }
        self.shutdown.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "scheduler worker ended abnormally");
            }
        }
    }
}

impl Shared {
    fn submit(&self, now_ms: u64, trigger: Trigger) -> Result<Submission, SchedulerError> {
        let kind = trigger.kind;
        let result = self.claim_and_evaluate(now_ms, trigger);
        log_submission(kind, &result);
        // A request may have been coalesced while this one was capturing
        self.drain_pending();
        result
    }

    fn claim_and_evaluate(
        &self,
        now_ms: u64,
        trigger: Trigger,
    ) -> Result<Submission, SchedulerError> {
        {
            let mut inner = self.state.lock();
            if inner.stopped {
                return Err(SchedulerError::Stopped);
            }
            if inner.busy() {
                inner.pending = Some(trigger);
                return Ok(Submission::Rejected(Rejection::JobAlreadyRunning));
            }
            inner.evaluating = true;
        }
        self.evaluate_claimed(now_ms, trigger)
    }

    /// Decide a trigger that holds the evaluation slot; always releases it
    fn evaluate_claimed(
        &self,
        now_ms: u64,
        trigger: Trigger,
    ) -> Result<Submission, SchedulerError> {
        let candidate = self.prepare(now_ms);

        let mut inner = self.state.lock();
        inner.evaluating = false;
        if inner.stopped {
            return Err(SchedulerError::Stopped);
        }

        // Duplicate content is reported before the cooldown
        let Some(candidate) = candidate? else {
            return Ok(Submission::Rejected(Rejection::NoChangeDetected));
        };
        if !inner.gate.would_accept(now_ms) {
            return Ok(Submission::Rejected(Rejection::CooldownActive {
                remaining: inner.gate.remaining(now_ms),
            }));
        }

        let message = compose(
            &candidate.summary,
            trigger.message.as_deref(),
            &self.ctx.compose,
            now_ms,
        );
        let job = Job::new(
            candidate.snapshot,
            candidate.fingerprint,
            candidate.summary,
            message,
            now_ms,
        );
        let id = job.id;
        let cancel = CancellationToken::new();

        match self.jobs.try_send((job, cancel.clone())) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(SchedulerError::Stopped),
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Only possible if the worker still holds a finished job's slot
                inner.pending = Some(trigger);
                return Ok(Submission::Rejected(Rejection::JobAlreadyRunning));
            }
        }

        inner.gate.try_accept(now_ms);
        inner.running = Some(RunningJob { id, cancel });
        Ok(Submission::Accepted(id))
    }

    /// Capture and fingerprint without the state lock; `None` for a duplicate
    ///
    /// The ledger cannot change meanwhile: only the worker appends, and no
    /// job runs while the evaluation slot is held.
    fn prepare(&self, now_ms: u64) -> Result<Option<Candidate>, ReadError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.ctx.source.capture(seq, now_ms)?;
        let fingerprint = self.ctx.engine.fingerprint(&snapshot)?;

        let ledger = self.ctx.ledger.lock();
        if ledger.is_duplicate(&fingerprint) {
            return Ok(None);
        }
        let previous = ledger.last().map(|entry| &entry.fingerprint);
        let summary = ChangeSummary::between(previous, &fingerprint);
        Ok(Some(Candidate {
            snapshot,
            fingerprint,
            summary,
        }))
    }

    /// Re-evaluate the pending request against the current document once
    /// nothing else will
    fn drain_pending(&self) {
        loop {
            let trigger = {
                let mut inner = self.state.lock();
                if inner.stopped || inner.busy() {
                    return;
                }
                let Some(trigger) = inner.pending.take() else {
                    return;
                };
                inner.evaluating = true;
                trigger
            };

            let kind = trigger.kind;
            let now_ms = self.ctx.clock.now_ms();
            let result = self.evaluate_claimed(now_ms, trigger);
            debug!("re-evaluated pending request against the current document");
            log_submission(kind, &result);
        }
    }
}

fn log_submission(kind: TriggerKind, result: &Result<Submission, SchedulerError>) {
    match result {
        Ok(Submission::Accepted(job_id)) => info!(%job_id, ?kind, "trigger accepted"),
        Ok(Submission::Rejected(reason)) if kind == TriggerKind::Autosave => {
            debug!(?kind, %reason, "trigger rejected")
        }
        Ok(Submission::Rejected(reason)) => info!(?kind, %reason, "trigger rejected"),
        Err(e) => warn!(?kind, error = %e, "trigger failed"),
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut jobs: mpsc::Receiver<(Job, CancellationToken)>,
    shutdown: CancellationToken,
) {
    loop {
        let (mut job, cancel) = tokio::select! {
            biased;
            next = jobs.recv() => match next {
                Some(next) => next,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Some(store) = &shared.ctx.store {
            if let Err(e) = store.record_acceptance(job.accepted_at_ms) {
                warn!(job_id = %job.id, error = %e, "failed to persist cooldown state");
            }
        }

        let outcome = shared.ctx.pipeline.run(&mut job, &cancel).await;
        let report = JobReport {
            job_id: job.id,
            outcome,
            attempts: job.attempts,
            message: job.message.clone(),
            summary: job.summary.clone(),
            finished_at_ms: shared.ctx.clock.now_ms(),
        };
        // Releases the staged snapshot
        drop(job);

        {
            let mut inner = shared.state.lock();
            inner.running = None;
            inner.last_report = Some(report.clone());
        }

        // The receiver may be gone; the report stays in `last_report`
        let _ = shared.reports.send(report);

        // The follow-up capture runs on the blocking pool
        let followup = shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || followup.drain_pending()).await {
            warn!(error = %e, "pending request evaluation failed");
        }
    }
    debug!("scheduler worker stopped");
}
