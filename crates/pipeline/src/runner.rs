//! Drives one job from snapshot to ledger entry

use crate::archive::{ArchiveOptions, Archiver, Artifact};
use crate::job::{Job, JobFailure, JobOutcome, JobState};
use crate::retry::RetryPolicy;
use crate::upload::{Endpoint, UploadOutcome, Uploader};
use ledger::{Ledger, LedgerEntry, LedgerStore, UploadRecord};
use parking_lot::Mutex;
use qs_core::{Clock, SnapshotData};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Archive, upload with retries, record success
///
/// The pipeline is the only writer of the ledger.
pub struct Pipeline {
    archiver: Arc<dyn Archiver>,
    uploader: Arc<dyn Uploader>,
    endpoint: Endpoint,
    archive_options: ArchiveOptions,
    retry: RetryPolicy,
    ledger: Arc<Mutex<Ledger>>,
    store: Option<Arc<LedgerStore>>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(
        archiver: Arc<dyn Archiver>,
        uploader: Arc<dyn Uploader>,
        endpoint: Endpoint,
        archive_options: ArchiveOptions,
        ledger: Arc<Mutex<Ledger>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            archiver,
            uploader,
            endpoint,
            archive_options,
            retry: RetryPolicy::default(),
            ledger,
            store: None,
            clock,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Also persist successful entries
    pub fn with_store(mut self, store: Arc<LedgerStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `job` to a terminal state
    ///
    /// Cancellation is cooperative: an archive in progress is awaited, an
    /// upload in flight is allowed to finish and its result decides.
    pub async fn run(&self, job: &mut Job, cancel: &CancellationToken) -> JobOutcome {
        job.transition(JobState::Running);
        info!(job_id = %job.id, seq = job.snapshot.seq(), "job started");

        let outcome = self.execute(job, cancel).await;
        job.transition(outcome.state());

        match &outcome {
            JobOutcome::Succeeded(record) => {
                info!(job_id = %job.id, attempts = record.attempts, bytes = record.artifact_bytes, "upload succeeded")
            }
            JobOutcome::Failed(failure) => error!(job_id = %job.id, attempts = job.attempts, error = %failure, "job failed"),
            JobOutcome::Cancelled(reason) => info!(job_id = %job.id, reason = %reason, "job cancelled"),
        }
        outcome
    }

    async fn execute(&self, job: &mut Job, cancel: &CancellationToken) -> JobOutcome {
        let (source, scratch) = match self.stage(job).await {
            Ok(paths) => paths,
            Err(failure) => return JobOutcome::Failed(failure),
        };

        let archived = self.archiver.archive(&source, &self.archive_options).await;
        if let Some(scratch) = scratch {
            remove_quietly(&scratch).await;
        }

        let artifact = match archived {
            Ok(artifact) => artifact,
            Err(e) => return JobOutcome::Failed(JobFailure::Archive(e.to_string())),
        };
        debug!(job_id = %job.id, artifact = %artifact.path.display(), bytes = artifact.size, "archive ready");

        let outcome = if cancel.is_cancelled() {
            JobOutcome::Cancelled("cancelled before upload".to_string())
        } else {
            match self.upload_with_retry(job, &artifact, cancel).await {
                Ok(()) => {
                    let record = UploadRecord {
                        attempts: job.attempts,
                        artifact_bytes: artifact.size,
                    };
                    self.record_success(job, record);
                    JobOutcome::Succeeded(record)
                }
                Err(outcome) => outcome,
            }
        };

        artifact.remove().await;
        outcome
    }

    /// Path the archiver reads, plus a scratch file to delete afterwards
    async fn stage(&self, job: &Job) -> Result<(PathBuf, Option<PathBuf>), JobFailure> {
        match job.snapshot.data() {
            SnapshotData::File(path) => Ok((path.clone(), None)),
            SnapshotData::Bytes(bytes) => {
                let dir = &self.archive_options.output_dir;
                let path = dir.join(format!("snapshot-{}.blend", job.snapshot.seq()));
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| JobFailure::Staging(format!("{}: {}", dir.display(), e)))?;
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| JobFailure::Staging(format!("{}: {}", path.display(), e)))?;
                Ok((path.clone(), Some(path)))
            }
        }
    }

    async fn upload_with_retry(
        &self,
        job: &mut Job,
        artifact: &Artifact,
        cancel: &CancellationToken,
    ) -> Result<(), JobOutcome> {
        loop {
            job.attempts += 1;
            let attempt = job.attempts;

            let error = match self.uploader.upload(artifact, &job.message, &self.endpoint).await {
                UploadOutcome::Success => return Ok(()),
                UploadOutcome::PermanentFailure(e) => {
                    if cancel.is_cancelled() {
                        return Err(cancelled_after(attempt));
                    }
                    return Err(JobOutcome::Failed(JobFailure::Upload(e)));
                }
                UploadOutcome::TransientFailure(e) => e,
            };

            if cancel.is_cancelled() {
                return Err(cancelled_after(attempt));
            }
            if !self.retry.allows_another(attempt) {
                return Err(JobOutcome::Failed(JobFailure::RetriesExhausted {
                    attempts: attempt,
                    last_error: error,
                }));
            }

            let delay = self.retry.delay_after(attempt);
            debug!(job_id = %job.id, attempt, ?delay, error = %error, "upload failed, retrying");

            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled_after(attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn record_success(&self, job: &Job, record: UploadRecord) {
        let entry = LedgerEntry::new(
            job.id,
            job.fingerprint.clone(),
            self.clock.now_ms(),
            job.message.clone(),
            record,
        );

        if let Some(store) = &self.store {
            // The upload happened; losing the row only weakens dedup after a restart
            if let Err(e) = store.append(&entry) {
                warn!(job_id = %job.id, error = %e, "failed to persist ledger entry");
            }
        }
        self.ledger.lock().append(entry);
    }
}

fn cancelled_after(attempts: u32) -> JobOutcome {
    JobOutcome::Cancelled(format!("cancelled after {} upload attempt(s)", attempts))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove scratch file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveError;
    use async_trait::async_trait;
    use qs_core::{ChangeSummary, FingerprintEngine, ManualClock, Snapshot};
    use std::collections::VecDeque;
    use std::time::Duration;
    use tempfile::TempDir;

    struct CopyArchiver;

    #[async_trait]
    impl Archiver for CopyArchiver {
        async fn archive(
            &self,
            source: &Path,
            options: &ArchiveOptions,
        ) -> Result<Artifact, ArchiveError> {
            let path = options.output_dir.join("out.7z");
            let size = std::fs::copy(source, &path).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
            Ok(Artifact { path, size })
        }
    }

    struct BrokenArchiver;

    #[async_trait]
    impl Archiver for BrokenArchiver {
        async fn archive(&self, _: &Path, _: &ArchiveOptions) -> Result<Artifact, ArchiveError> {
            Err(ArchiveError::ToolFailed {
                status: "exit status: 2".into(),
                stderr: "disk full".into(),
            })
        }
    }

    /// Replays a script of outcomes, then succeeds
    struct ScriptedUploader {
        script: Mutex<VecDeque<UploadOutcome>>,
        calls: Mutex<u32>,
    }

    impl ScriptedUploader {
        fn new(script: Vec<UploadOutcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Uploader for ScriptedUploader {
        async fn upload(&self, _: &Artifact, _: &str, _: &Endpoint) -> UploadOutcome {
            *self.calls.lock() += 1;
            self.script.lock().pop_front().unwrap_or(UploadOutcome::Success)
        }
    }

    struct Fixture {
        dir: TempDir,
        ledger: Arc<Mutex<Ledger>>,
        uploader: Arc<ScriptedUploader>,
        pipeline: Pipeline,
    }

    fn fixture(archiver: Arc<dyn Archiver>, script: Vec<UploadOutcome>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Mutex::new(Ledger::new(5)));
        let uploader = Arc::new(ScriptedUploader::new(script));
        let pipeline = Pipeline::new(
            archiver,
            uploader.clone(),
            Endpoint {
                url: "https://example.invalid/hook".into(),
                token: None,
                timeout: Duration::from_secs(1),
            },
            ArchiveOptions {
                level: 9,
                output_dir: dir.path().to_path_buf(),
            },
            ledger.clone(),
            Arc::new(ManualClock::new(42)),
        )
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        });
        Fixture {
            dir,
            ledger,
            uploader,
            pipeline,
        }
    }

    fn job(content: &[u8]) -> Job {
        let engine = FingerprintEngine::default();
        Job::new(
            Snapshot::from_bytes(1, 0, content.to_vec()),
            engine.fingerprint_bytes(content),
            ChangeSummary::Initial,
            "Update".into(),
            0,
        )
    }

    fn transient() -> UploadOutcome {
        UploadOutcome::TransientFailure("HTTP 503".into())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_appends_ledger_entry() {
        let f = fixture(Arc::new(CopyArchiver), vec![transient()]);
        let mut job = job(b"scene");

        let outcome = f.pipeline.run(&mut job, &CancellationToken::new()).await;

        assert_eq!(
            outcome,
            JobOutcome::Succeeded(UploadRecord {
                attempts: 2,
                artifact_bytes: 5
            })
        );
        assert_eq!(job.state(), JobState::Succeeded);

        let ledger = f.ledger.lock();
        assert_eq!(ledger.len(), 1);
        let last = ledger.last().unwrap();
        assert_eq!(last.job_id, job.id);
        assert_eq!(last.timestamp_ms, 42);
        assert_eq!(last.fingerprint, job.fingerprint);

        // Artifact and scratch copy are gone
        assert_eq!(std::fs::read_dir(f.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let f = fixture(
            Arc::new(CopyArchiver),
            vec![transient(), transient(), transient(), transient()],
        );
        let mut job = job(b"scene");

        let outcome = f.pipeline.run(&mut job, &CancellationToken::new()).await;

        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(*f.uploader.calls.lock(), 3);
        assert!(f.ledger.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_immediately() {
        let f = fixture(
            Arc::new(CopyArchiver),
            vec![UploadOutcome::PermanentFailure("HTTP 404".into())],
        );
        let mut job = job(b"scene");

        let outcome = f.pipeline.run(&mut job, &CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Failed(JobFailure::Upload("HTTP 404".into())));
        assert_eq!(*f.uploader.calls.lock(), 1);
        assert!(f.ledger.lock().is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_is_terminal() {
        let f = fixture(Arc::new(BrokenArchiver), vec![]);
        let mut job = job(b"scene");

        let outcome = f.pipeline.run(&mut job, &CancellationToken::new()).await;

        assert!(matches!(outcome, JobOutcome::Failed(JobFailure::Archive(_))));
        assert_eq!(*f.uploader.calls.lock(), 0);
        assert!(f.ledger.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_upload() {
        let f = fixture(Arc::new(CopyArchiver), vec![]);
        let mut job = job(b"scene");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.pipeline.run(&mut job, &cancel).await;

        assert!(matches!(outcome, JobOutcome::Cancelled(_)));
        assert_eq!(job.state(), JobState::Cancelled);
        assert_eq!(*f.uploader.calls.lock(), 0);
        assert!(f.ledger.lock().is_empty());
    }
}
