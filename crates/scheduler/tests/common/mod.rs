//! Fake collaborators for scheduler scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use ledger::{Ledger, LedgerStore};
use parking_lot::Mutex;
use pipeline::{
    ArchiveError, ArchiveOptions, Archiver, Artifact, Endpoint, Pipeline, RetryPolicy,
    UploadOutcome, Uploader,
};
use qs_core::{
    ComposeOptions, Config, FingerprintEngine, FingerprintPolicy, ManualClock, ReadError,
    Snapshot, SnapshotSource,
};
use scheduler::{Context, JobReport, Scheduler};
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify, Semaphore};

/// Document held in memory
pub struct MemorySource {
    content: Mutex<Vec<u8>>,
    unreadable: Mutex<bool>,
    /// Simulated copy time of a large document
    capture_delay: Mutex<Duration>,
    path: PathBuf,
}

impl MemorySource {
    pub fn new(content: &[u8]) -> Self {
        Self {
            content: Mutex::new(content.to_vec()),
            unreadable: Mutex::new(false),
            capture_delay: Mutex::new(Duration::ZERO),
            path: PathBuf::from("memory.blend"),
        }
    }

    pub fn set(&self, content: &[u8]) {
        *self.content.lock() = content.to_vec();
    }

    pub fn set_unreadable(&self, unreadable: bool) {
        *self.unreadable.lock() = unreadable;
    }

    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock() = delay;
    }
}

impl SnapshotSource for MemorySource {
    fn capture(&self, seq: u64, now_ms: u64) -> Result<Snapshot, ReadError> {
        let delay = *self.capture_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if *self.unreadable.lock() {
            return Err(ReadError::new(
                &self.path,
                io::Error::new(io::ErrorKind::PermissionDenied, "locked by another process"),
            ));
        }
        Ok(Snapshot::from_bytes(seq, now_ms, self.content.lock().clone()))
    }

    fn document(&self) -> &Path {
        &self.path
    }
}

/// Copies the source; blocks on `gate` first and can be told to fail
pub struct FakeArchiver {
    pub gate: Arc<Semaphore>,
    pub fail: Mutex<bool>,
    pub calls: Mutex<u32>,
}

impl FakeArchiver {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            fail: Mutex::new(false),
            calls: Mutex::new(0),
        }
    }

    /// Archiver that waits for `release`
    pub fn gated() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::new()
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl Archiver for FakeArchiver {
    async fn archive(
        &self,
        source: &Path,
        options: &ArchiveOptions,
    ) -> Result<Artifact, ArchiveError> {
        *self.calls.lock() += 1;
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ArchiveError::Task(e.to_string()))?;

        if *self.fail.lock() {
            return Err(ArchiveError::ToolFailed {
                status: "exit status: 2".into(),
                stderr: "unsupported method".into(),
            });
        }

        let path = options.output_dir.join("artifact.7z");
        let size = std::fs::copy(source, &path).map_err(|source| ArchiveError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Artifact { path, size })
    }
}

/// Replays scripted outcomes (then `fallback`) and records messages
pub struct FakeUploader {
    script: Mutex<VecDeque<UploadOutcome>>,
    fallback: UploadOutcome,
    pub messages: Mutex<Vec<String>>,
    /// Signalled when an upload starts
    pub started: Notify,
    pub gate: Arc<Semaphore>,
}

impl FakeUploader {
    pub fn succeeding() -> Self {
        Self::with_fallback(UploadOutcome::Success)
    }

    pub fn with_fallback(fallback: UploadOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            messages: Mutex::new(Vec::new()),
            started: Notify::new(),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
        }
    }

    /// Uploads wait for `release`
    pub fn gated() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::succeeding()
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn calls(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, _artifact: &Artifact, message: &str, _endpoint: &Endpoint) -> UploadOutcome {
        self.messages.lock().push(message.to_string());
        self.started.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            drop(permit);
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub source: Arc<MemorySource>,
    pub archiver: Arc<FakeArchiver>,
    pub uploader: Arc<FakeUploader>,
    pub ledger: Arc<Mutex<Ledger>>,
    pub scheduler: Scheduler,
    pub reports: mpsc::UnboundedReceiver<JobReport>,
}

pub struct HarnessBuilder {
    cooldown_secs: u64,
    retention: usize,
    archiver: FakeArchiver,
    uploader: FakeUploader,
    content: Vec<u8>,
    store_dir: Option<PathBuf>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            cooldown_secs: 0,
            retention: 5,
            archiver: FakeArchiver::new(),
            uploader: FakeUploader::succeeding(),
            content: b"scene v1".to_vec(),
            store_dir: None,
        }
    }

    pub fn cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn archiver(mut self, archiver: FakeArchiver) -> Self {
        self.archiver = archiver;
        self
    }

    pub fn uploader(mut self, uploader: FakeUploader) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn content(mut self, content: &[u8]) -> Self {
        self.content = content.to_vec();
        self
    }

    /// Persist the ledger and cooldown under `dir`
    pub fn store(mut self, dir: &Path) -> Self {
        self.store_dir = Some(dir.to_path_buf());
        self
    }

    pub fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let source = Arc::new(MemorySource::new(&self.content));
        let archiver = Arc::new(self.archiver);
        let uploader = Arc::new(self.uploader);

        let store = self
            .store_dir
            .as_deref()
            .map(|dir| Arc::new(LedgerStore::open(dir, self.retention).unwrap()));
        let ledger = Arc::new(Mutex::new(match &store {
            Some(store) => store.load().unwrap(),
            None => Ledger::new(self.retention),
        }));

        let mut config = Config::default();
        config.gate.cooldown_secs = self.cooldown_secs;
        config.ledger.retention_count = self.retention;

        let mut pipeline = Pipeline::new(
            archiver.clone(),
            uploader.clone(),
            Endpoint {
                url: "https://example.invalid/webhook".into(),
                token: None,
                timeout: Duration::from_secs(1),
            },
            ArchiveOptions {
                level: 9,
                output_dir: dir.path().to_path_buf(),
            },
            ledger.clone(),
            clock.clone(),
        )
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        });
        if let Some(store) = &store {
            pipeline = pipeline.with_store(store.clone());
        }

        let ctx = Context {
            config,
            clock: clock.clone(),
            source: source.clone(),
            engine: FingerprintEngine::new(FingerprintPolicy::Whole),
            compose: ComposeOptions::default(),
            ledger: ledger.clone(),
            store,
            pipeline: Arc::new(pipeline),
        };

        let (scheduler, reports) = Scheduler::start(ctx, &tokio::runtime::Handle::current());

        Harness {
            dir,
            clock,
            source,
            archiver,
            uploader,
            ledger,
            scheduler,
            reports,
        }
    }
}

impl Harness {
    pub async fn next_report(&mut self) -> JobReport {
        tokio::time::timeout(Duration::from_secs(10), self.reports.recv())
            .await
            .expect("timed out waiting for job report")
            .expect("report channel closed")
    }

    /// Assert that no report arrives within a short window
    pub async fn assert_no_report(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.reports.recv()).await;
        assert!(next.is_err(), "unexpected report: {:?}", next);
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.lock().len()
    }
}

pub fn secs(s: u64) -> u64 {
    s * 1_000
}
