//! Process-wide collaborators shared by the scheduler and its worker

use ledger::{Ledger, LedgerStore, StoreError};
use parking_lot::Mutex;
use pipeline::{
    ArchiveOptions, Archiver, Endpoint, Pipeline, RetryPolicy, SevenZipArchiver, WebhookUploader,
    ZstdArchiver,
};
use qs_core::{Clock, ComposeOptions, Config, FileSource, FingerprintEngine, SnapshotSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no document configured (set document.path or pass --document)")]
    MissingDocument,
    #[error("failed to create {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build HTTP client: {0}")]
    Http(String),
}

/// Everything a submission or a job run needs
pub struct Context {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub source: Arc<dyn SnapshotSource>,
    pub engine: FingerprintEngine,
    pub compose: ComposeOptions,
    pub ledger: Arc<Mutex<Ledger>>,
    pub store: Option<Arc<LedgerStore>>,
    pub pipeline: Arc<Pipeline>,
}

/// Directory layout under the state dir
#[derive(Debug, Clone)]
pub struct StateLayout {
    pub root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn ledger(&self) -> PathBuf {
        self.root.join("ledger")
    }

    pub fn staging(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn artifacts(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn locks(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}

impl Context {
    /// Wire the production collaborators from configuration
    pub fn from_config(config: Config, clock: Arc<dyn Clock>) -> Result<Self, ContextError> {
        let document = config
            .document
            .path
            .clone()
            .ok_or(ContextError::MissingDocument)?;
        let layout = StateLayout::new(config.state_dir().ok_or(ContextError::MissingDocument)?);

        let ledger_dir = layout.ledger();
        std::fs::create_dir_all(&ledger_dir).map_err(|source| ContextError::Io {
            path: ledger_dir.clone(),
            source,
        })?;
        let store = Arc::new(LedgerStore::open(&ledger_dir, config.ledger.retention_count)?);
        let ledger = Arc::new(Mutex::new(store.load()?));

        let archiver: Arc<dyn Archiver> = match &config.archive.archiver_path {
            Some(program) => Arc::new(SevenZipArchiver::new(program)),
            None => Arc::new(ZstdArchiver),
        };
        let uploader =
            Arc::new(WebhookUploader::new().map_err(|e| ContextError::Http(e.to_string()))?);

        let endpoint = Endpoint {
            url: config.upload.webhook_url.clone(),
            token: config.upload.token.clone(),
            timeout: Duration::from_secs(config.upload.timeout_secs),
        };
        let archive_options = ArchiveOptions {
            level: config.archive.level,
            output_dir: layout.artifacts(),
        };

        let pipeline = Pipeline::new(
            archiver,
            uploader,
            endpoint,
            archive_options,
            ledger.clone(),
            clock.clone(),
        )
        .with_retry(RetryPolicy::from_config(&config.upload))
        .with_store(store.clone());

        info!(
            document = %document.display(),
            state_dir = %layout.root.display(),
            policy = %config.fingerprint.policy,
            entries = ledger.lock().len(),
            "context ready"
        );

        Ok(Self {
            source: Arc::new(FileSource::new(document, layout.staging())),
            engine: FingerprintEngine::new(config.fingerprint.policy),
            compose: ComposeOptions {
                template: config.message.template.clone(),
            },
            ledger,
            store: Some(store),
            pipeline: Arc::new(pipeline),
            clock,
            config,
        })
    }
}
