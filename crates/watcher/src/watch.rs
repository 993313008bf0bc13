//! Watching the document for saves

use crate::debounce::Debouncer;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use scheduler::{Scheduler, Trigger, TriggerKind};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Wakeup interval while nothing is pending
const IDLE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("{} has no parent directory", .0.display())]
    NoParent(PathBuf),
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Receives triggers from the watcher thread
pub trait TriggerSink: Send + Sync + 'static {
    fn trigger(&self, trigger: Trigger);
}

impl TriggerSink for Scheduler {
    fn trigger(&self, trigger: Trigger) {
        // The scheduler logs the decision itself
        let _ = self.submit_trigger(trigger);
    }
}

/// Autosave and quit-save files are throttled quietly
pub fn classify(path: &Path) -> TriggerKind {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.contains("autosave") || name.contains("quit") {
        TriggerKind::Autosave
    } else {
        TriggerKind::Save
    }
}

enum Message {
    Changed(PathBuf),
    Stop,
}

/// Turns saves of one document into debounced triggers
///
/// The parent directory is watched because editors save by writing a temp
/// file and renaming it over the document.
pub struct SaveWatcher {
    watcher: Mutex<Option<RecommendedWatcher>>,
    control: Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SaveWatcher {
    pub fn start(
        document: &Path,
        debounce: Duration,
        sink: Arc<dyn TriggerSink>,
    ) -> Result<Self, WatchError> {
        let dir = document
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        if !dir.is_dir() {
            return Err(WatchError::NoParent(document.to_path_buf()));
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let matcher = DocumentMatcher::new(document);

        let events = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_write(&event.kind) => {
                for path in event.paths.iter().filter(|p| matcher.matches(p)) {
                    let _ = events.send(Message::Changed(path.clone()));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "watch error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let thread = std::thread::Builder::new()
            .name("qs-watcher".into())
            .spawn(move || run_loop(rx, Debouncer::new(debounce), sink))
            .map_err(WatchError::Spawn)?;

        info!(document = %document.display(), ?debounce, "watching for saves");

        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            control: tx,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop watching; pending debounced events are dropped
    pub fn stop(&self) {
        // Dropping the notify watcher ends its callbacks
        drop(self.watcher.lock().take());
        let _ = self.control.send(Message::Stop);

        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("watcher thread panicked");
            }
        }
    }
}

impl Drop for SaveWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_write(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

/// Matches the document and autosaves named after it
struct DocumentMatcher {
    file_name: PathBuf,
    stem: String,
}

impl DocumentMatcher {
    fn new(document: &Path) -> Self {
        Self {
            file_name: document.file_name().map(PathBuf::from).unwrap_or_default(),
            stem: document
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        if name == self.file_name.as_os_str() {
            return true;
        }
        classify(path) == TriggerKind::Autosave && starts_with_stem(name, &self.stem)
    }
}

fn starts_with_stem(name: &OsStr, stem: &str) -> bool {
    !stem.is_empty() && name.to_string_lossy().starts_with(stem)
}

fn run_loop(rx: Receiver<Message>, mut debouncer: Debouncer, sink: Arc<dyn TriggerSink>) {
    loop {
        let timeout = debouncer
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_POLL);

        match rx.recv_timeout(timeout) {
            Ok(Message::Changed(path)) => {
                debug!(path = %path.display(), "save event");
                debouncer.record(path, Instant::now());
            }
            Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        for path in debouncer.drain_ready(Instant::now()) {
            let kind = classify(&path);
            debug!(path = %path.display(), ?kind, "save settled");
            sink.trigger(Trigger {
                kind,
                message: None,
            });
        }
    }
    debug!("watcher thread stopped");
}
