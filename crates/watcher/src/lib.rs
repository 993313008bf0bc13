//! Save detection for quicksave
//!
//! This crate provides:
//! - Per-path debouncing of filesystem events
//! - Save vs autosave classification
//! - A watcher thread that turns saves of the document into triggers

pub mod debounce;
pub mod watch;

// Re-exports
pub use debounce::Debouncer;
pub use watch::{classify, SaveWatcher, TriggerSink, WatchError};
