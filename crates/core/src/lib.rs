//! Core primitives for quicksave
//!
//! This crate provides:
//! - BLAKE3 digests (whole-file and sampled)
//! - `.blend` container decoding and block walking
//! - Fingerprint engine and change summaries
//! - Snapshots of the tracked document
//! - Commit message composition
//! - Configuration model

pub mod blend;
pub mod clock;
pub mod compose;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod snapshot;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use compose::{compose, ComposeOptions};
pub use config::Config;
pub use error::{ConfigError, DigestError, ReadError};
pub use fingerprint::{ChangeSummary, Element, Fingerprint, FingerprintEngine, FingerprintPolicy};
pub use hash::Digest;
pub use snapshot::{FileSource, Snapshot, SnapshotData, SnapshotSource};
