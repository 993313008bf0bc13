//! Archive & upload pipeline for quicksave
//!
//! This crate provides:
//! - Job model and terminal outcomes
//! - Archiver collaborators (external 7-Zip, in-process zstd)
//! - Webhook uploader with transient/permanent classification
//! - Exponential backoff retry policy
//! - The pipeline that drives one job from snapshot to ledger entry

pub mod archive;
pub mod job;
pub mod retry;
pub mod runner;
pub mod upload;

// Re-exports
pub use archive::{ArchiveError, ArchiveOptions, Archiver, Artifact, SevenZipArchiver, ZstdArchiver};
pub use job::{Job, JobFailure, JobId, JobOutcome, JobState};
pub use retry::RetryPolicy;
pub use runner::Pipeline;
pub use upload::{Endpoint, UploadOutcome, Uploader, WebhookUploader};
