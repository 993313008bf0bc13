//! Error types shared by the quicksave crates

use std::path::PathBuf;
use thiserror::Error;

/// The document or a captured snapshot could not be read
///
/// Fatal for the trigger that hit it. Never retried here: retry belongs to
/// whoever issues the next trigger.
#[derive(Debug, Error)]
#[error("failed to read {}: {source}", path.display())]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl ReadError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid hex digest: {0}")]
    Hex(String),
    #[error("invalid digest length: expected 32 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
