//! Immutable point-in-time captures of the document

use crate::error::ReadError;
use bytes::Bytes;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum SnapshotData {
    File(PathBuf),
    Bytes(Bytes),
}

/// Document state captured for one pipeline run
///
/// A staged snapshot owns its file and removes it on drop, so it disappears
/// once the run (or the rejected trigger) that captured it is done.
#[derive(Debug)]
pub struct Snapshot {
    seq: u64,
    captured_at_ms: u64,
    data: SnapshotData,
    staged: bool,
}

impl Snapshot {
    pub fn from_bytes(seq: u64, captured_at_ms: u64, bytes: impl Into<Bytes>) -> Self {
        Self {
            seq,
            captured_at_ms,
            data: SnapshotData::Bytes(bytes.into()),
            staged: false,
        }
    }

    /// Reference a file the snapshot does not own
    pub fn from_path(seq: u64, captured_at_ms: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            seq,
            captured_at_ms,
            data: SnapshotData::File(path.into()),
            staged: false,
        }
    }

    /// Take ownership of a staged copy; it is deleted on drop
    pub fn from_staged(seq: u64, captured_at_ms: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            seq,
            captured_at_ms,
            data: SnapshotData::File(path.into()),
            staged: true,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }

    pub fn data(&self) -> &SnapshotData {
        &self.data
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            SnapshotData::File(path) => Some(path),
            SnapshotData::Bytes(_) => None,
        }
    }

    pub fn read_all(&self) -> Result<Cow<'_, [u8]>, ReadError> {
        match &self.data {
            SnapshotData::File(path) => fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| ReadError::new(path, e)),
            SnapshotData::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if !self.staged {
            return;
        }
        if let SnapshotData::File(path) = &self.data {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove staged snapshot");
                }
            }
        }
    }
}

/// Where snapshots come from
pub trait SnapshotSource: Send + Sync {
    fn capture(&self, seq: u64, now_ms: u64) -> Result<Snapshot, ReadError>;

    /// Path of the live document, for logs and trigger matching
    fn document(&self) -> &Path;
}

/// Copies the live document into a staging directory
///
/// The copy keeps the archive step reading stable bytes while the user keeps
/// saving over the original.
#[derive(Debug, Clone)]
pub struct FileSource {
    document: PathBuf,
    staging_dir: PathBuf,
}

impl FileSource {
    pub fn new(document: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            document: document.into(),
            staging_dir: staging_dir.into(),
        }
    }

    fn staged_path(&self, seq: u64) -> PathBuf {
        let stem = self
            .document
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let name = match self.document.extension() {
            Some(ext) => format!("{}-{}.{}", stem, seq, ext.to_string_lossy()),
            None => format!("{}-{}", stem, seq),
        };
        self.staging_dir.join(name)
    }
}

impl SnapshotSource for FileSource {
    fn capture(&self, seq: u64, now_ms: u64) -> Result<Snapshot, ReadError> {
        fs::create_dir_all(&self.staging_dir)
            .map_err(|e| ReadError::new(&self.staging_dir, e))?;

        let target = self.staged_path(seq);
        fs::copy(&self.document, &target).map_err(|e| ReadError::new(&self.document, e))?;
        Ok(Snapshot::from_staged(seq, now_ms, target))
    }

    fn document(&self) -> &Path {
        &self.document
    }
}
