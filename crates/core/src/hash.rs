//! BLAKE3 digests for content fingerprints

use crate::error::DigestError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Window hashed at each end of a file by the sampled policy (2 MiB)
pub const SAMPLE_WINDOW: u64 = 2 * 1024 * 1024;

/// A BLAKE3 digest (32 bytes). Compared for equality only.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Create a digest from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the digest as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(hex: &str) -> Result<Self, DigestError> {
        let bytes = hex::decode(hex).map_err(|e| DigestError::Hex(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| DigestError::Length(v.len()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> Digest {
    blake3::hash(data).into()
}

/// Hash a whole file (memory-mapped, multi-threaded for large files)
pub fn hash_file(path: &Path) -> io::Result<Digest> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_mmap_rayon(path)?;
    Ok(hasher.finalize().into())
}

/// Hash the head and tail windows of a buffer plus its length
///
/// Cheap for very large scenes, but blind to edits that land in the middle
/// of the file without changing its size.
pub fn hash_sampled(data: &[u8]) -> Digest {
    let window = SAMPLE_WINDOW as usize;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&data[..data.len().min(window)]);
    if data.len() > window {
        hasher.update(&data[data.len() - window..]);
    }
    hasher.update(data.len().to_string().as_bytes());
    hasher.finalize().into()
}

/// Sampled hash read straight from disk, without loading the middle of the file
pub fn hash_file_sampled(path: &Path) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = blake3::Hasher::new();

    let mut head = Vec::with_capacity(size.min(SAMPLE_WINDOW) as usize);
    (&mut file).take(SAMPLE_WINDOW).read_to_end(&mut head)?;
    hasher.update(&head);

    if size > SAMPLE_WINDOW {
        file.seek(SeekFrom::Start(size - SAMPLE_WINDOW))?;
        let mut tail = Vec::with_capacity(SAMPLE_WINDOW as usize);
        file.take(SAMPLE_WINDOW).read_to_end(&mut tail)?;
        hasher.update(&tail);
    }

    hasher.update(size.to_string().as_bytes());
    Ok(hasher.finalize().into())
}

/// Incremental hasher for building digests across multiple chunks
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Feed a length-prefixed field so adjacent fields cannot alias
    pub fn update_field(&mut self, data: &[u8]) {
        self.inner.update(&(data.len() as u64).to_le_bytes());
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        self.inner.finalize().into()
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
