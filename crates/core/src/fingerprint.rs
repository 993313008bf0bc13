//! Fingerprint engine: content digest plus per-element manifest
//!
//! The structural policy hashes only content-relevant blocks of a `.blend`
//! file. Thumbnails, render info, global file info, the struct schema, UI
//! datablocks and the old memory addresses in block headers are left out.
//! Pointers stored inside struct data that resolve to another block of the
//! same file are hashed as that block's position (element key and index), so
//! re-saving an untouched scene after a reload keeps its fingerprint.
//! Pointers into memory the file does not contain are hashed as stored.

use crate::blend::{self, BlendFile};
use crate::error::ReadError;
use crate::hash::{self, Digest, IncrementalHasher};
use crate::snapshot::{Snapshot, SnapshotData};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Which bytes of the document feed the digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintPolicy {
    /// Content blocks of a `.blend` file, falling back to `Whole`
    #[default]
    Structural,
    /// The full byte stream
    Whole,
    /// First and last 2 MiB plus the file size
    Sampled,
}

impl std::fmt::Display for FingerprintPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Structural => "structural",
            Self::Whole => "whole",
            Self::Sampled => "sampled",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for FingerprintPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structural" => Ok(Self::Structural),
            "whole" => Ok(Self::Whole),
            "sampled" => Ok(Self::Sampled),
            other => Err(format!("unknown fingerprint policy '{}'", other)),
        }
    }
}

/// A top-level datablock and the digest of its blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// ID name (`OBCube`) or `OB#3` when no name was found
    pub key: String,
    pub digest: Digest,
}

impl Element {
    /// Category from the two-letter prefix (`Object`, `Mesh`, ...)
    pub fn kind(&self) -> String {
        match self.key.as_bytes() {
            [a, b, ..] => blend::kind_name([*a, *b]).into_owned(),
            _ => self.key.clone(),
        }
    }
}

/// Content fingerprint of one snapshot
///
/// Equality is digest equality; the other fields only feed change summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub digest: Digest,
    /// Policy actually applied (`Whole` when structural parsing fell back)
    pub policy: FingerprintPolicy,
    pub size: u64,
    pub elements: Vec<Element>,
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Fingerprint {}

/// What changed between two fingerprints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeSummary {
    /// Nothing to compare against
    Initial,
    Structural {
        added: usize,
        removed: usize,
        modified: usize,
        kinds: BTreeSet<String>,
    },
    /// Only sizes are comparable
    Coarse { previous_size: u64, current_size: u64 },
}

impl ChangeSummary {
    pub fn between(previous: Option<&Fingerprint>, current: &Fingerprint) -> Self {
        let Some(previous) = previous else {
            return Self::Initial;
        };

        let structural = FingerprintPolicy::Structural;
        if previous.policy != structural || current.policy != structural {
            return Self::Coarse {
                previous_size: previous.size,
                current_size: current.size,
            };
        }

        let before: HashMap<&str, &Digest> = previous
            .elements
            .iter()
            .map(|e| (e.key.as_str(), &e.digest))
            .collect();

        let mut added = 0;
        let mut modified = 0;
        let mut kinds = BTreeSet::new();
        let mut seen = 0;

        for element in &current.elements {
            match before.get(element.key.as_str()) {
                None => {
                    added += 1;
                    kinds.insert(element.kind());
                }
                Some(digest) => {
                    seen += 1;
                    if **digest != element.digest {
                        modified += 1;
                        kinds.insert(element.kind());
                    }
                }
            }
        }

        let current_keys: BTreeSet<&str> =
            current.elements.iter().map(|e| e.key.as_str()).collect();
        for element in &previous.elements {
            if !current_keys.contains(element.key.as_str()) {
                kinds.insert(element.kind());
            }
        }

        Self::Structural {
            added,
            removed: before.len() - seen,
            modified,
            kinds,
        }
    }

    /// True when there is nothing worth describing
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Initial => true,
            Self::Structural {
                added,
                removed,
                modified,
                ..
            } => added + removed + modified == 0,
            Self::Coarse { .. } => false,
        }
    }
}

/// Computes fingerprints under one configured policy
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintEngine {
    policy: FingerprintPolicy,
}

impl FingerprintEngine {
    pub fn new(policy: FingerprintPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    /// Deterministic for identical bytes
    pub fn fingerprint(&self, snapshot: &Snapshot) -> Result<Fingerprint, ReadError> {
        match (self.policy, snapshot.data()) {
            (FingerprintPolicy::Whole, SnapshotData::File(path)) => {
                let digest = hash::hash_file(path).map_err(|e| ReadError::new(path, e))?;
                let size = std::fs::metadata(path)
                    .map_err(|e| ReadError::new(path, e))?
                    .len();
                Ok(Self::coarse(FingerprintPolicy::Whole, digest, size))
            }
            (FingerprintPolicy::Sampled, SnapshotData::File(path)) => {
                let digest =
                    hash::hash_file_sampled(path).map_err(|e| ReadError::new(path, e))?;
                let size = std::fs::metadata(path)
                    .map_err(|e| ReadError::new(path, e))?
                    .len();
                Ok(Self::coarse(FingerprintPolicy::Sampled, digest, size))
            }
            _ => {
                let bytes = snapshot.read_all()?;
                Ok(self.fingerprint_bytes(&bytes))
            }
        }
    }

    /// Fingerprint an in-memory buffer
    pub fn fingerprint_bytes(&self, bytes: &[u8]) -> Fingerprint {
        let size = bytes.len() as u64;
        match self.policy {
            FingerprintPolicy::Whole => {
                Self::coarse(FingerprintPolicy::Whole, hash::hash_bytes(bytes), size)
            }
            FingerprintPolicy::Sampled => {
                Self::coarse(FingerprintPolicy::Sampled, hash::hash_sampled(bytes), size)
            }
            FingerprintPolicy::Structural => structural(bytes).unwrap_or_else(|| {
                debug!(size, "not a parseable .blend file, hashing whole content");
                Self::coarse(FingerprintPolicy::Whole, hash::hash_bytes(bytes), size)
            }),
        }
    }

    fn coarse(policy: FingerprintPolicy, digest: Digest, size: u64) -> Fingerprint {
        Fingerprint {
            digest,
            policy,
            size,
            elements: Vec::new(),
        }
    }
}

/// ID block plus the DATA blocks that follow it
struct Group<'a> {
    key: String,
    ui: bool,
    blocks: Vec<blend::Block<'a>>,
}

/// Blocks sorted into elements, with a session-independent label per address
struct Grouped<'a> {
    /// Blocks outside any element, in file order
    loose: Vec<blend::Block<'a>>,
    groups: Vec<Group<'a>>,
    labels: HashMap<u64, String>,
}

fn group_blocks<'a>(file: &'a BlendFile<'_>) -> Option<Grouped<'a>> {
    let mut loose = Vec::new();
    let mut groups: Vec<Group<'a>> = Vec::new();
    let mut in_element = false;
    let mut labels = HashMap::new();
    let mut volatile: HashMap<[u8; 4], usize> = HashMap::new();
    let mut ordinals: HashMap<[u8; 2], usize> = HashMap::new();
    let mut keys: HashMap<String, usize> = HashMap::new();

    for block in file.blocks() {
        let block = block.ok()?;

        if block.is_data() {
            match groups.last_mut() {
                Some(group) if in_element => group.blocks.push(block),
                // DATA before any ID (file-level lists)
                _ => loose.push(block),
            }
            continue;
        }
        in_element = false;

        if block.is_volatile() {
            let n = volatile.entry(block.code).or_insert(0);
            labels.insert(
                block.old_address,
                format!("!{}/{}", String::from_utf8_lossy(&block.code), n),
            );
            *n += 1;
            continue;
        }

        match block.id_code() {
            Some(code) => {
                let ordinal = ordinals.entry(code).or_insert(0);
                let mut key = block.id_name().unwrap_or_else(|| {
                    format!("{}#{}", String::from_utf8_lossy(&code), ordinal)
                });
                *ordinal += 1;

                let dupes = keys.entry(key.clone()).or_insert(0);
                if *dupes > 0 {
                    key = format!("{}#{}", key, dupes);
                }
                *dupes += 1;

                groups.push(Group {
                    key,
                    ui: block.is_ui(),
                    blocks: vec![block],
                });
                in_element = true;
            }
            None => loose.push(block),
        }
    }

    for (i, block) in loose.iter().enumerate() {
        labels.insert(block.old_address, format!("~{}", i));
    }
    for group in &groups {
        for (i, block) in group.blocks.iter().enumerate() {
            labels.insert(block.old_address, format!("{}/{}", group.key, i));
        }
    }
    // Null pointers stay null
    labels.remove(&0);

    Some(Grouped {
        loose,
        groups,
        labels,
    })
}

/// Rewrites stored pointers to other blocks of the same file as tokens
/// derived from the target's label
struct PointerMask {
    width: usize,
    endian: blend::Endian,
    tokens: HashMap<u64, [u8; 8]>,
    low: u64,
    high: u64,
}

impl PointerMask {
    fn new(header: blend::Header, labels: &HashMap<u64, String>) -> Self {
        let tokens: HashMap<u64, [u8; 8]> = labels
            .iter()
            .map(|(&address, label)| {
                let mut token = [0u8; 8];
                token.copy_from_slice(&hash::hash_bytes(label.as_bytes()).as_bytes()[..8]);
                (address, token)
            })
            .collect();
        let low = tokens.keys().copied().min().unwrap_or(u64::MAX);
        let high = tokens.keys().copied().max().unwrap_or(0);

        Self {
            width: header.pointer_size,
            endian: header.endian,
            tokens,
            low,
            high,
        }
    }

    fn word(&self, bytes: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self.endian {
            blend::Endian::Little => {
                buf[..bytes.len()].copy_from_slice(bytes);
                u64::from_le_bytes(buf)
            }
            blend::Endian::Big => {
                buf[8 - bytes.len()..].copy_from_slice(bytes);
                u64::from_be_bytes(buf)
            }
        }
    }

    /// Pointer fields are aligned to the pointer width
    fn apply<'d>(&self, data: &'d [u8]) -> Cow<'d, [u8]> {
        let mut out = Cow::Borrowed(data);
        for at in (0..data.len() / self.width).map(|i| i * self.width) {
            let value = self.word(&data[at..at + self.width]);
            if value < self.low || value > self.high {
                continue;
            }
            if let Some(token) = self.tokens.get(&value) {
                out.to_mut()[at..at + self.width].copy_from_slice(&token[..self.width]);
            }
        }
        out
    }
}

fn structural(bytes: &[u8]) -> Option<Fingerprint> {
    let file = BlendFile::parse(bytes)?;
    let header = file.header();
    let grouped = group_blocks(&file)?;
    let mask = PointerMask::new(header, &grouped.labels);

    let mut overall = IncrementalHasher::new();
    overall.update_field(&header.version.to_le_bytes());
    for block in &grouped.loose {
        feed(&mut overall, block, &mask);
    }

    let elements: Vec<Element> = grouped
        .groups
        .iter()
        .filter(|group| !group.ui)
        .map(|group| {
            let mut hasher = IncrementalHasher::new();
            for block in &group.blocks {
                feed(&mut hasher, block, &mask);
            }
            Element {
                key: group.key.clone(),
                digest: hasher.finalize(),
            }
        })
        .collect();

    for element in &elements {
        overall.update_field(element.key.as_bytes());
        overall.update(element.digest.as_bytes());
    }

    Some(Fingerprint {
        digest: overall.finalize(),
        policy: FingerprintPolicy::Structural,
        size: bytes.len() as u64,
        elements,
    })
}

fn feed(hasher: &mut IncrementalHasher, block: &blend::Block<'_>, mask: &PointerMask) {
    hasher.update(&block.code);
    hasher.update(&block.sdna_index.to_le_bytes());
    hasher.update(&block.count.to_le_bytes());
    hasher.update_field(&mask.apply(block.data));
}
