//! Minimal `.blend` container reader
//!
//! Walks file blocks without interpreting DNA structs. That is enough to
//! group blocks into top-level ID elements and to leave out the blocks that
//! change on every save without a user edit.
//!
//! Supported containers:
//! - legacy header `BLENDER_v300` / `BLENDER-V279` (4 or 8 byte pointers, either endianness)
//! - large-block header `BLENDER17-01v0500`
//! - gzip or zstd compressed variants of both

use std::borrow::Cow;
use std::io::Read;
use thiserror::Error;

const MAGIC: &[u8] = b"BLENDER";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// Blocks that never carry scene content: thumbnail, render info, global
/// file info (path, build hash), struct schema and user preferences
const VOLATILE_CODES: &[&[u8; 4]] = &[b"TEST", b"REND", b"GLOB", b"DNA1", b"USER"];

/// ID types holding editor UI state only (window manager, screens, workspaces)
const UI_ID_CODES: &[&[u8; 2]] = &[b"WM", b"SR", b"WS"];

/// How far into an ID block the name is searched for
const NAME_SEARCH_WINDOW: usize = 256;

/// Longest ID name including the two-letter type prefix
const MAX_ID_NAME: usize = 66;

/// Largest decompressed body a compressed container may expand to
pub const MAX_DECOMPRESSED: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
#[error("malformed block at offset {offset}")]
pub struct Malformed {
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub pointer_size: usize,
    pub endian: Endian,
    pub version: u16,
    /// 64-bit block lengths (`BLENDER17-01` files)
    pub large_blocks: bool,
    len: usize,
}

impl Header {
    fn parse(buf: &[u8]) -> Option<Self> {
        if !buf.starts_with(MAGIC) {
            return None;
        }

        if buf.len() >= 17 && &buf[7..10] == b"17-" && buf[12] == b'v' {
            let version = parse_digits(&buf[13..17])?;
            parse_digits(&buf[10..12])?;
            return Some(Self {
                pointer_size: 8,
                endian: Endian::Little,
                version,
                large_blocks: true,
                len: 17,
            });
        }

        if buf.len() < 12 {
            return None;
        }
        let pointer_size = match buf[7] {
            b'_' => 4,
            b'-' => 8,
            _ => return None,
        };
        let endian = match buf[8] {
            b'v' => Endian::Little,
            b'V' => Endian::Big,
            _ => return None,
        };
        Some(Self {
            pointer_size,
            endian,
            version: parse_digits(&buf[9..12])?,
            large_blocks: false,
            len: 12,
        })
    }

    fn block_header_len(&self) -> usize {
        if self.large_blocks {
            32
        } else {
            16 + self.pointer_size
        }
    }
}

fn parse_digits(bytes: &[u8]) -> Option<u16> {
    bytes.iter().try_fold(0u16, |acc, &b| {
        b.is_ascii_digit().then(|| acc * 10 + u16::from(b - b'0'))
    })
}

/// One file block
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    pub code: [u8; 4],
    /// Memory address the block had when saved. It changes between sessions
    /// and is only good for resolving pointers stored in other blocks.
    pub old_address: u64,
    pub sdna_index: u32,
    pub count: u64,
    pub data: &'a [u8],
}

impl<'a> Block<'a> {
    pub fn is_volatile(&self) -> bool {
        VOLATILE_CODES.iter().any(|code| **code == self.code)
    }

    pub fn is_data(&self) -> bool {
        &self.code == b"DATA"
    }

    /// Two-letter ID type for blocks that start a datablock (`OB\0\0`)
    pub fn id_code(&self) -> Option<[u8; 2]> {
        let [a, b, c, d] = self.code;
        (a.is_ascii_uppercase() && b.is_ascii_uppercase() && c == 0 && d == 0).then_some([a, b])
    }

    pub fn is_ui(&self) -> bool {
        self.id_code()
            .is_some_and(|code| UI_ID_CODES.iter().any(|ui| **ui == code))
    }

    /// ID name such as `OBCube`, found by scanning for the type prefix
    pub fn id_name(&self) -> Option<String> {
        let code = self.id_code()?;
        let window = &self.data[..self.data.len().min(NAME_SEARCH_WINDOW)];

        window
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| *pair == code)
            .find_map(|(start, _)| {
                let rest = &window[start..];
                let end = rest.iter().position(|&b| b == 0)?;
                let name = &rest[..end];
                let printable = name[2..].iter().all(|&b| b >= 0x20 && b != 0x7f);
                (end > 2 && end <= MAX_ID_NAME && printable)
                    .then(|| String::from_utf8_lossy(name).into_owned())
            })
    }
}

/// Read at most `limit` bytes; `None` if there is more
fn inflate(decoder: impl Read, limit: u64) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    decoder
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .ok()?;
    (out.len() as u64 <= limit).then_some(out)
}

/// A decoded `.blend` file
pub struct BlendFile<'a> {
    header: Header,
    body: Cow<'a, [u8]>,
}

impl<'a> BlendFile<'a> {
    /// Recognise and, if needed, decompress a `.blend` container.
    /// Returns `None` for anything that is not one.
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        Self::parse_bounded(raw, MAX_DECOMPRESSED)
    }

    /// Like [`BlendFile::parse`], but a compressed body that would expand past
    /// `limit` bytes is rejected
    pub fn parse_bounded(raw: &'a [u8], limit: u64) -> Option<Self> {
        let body: Cow<'a, [u8]> = if raw.starts_with(MAGIC) {
            Cow::Borrowed(raw)
        } else if raw.starts_with(GZIP_MAGIC) {
            Cow::Owned(inflate(flate2::read::GzDecoder::new(raw), limit)?)
        } else if raw.starts_with(ZSTD_MAGIC) {
            Cow::Owned(inflate(zstd::stream::read::Decoder::new(raw).ok()?, limit)?)
        } else {
            return None;
        };

        let header = Header::parse(&body)?;
        Some(Self { header, body })
    }

    pub fn header(&self) -> Header {
        self.header
    }

    /// Iterate blocks up to (not including) `ENDB`
    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter {
            buf: &self.body,
            pos: self.header.len,
            header: self.header,
            done: false,
        }
    }
}

pub struct BlockIter<'a> {
    buf: &'a [u8],
    pos: usize,
    header: Header,
    done: bool,
}

impl<'a> BlockIter<'a> {
    fn read_u32(&self, at: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.buf.get(at..at + 4)?.try_into().ok()?;
        Some(match self.header.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, at: usize) -> Option<u64> {
        let bytes: [u8; 8] = self.buf.get(at..at + 8)?.try_into().ok()?;
        Some(match self.header.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    fn next_block(&mut self) -> Option<Block<'a>> {
        let at = self.pos;
        let code: [u8; 4] = self.buf.get(at..at + 4)?.try_into().ok()?;

        let (old_address, sdna_index, len, count) = if self.header.large_blocks {
            (
                self.read_u64(at + 8)?,
                self.read_u32(at + 4)?,
                self.read_u64(at + 16)?,
                self.read_u64(at + 24)?,
            )
        } else {
            let ptr = self.header.pointer_size;
            let old_address = if ptr == 4 {
                u64::from(self.read_u32(at + 8)?)
            } else {
                self.read_u64(at + 8)?
            };
            (
                old_address,
                self.read_u32(at + 8 + ptr)?,
                u64::from(self.read_u32(at + 4)?),
                u64::from(self.read_u32(at + 12 + ptr)?),
            )
        };

        let start = at + self.header.block_header_len();
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        let data = self.buf.get(start..end)?;
        self.pos = end;

        Some(Block {
            code,
            old_address,
            sdna_index,
            count,
            data,
        })
    }
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Result<Block<'a>, Malformed>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.pos;
        match self.next_block() {
            Some(block) if &block.code == b"ENDB" => {
                self.done = true;
                None
            }
            Some(block) => Some(Ok(block)),
            None => {
                // Truncated file or a length running past the end
                self.done = true;
                Some(Err(Malformed { offset }))
            }
        }
    }
}

/// Human-readable category for an ID type code
pub fn kind_name(code: [u8; 2]) -> Cow<'static, str> {
    let name = match &code {
        b"OB" => "Object",
        b"ME" => "Mesh",
        b"MA" => "Material",
        b"TE" => "Texture",
        b"IM" => "Image",
        b"CA" => "Camera",
        b"LA" => "Light",
        b"WO" => "World",
        b"SC" => "Scene",
        b"GR" => "Collection",
        b"AC" => "Action",
        b"NT" => "NodeTree",
        b"CU" => "Curve",
        b"AR" => "Armature",
        b"BR" => "Brush",
        b"TX" => "Text",
        b"MC" => "MovieClip",
        b"SO" => "Sound",
        b"PA" => "ParticleSettings",
        b"LI" => "Library",
        b"GD" => "GreasePencil",
        b"LS" => "LineStyle",
        b"MB" => "Metaball",
        b"LT" => "Lattice",
        b"SK" => "ShapeKey",
        b"PL" => "Palette",
        b"VO" => "Volume",
        _ => return Cow::Owned(String::from_utf8_lossy(&code).into_owned()),
    };
    Cow::Borrowed(name)
}
