//! Block codec: a logically contiguous byte stream stored as fixed-size,
//! optionally compressed blocks.
//!
//! # Block Format
//!
//! ```text
//! +------------------+---------+---------------------------+
//! | len: 2/4/8 LE    | flag: 1 | payload (len bytes)       |
//! +------------------+---------+---------------------------+
//! ```
//!
//! Every block but the last carries exactly `block_size` logical bytes. The
//! header width is fixed per stream by the configured block size (2 bytes
//! below 64KB, 4 bytes below 4GB, 8 beyond). `flag` names the codec the
//! payload was compressed with, or 0 when the payload is stored raw because no
//! codec is configured or compression did not shrink it.
//!
//! Blocks are addressed by the physical offset of their header within the
//! stream, so a [`Pointer`] (block offset + offset into the decoded block) is
//! a stable address for any logical byte.

mod read_ahead;
mod reader;
mod writer;

pub use reader::{BlockReader, BlockSource};
pub use writer::BlockWriter;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::Error;

pub const FLAG_NONE: u8 = 0;
pub const FLAG_LZ4: u8 = 1;

/// Upper bound on how many output bytes one LZ4 input byte can produce.
const LZ4_MAX_RATIO: u64 = 255;

/// Block compression codec, selected per build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
}

impl Compression {
    pub fn flag(&self) -> u8 {
        match self {
            Compression::None => FLAG_NONE,
            Compression::Lz4 => FLAG_LZ4,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self> {
        match flag {
            FLAG_NONE => Ok(Compression::None),
            FLAG_LZ4 => Ok(Compression::Lz4),
            other => Err(Error::corruption(format!(
                "unknown block compression flag {}",
                other
            ))),
        }
    }

    /// Compresses `data`, or `None` when this codec stores data raw.
    pub fn compress(&self, data: &[u8]) -> Option<Vec<u8>> {
        match self {
            Compression::None => None,
            Compression::Lz4 => Some(lz4_flex::compress_prepend_size(data)),
        }
    }

    /// Decompresses `data`, refusing to produce more than `max_len` bytes.
    ///
    /// LZ4 payloads carry their decoded length as a u32 LE prefix. The prefix
    /// must fit both `max_len` and what the payload could possibly expand to,
    /// and the decoded block must match it exactly.
    pub fn decompress(&self, data: &[u8], max_len: u64) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Lz4 => {
                if data.len() < 4 {
                    return Err(Error::Decompress("missing size prefix".to_string()));
                }
                let (prefix, body) = data.split_at(4);
                let expected = LittleEndian::read_u32(prefix) as u64;
                let expandable = (body.len() as u64)
                    .saturating_mul(LZ4_MAX_RATIO)
                    .saturating_add(LZ4_MAX_RATIO);
                if expected > max_len || expected > expandable {
                    return Err(Error::Decompress(format!(
                        "size prefix {} exceeds the {} bytes this block can hold",
                        expected,
                        max_len.min(expandable)
                    )));
                }

                let decoded = lz4_flex::block::decompress(body, expected as usize)
                    .map_err(|e| Error::Decompress(e.to_string()))?;
                if decoded.len() as u64 != expected {
                    return Err(Error::Decompress(format!(
                        "decoded {} bytes, size prefix says {}",
                        decoded.len(),
                        expected
                    )));
                }
                Ok(decoded)
            }
        }
    }
}

/// Width of the block length header, and of the intra-block half of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderWidth {
    U16,
    U32,
    U64,
}

impl HeaderWidth {
    pub fn for_block_size(block_size: usize) -> Self {
        let size = block_size as u64;
        if size < 1 << 16 {
            HeaderWidth::U16
        } else if size < 1 << 32 {
            HeaderWidth::U32
        } else {
            HeaderWidth::U64
        }
    }

    /// Largest decoded block a stream with this header width can hold.
    pub fn max_block_len(self) -> u64 {
        match self {
            HeaderWidth::U16 => u16::MAX as u64,
            HeaderWidth::U32 => u32::MAX as u64,
            HeaderWidth::U64 => u64::MAX,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            HeaderWidth::U16 => 2,
            HeaderWidth::U32 => 4,
            HeaderWidth::U64 => 8,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            HeaderWidth::U16 => 0,
            HeaderWidth::U32 => 1,
            HeaderWidth::U64 => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(HeaderWidth::U16),
            1 => Ok(HeaderWidth::U32),
            2 => Ok(HeaderWidth::U64),
            other => Err(Error::corruption(format!(
                "unknown block header width code {}",
                other
            ))),
        }
    }

    pub fn put(self, buf: &mut Vec<u8>, value: u64) {
        let mut scratch = [0u8; 8];
        LittleEndian::write_u64(&mut scratch, value);
        buf.extend_from_slice(&scratch[..self.bytes()]);
    }

    /// Reads a value from the first `self.bytes()` bytes of `data`.
    pub fn get(self, data: &[u8]) -> u64 {
        LittleEndian::read_uint(data, self.bytes())
    }
}

/// Stable address of a logical byte in a block stream: the physical offset of
/// the block holding it, and its offset within that block once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pointer {
    pub block: u64,
    pub offset: u64,
}

impl Pointer {
    pub fn new(block: u64, offset: u64) -> Self {
        Self { block, offset }
    }

    /// Encoded size: an 8-byte block offset plus a header-width intra offset.
    pub fn encoded_len(width: HeaderWidth) -> usize {
        8 + width.bytes()
    }

    pub fn encode(&self, width: HeaderWidth, buf: &mut Vec<u8>) {
        let mut block = [0u8; 8];
        LittleEndian::write_u64(&mut block, self.block);
        buf.extend_from_slice(&block);
        width.put(buf, self.offset);
    }

    pub fn decode(width: HeaderWidth, data: &[u8]) -> Result<Self> {
        if data.len() < Self::encoded_len(width) {
            return Err(Error::corruption("pointer truncated"));
        }
        Ok(Self {
            block: LittleEndian::read_u64(&data[..8]),
            offset: width.get(&data[8..]),
        })
    }
}
