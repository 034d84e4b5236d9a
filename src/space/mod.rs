//! Spaces: one logical partition of events, stored as many chains sharing a
//! single block stream.
//!
//! # Space Layout
//!
//! ```text
//! +-------+---------------------------+-----------------+-------------------+
//! | magic | block stream (all chains) | chain directory | dir len (u64 LE)  |
//! +-------+---------------------------+-----------------+-------------------+
//! ```
//!
//! The magic byte's high nibble identifies the format; its low nibble is the
//! block header width code, so readers need no configuration to decode it.
//!
//! # Chains
//!
//! A grouping chain holds framed events, most recent first, and ends with a
//! zero frame length:
//!
//! ```text
//! +----------------+-----------------+--------------+---------+     +---------+
//! | len (u32 LE)   | ordering zigzag | payload len  | payload | ... | 0 (u32) |
//! +----------------+-----------------+--------------+---------+     +---------+
//! ```
//!
//! An index chain holds fixed-size [`Pointer`]s to events in grouping chains,
//! in the same order. Its length comes from the directory entry.
//!
//! The chain directory is a SortedTable keyed by `"g" + grouping` and
//! `"i" + name + ":" + value`, each mapping to a [`ChainLocation`].

mod builder;
mod event;
mod reader;

pub use builder::SpaceBuilder;
pub use event::{chain_order, Event};
pub use reader::Space;

use crate::codec::{HeaderWidth, Pointer};
use crate::encoding::varint::{get_uvarint, put_uvarint};
use crate::error::Result;
use crate::Error;

const SPACE_MAGIC: u8 = 0xA0;
const MAGIC_MASK: u8 = 0xF0;

const GROUPING_PREFIX: u8 = b'g';
const INDEX_PREFIX: u8 = b'i';
const INDEX_SEPARATOR: u8 = b':';

fn magic_byte(width: HeaderWidth) -> u8 {
    SPACE_MAGIC | width.code()
}

fn parse_magic(byte: u8) -> Result<HeaderWidth> {
    if byte & MAGIC_MASK != SPACE_MAGIC {
        return Err(Error::corruption(format!("bad space magic {:#04x}", byte)));
    }
    HeaderWidth::from_code(byte & !MAGIC_MASK)
}

fn grouping_key(grouping: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + grouping.len());
    key.push(GROUPING_PREFIX);
    key.extend_from_slice(grouping);
    key
}

/// Directory key prefix shared by every value of index `name`.
fn index_prefix(name: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + name.len());
    key.push(INDEX_PREFIX);
    key.extend_from_slice(name);
    key.push(INDEX_SEPARATOR);
    key
}

fn index_key(name: &[u8], value: &[u8]) -> Vec<u8> {
    let mut key = index_prefix(name);
    key.extend_from_slice(value);
    key
}

/// Where a chain starts in the block stream and how many logical bytes it
/// spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLocation {
    pub start: Pointer,
    pub len: u64,
}

impl ChainLocation {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, self.start.block);
        put_uvarint(&mut buf, self.start.offset);
        put_uvarint(&mut buf, self.len);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let mut field = || -> Result<u64> {
            let (value, n) = get_uvarint(&data[pos..])
                .ok_or_else(|| Error::corruption("truncated chain location"))?;
            pos += n;
            Ok(value)
        };
        let block = field()?;
        let offset = field()?;
        let len = field()?;
        Ok(Self {
            start: Pointer::new(block, offset),
            len,
        })
    }
}
