//! Database files: many spaces behind one directory.
//!
//! # File Layout
//!
//! ```text
//! +----------+-----+----------+-----------------+-------------------+
//! | space #1 | ... | space #N | space directory | dir len (u64 LE)  |
//! +----------+-----+----------+-----------------+-------------------+
//! ```
//!
//! The space directory is a SortedTable mapping each space id to the offset
//! and length of its bytes.

mod reader;
mod writer;

pub use reader::Reader;
pub use writer::{SyncWrite, Writer};

use crate::encoding::varint::{get_uvarint, put_uvarint};
use crate::error::Result;
use crate::Error;

/// An empty index list for [`Writer::add`].
pub const NO_INDEXES: [(&[u8], &[u8]); 0] = [];

/// Byte range of one space within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Extent {
    pub offset: u64,
    pub len: u64,
}

impl Extent {
    fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.len)
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_uvarint(&mut buf, self.offset);
        put_uvarint(&mut buf, self.len);
        buf
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let (offset, n) =
            get_uvarint(data).ok_or_else(|| Error::corruption("truncated space offset"))?;
        let (len, _) =
            get_uvarint(&data[n..]).ok_or_else(|| Error::corruption("truncated space length"))?;
        Ok(Self { offset, len })
    }
}
