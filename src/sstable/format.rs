use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use super::block::Block;
use crate::encoding::varint::{get_uvarint, put_uvarint, MAX_VARINT_LEN};
use crate::error::Result;
use crate::hasher::{masked_crc, Hasher};
use crate::source::ReadAt;
use crate::Error;

/// "SPCLTBL1" read as a little-endian u64.
pub const TABLE_MAGIC: u64 = u64::from_le_bytes(*b"SPCLTBL1");

/// Bytes following every block: a masked CRC32C of the block contents.
pub const BLOCK_TRAILER_SIZE: usize = 4;

pub const MAX_HANDLE_LEN: usize = 2 * MAX_VARINT_LEN;

/// Two padded handles plus the magic.
pub const FOOTER_SIZE: usize = 2 * MAX_HANDLE_LEN + 8;

/// Location of a block within a table, trailer excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_uvarint(buf, self.offset);
        put_uvarint(buf, self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_HANDLE_LEN);
        self.encode_to(&mut buf);
        buf
    }

    /// Decodes a handle from the front of `data`, returning it with the number
    /// of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (offset, n) =
            get_uvarint(data).ok_or_else(|| Error::corruption("bad block handle offset"))?;
        let (size, m) =
            get_uvarint(&data[n..]).ok_or_else(|| Error::corruption("bad block handle size"))?;
        Ok((Self { offset, size }, n + m))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex: BlockHandle,
    pub index: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut handles = Vec::with_capacity(2 * MAX_HANDLE_LEN);
        self.metaindex.encode_to(&mut handles);
        self.index.encode_to(&mut handles);

        let mut buf = [0u8; FOOTER_SIZE];
        buf[..handles.len()].copy_from_slice(&handles);
        LittleEndian::write_u64(&mut buf[2 * MAX_HANDLE_LEN..], TABLE_MAGIC);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != FOOTER_SIZE {
            return Err(Error::corruption(format!(
                "table footer is {} bytes, expected {}",
                buf.len(),
                FOOTER_SIZE
            )));
        }
        let magic = LittleEndian::read_u64(&buf[2 * MAX_HANDLE_LEN..]);
        if magic != TABLE_MAGIC {
            return Err(Error::corruption(format!("bad table magic {:#018x}", magic)));
        }

        let (metaindex, n) = BlockHandle::decode(&buf[..2 * MAX_HANDLE_LEN])?;
        let (index, _) = BlockHandle::decode(&buf[n..2 * MAX_HANDLE_LEN])?;
        Ok(Self { metaindex, index })
    }
}

/// Appends the block trailer for `contents` to `buf`.
pub fn put_trailer(buf: &mut Vec<u8>, contents: &[u8]) {
    let mut hasher = Hasher::new();
    hasher.write(contents);
    // Writes into a Vec cannot fail.
    let _ = buf.write_u32::<LittleEndian>(hasher.masked());
}

/// Reads the block at `handle` from a table starting at `base`, verifying its
/// checksum.
pub fn read_block<S: ReadAt + ?Sized>(source: &S, base: u64, handle: BlockHandle) -> Result<Block> {
    let mut buf = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];
    source.read_exact_at(&mut buf, base + handle.offset)?;

    let (contents, trailer) = buf.split_at(handle.size as usize);
    if masked_crc(contents) != LittleEndian::read_u32(trailer) {
        return Err(Error::ChecksumMismatch {
            offset: handle.offset,
        });
    }

    buf.truncate(handle.size as usize);
    Block::new(buf)
}
