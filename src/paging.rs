//! Bidirectional paged access to a bounded byte range.
//!
//! A `PagingBuffer` decodes values from both ends of `[start, limit)` while
//! only holding a few pages in memory. The front cursor advances with
//! [`PagingBuffer::pull`], the back cursor retreats with [`PagingBuffer::pop`].
//! Back pages are stored byte-reversed so popping is a drain from the front of
//! the back buffer.
//!
//! ```text
//!  start      offset                         end_offset      limit
//!    |----------|==== front ===>   <=== back ====|-------------|
//! ```
//!
//! The cursors never cross. Once they meet the range is exhausted and every
//! further pull or pop yields nothing, which typed decodes report as zero.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Result;
use crate::source::SharedSource;
use crate::Error;

pub struct PagingBuffer {
    source: SharedSource,
    start: u64,
    limit: u64,
    offset: u64,
    end_offset: u64,
    page_size: usize,
    /// Bytes `[offset, offset + front.len())` in source order.
    front: Vec<u8>,
    /// Bytes `[end_offset - back.len(), end_offset)` in reverse order.
    back: Vec<u8>,
}

impl PagingBuffer {
    pub fn new(source: SharedSource, start: u64, limit: u64, page_size: usize) -> Self {
        let limit = limit.max(start);
        Self {
            source,
            start,
            limit,
            offset: start,
            end_offset: limit,
            page_size: page_size.max(1),
            front: Vec::new(),
            back: Vec::new(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Bytes left between the two cursors.
    pub fn remaining(&self) -> u64 {
        self.end_offset - self.offset
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Takes `n` bytes from the front. Returns fewer when the cursors meet.
    pub fn pull(&mut self, n: usize) -> Result<Vec<u8>> {
        let n = n.min(self.remaining() as usize);
        if self.front.len() < n {
            self.fill_front(n)?;
        }
        let out: Vec<u8> = self.front.drain(..n).collect();
        self.offset += n as u64;
        Ok(out)
    }

    /// Takes `n` bytes from the back, returned in source order. Returns fewer
    /// when the cursors meet.
    pub fn pop(&mut self, n: usize) -> Result<Vec<u8>> {
        let n = n.min(self.remaining() as usize);
        if self.back.len() < n {
            self.fill_back(n)?;
        }
        let mut out: Vec<u8> = self.back.drain(..n).collect();
        out.reverse();
        self.end_offset -= n as u64;
        Ok(out)
    }

    pub fn pull_u8(&mut self) -> Result<u8> {
        Ok(self.pull(1)?.first().copied().unwrap_or(0))
    }

    pub fn pull_fixed16(&mut self) -> Result<u16> {
        let bytes = padded(self.pull(2)?, 2);
        Ok(LittleEndian::read_u16(&bytes))
    }

    pub fn pull_fixed32(&mut self) -> Result<u32> {
        let bytes = padded(self.pull(4)?, 4);
        Ok(LittleEndian::read_u32(&bytes))
    }

    pub fn pull_fixed64(&mut self) -> Result<u64> {
        let bytes = padded(self.pull(8)?, 8);
        Ok(LittleEndian::read_u64(&bytes))
    }

    pub fn pop_fixed16(&mut self) -> Result<u16> {
        let bytes = padded(self.pop(2)?, 2);
        Ok(LittleEndian::read_u16(&bytes))
    }

    pub fn pop_fixed32(&mut self) -> Result<u32> {
        let bytes = padded(self.pop(4)?, 4);
        Ok(LittleEndian::read_u32(&bytes))
    }

    pub fn pop_fixed64(&mut self) -> Result<u64> {
        let bytes = padded(self.pop(8)?, 8);
        Ok(LittleEndian::read_u64(&bytes))
    }

    /// Pops a little-endian unsigned integer of `width` bytes (at most 8).
    pub fn pop_fixed(&mut self, width: usize) -> Result<u64> {
        let bytes = padded(self.pop(width.min(8))?, 8);
        Ok(LittleEndian::read_u64(&bytes))
    }

    /// Pulls an unsigned varint. An exhausted range yields zero; a range that
    /// ends in the middle of a varint is corrupt.
    pub fn pull_uvarint(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = match self.pull(1)?.first() {
                Some(&b) => b,
                None if shift == 0 => return Ok(0),
                None => return Err(Error::corruption("varint truncated by end of range")),
            };
            if shift >= 64 {
                return Err(Error::corruption("varint overflows 64 bits"));
            }
            value |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// Rewinds both cursors to the original bounds.
    pub fn reset(&mut self) {
        self.offset = self.start;
        self.end_offset = self.limit;
        self.front.clear();
        self.back.clear();
    }

    /// Moves the window, keeping its length, to begin at `new_start` in the
    /// same source.
    pub fn move_to(&mut self, new_start: u64, new_page_size: usize) -> Result<()> {
        let len = self.limit - self.start;
        let limit = new_start.checked_add(len).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "window of {} bytes at offset {} overflows",
                len, new_start
            ))
        })?;
        self.start = new_start;
        self.limit = limit;
        self.page_size = new_page_size.max(1);
        self.reset();
        Ok(())
    }

    fn fill_front(&mut self, n: usize) -> Result<()> {
        let from = self.offset + self.front.len() as u64;
        let want = self.page_size.max(n - self.front.len()) as u64;
        let to = (from + want).min(self.end_offset);
        if to <= from {
            return Ok(());
        }

        let mut page = vec![0u8; (to - from) as usize];
        self.source.read_exact_at(&mut page, from)?;
        self.front.extend_from_slice(&page);
        Ok(())
    }

    fn fill_back(&mut self, n: usize) -> Result<()> {
        let to = self.end_offset - self.back.len() as u64;
        let want = self.page_size.max(n - self.back.len()) as u64;
        let from = to.saturating_sub(want).max(self.offset);
        if to <= from {
            return Ok(());
        }

        let mut page = vec![0u8; (to - from) as usize];
        self.source.read_exact_at(&mut page, from)?;
        page.reverse();
        self.back.extend_from_slice(&page);
        Ok(())
    }
}

fn padded(mut bytes: Vec<u8>, width: usize) -> Vec<u8> {
    bytes.resize(width, 0);
    bytes
}
