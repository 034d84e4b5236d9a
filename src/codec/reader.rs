use std::io::{self, SeekFrom};

use super::read_ahead::ReadAhead;
use super::{Compression, HeaderWidth, Pointer};
use crate::error::Result;
use crate::source::SharedSource;
use crate::Error;

/// A block stream stored at `[base, base + len)` of a source.
#[derive(Clone)]
pub struct BlockSource {
    source: SharedSource,
    base: u64,
    len: u64,
    width: HeaderWidth,
}

impl BlockSource {
    pub fn new(source: SharedSource, base: u64, len: u64, width: HeaderWidth) -> Self {
        Self {
            source,
            base,
            len,
            width,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> HeaderWidth {
        self.width
    }

    /// Decodes the block whose header starts at `offset`, returning its bytes
    /// and the offset of the following block. `None` at end of stream.
    pub fn decode_at(&self, offset: u64) -> Result<Option<(Vec<u8>, u64)>> {
        if offset >= self.len {
            return Ok(None);
        }

        let header_len = self.width.bytes() + 1;
        if self.len - offset < header_len as u64 {
            return Err(Error::corruption(format!(
                "truncated block header at offset {}",
                offset
            )));
        }
        let mut header = [0u8; 9];
        self.source
            .read_exact_at(&mut header[..header_len], self.base + offset)?;
        let stored = self.width.get(&header);
        let flag = header[header_len - 1];

        let payload_start = offset + header_len as u64;
        if stored > self.len - payload_start {
            return Err(Error::corruption(format!(
                "block at offset {} claims {} bytes past end of stream",
                offset, stored
            )));
        }
        let mut payload = vec![0u8; stored as usize];
        self.source
            .read_exact_at(&mut payload, self.base + payload_start)?;

        let data = match Compression::from_flag(flag)? {
            Compression::None => payload,
            codec => codec.decompress(&payload, self.width.max_block_len())?,
        };
        Ok(Some((data, payload_start + stored)))
    }
}

/// Reads the logical byte stream back out of a [`BlockSource`].
///
/// With read-ahead enabled, blocks are fetched and decompressed on a
/// background thread into a bounded queue; otherwise each block is decoded on
/// demand. Both paths yield the same bytes.
pub struct BlockReader {
    blocks: BlockSource,
    read_ahead: Option<usize>,
    worker: Option<ReadAhead>,
    /// Physical offset of the next block to fetch.
    next_block: u64,
    /// Physical offset of the block held whole in `current`, if any.
    current_block: Option<u64>,
    current: Vec<u8>,
    pos: usize,
    fetched: u64,
}

impl BlockReader {
    /// A reader decoding blocks synchronously.
    pub fn new(blocks: BlockSource) -> Self {
        Self {
            blocks,
            read_ahead: None,
            worker: None,
            next_block: 0,
            current_block: None,
            current: Vec::new(),
            pos: 0,
            fetched: 0,
        }
    }

    /// A reader decoding up to `depth` blocks ahead on a background thread.
    pub fn with_read_ahead(blocks: BlockSource, depth: usize) -> Self {
        Self {
            read_ahead: Some(depth.max(1)),
            ..Self::new(blocks)
        }
    }

    /// Repositions at a block boundary of the underlying stream. Only
    /// `SeekFrom::Start` is meaningful, since block boundaries are defined by
    /// physical offsets rather than decoded ones.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let offset = match pos {
            SeekFrom::Start(offset) => offset,
            other => {
                return Err(Error::InvalidOperation(format!(
                    "block streams only seek from start, got {:?}",
                    other
                )))
            }
        };
        if offset > self.blocks.len() {
            return Err(Error::InvalidArgument(format!(
                "seek to {} beyond block stream of {} bytes",
                offset,
                self.blocks.len()
            )));
        }

        self.worker = None;
        self.current_block = None;
        self.current.clear();
        self.pos = 0;
        self.next_block = offset;
        Ok(offset)
    }

    /// Positions the reader at `pointer`. A pointer into the block already
    /// decoded is served without fetching it again.
    pub fn seek_to(&mut self, pointer: Pointer) -> Result<()> {
        if self.current_block == Some(pointer.block)
            && pointer.offset < self.current.len() as u64
        {
            self.pos = pointer.offset as usize;
            return Ok(());
        }
        self.seek(SeekFrom::Start(pointer.block))?;
        let skipped = self.skip(pointer.offset)?;
        if skipped < pointer.offset {
            return Err(Error::corruption(format!(
                "pointer {:?} lies past end of block stream",
                pointer
            )));
        }
        Ok(())
    }

    /// Number of blocks decoded so far.
    pub fn blocks_fetched(&self) -> u64 {
        self.fetched
    }

    /// Reads up to `buf.len()` bytes; 0 means end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.fill()? {
            return Ok(0);
        }
        let available = &self.current[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }

    /// Fills `buf` completely. Running out of blocks part way is a decode error.
    pub fn read_exact(&mut self, mut buf: &mut [u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.read(buf)?;
            if n == 0 {
                return Err(Error::Decode(
                    "block stream",
                    io::Error::new(io::ErrorKind::UnexpectedEof, "stream ended mid-record"),
                ));
            }
            buf = &mut buf[n..];
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if !self.fill()? {
            return Ok(None);
        }
        let byte = self.current[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Returns up to `n` upcoming bytes without consuming them. Fewer are
    /// returned only at end of stream.
    pub fn peek(&mut self, n: usize) -> Result<&[u8]> {
        while self.current.len() - self.pos < n {
            match self.fetch()? {
                Some(block) => {
                    self.current_block = None;
                    self.current.drain(..self.pos);
                    self.pos = 0;
                    self.current.extend_from_slice(&block);
                }
                None => break,
            }
        }
        let end = (self.pos + n).min(self.current.len());
        Ok(&self.current[self.pos..end])
    }

    /// Discards up to `n` bytes, returning how many were skipped.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < n {
            if !self.fill()? {
                break;
            }
            let step = ((self.current.len() - self.pos) as u64).min(n - skipped);
            self.pos += step as usize;
            skipped += step;
        }
        Ok(skipped)
    }

    /// Ensures at least one unread byte is buffered. False at end of stream.
    fn fill(&mut self) -> Result<bool> {
        while self.pos >= self.current.len() {
            let start = self.next_block;
            match self.fetch()? {
                Some(block) => {
                    self.current = block;
                    self.current_block = Some(start);
                    self.pos = 0;
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn fetch(&mut self) -> Result<Option<Vec<u8>>> {
        let decoded = match self.read_ahead {
            Some(depth) => {
                if self.worker.is_none() {
                    self.worker = Some(ReadAhead::spawn(
                        self.blocks.clone(),
                        self.next_block,
                        depth,
                    )?);
                }
                match self.worker.as_ref().and_then(|w| w.recv()) {
                    Some(result) => Some(result?),
                    None => None,
                }
            }
            None => self.blocks.decode_at(self.next_block)?,
        };

        Ok(decoded.map(|(data, next)| {
            self.next_block = next;
            self.fetched += 1;
            data
        }))
    }
}
