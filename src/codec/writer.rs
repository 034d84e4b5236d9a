use std::io::Write;

use super::{Compression, HeaderWidth, Pointer, FLAG_NONE};
use crate::error::Result;

/// Chunks a byte stream into blocks and writes them to `sink`.
///
/// Bytes are buffered until a full block is available. Offsets reported by
/// [`BlockWriter::position`] are relative to where this writer started in the
/// sink.
pub struct BlockWriter<W: Write> {
    sink: W,
    block_size: usize,
    width: HeaderWidth,
    compression: Compression,
    buffer: Vec<u8>,
    /// Physical bytes emitted to the sink.
    written: u64,
    /// Logical bytes accepted from callers.
    logical: u64,
    blocks: u64,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(sink: W, block_size: usize, compression: Compression) -> Self {
        let block_size = block_size.max(1);
        Self {
            sink,
            block_size,
            width: HeaderWidth::for_block_size(block_size),
            compression,
            buffer: Vec::with_capacity(block_size),
            written: 0,
            logical: 0,
            blocks: 0,
        }
    }

    pub fn width(&self) -> HeaderWidth {
        self.width
    }

    /// Address the next written byte will have once its block is emitted.
    pub fn position(&self) -> Pointer {
        Pointer::new(self.written, self.buffer.len() as u64)
    }

    pub fn logical_len(&self) -> u64 {
        self.logical
    }

    pub fn physical_len(&self) -> u64 {
        self.written
    }

    pub fn block_count(&self) -> u64 {
        self.blocks
    }

    /// Buffers `data`, emitting every full block. Returns the number of bytes
    /// written to the sink by this call, 0 while still buffering.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(data);
        self.logical += data.len() as u64;

        let mut start = 0;
        let mut flushed = 0;
        while self.buffer.len() - start >= self.block_size {
            let chunk = &self.buffer[start..start + self.block_size];
            flushed += emit_block(&mut self.sink, self.width, self.compression, chunk)?;
            start += self.block_size;
            self.blocks += 1;
        }
        self.buffer.drain(..start);
        self.written += flushed as u64;
        Ok(flushed)
    }

    /// Emits any buffered bytes as a final, possibly short, block.
    pub fn flush(&mut self) -> Result<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let flushed = emit_block(&mut self.sink, self.width, self.compression, &self.buffer)?;
        self.buffer.clear();
        self.blocks += 1;
        self.written += flushed as u64;
        self.sink.flush()?;
        Ok(flushed)
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Flushes remaining bytes and returns the sink.
    pub fn finish(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }
}

fn emit_block<W: Write>(
    sink: &mut W,
    width: HeaderWidth,
    compression: Compression,
    chunk: &[u8],
) -> Result<usize> {
    let (flag, payload) = match compression.compress(chunk) {
        Some(compressed) if compressed.len() < chunk.len() => (compression.flag(), compressed),
        _ => (FLAG_NONE, chunk.to_vec()),
    };

    let mut header = Vec::with_capacity(width.bytes() + 1);
    width.put(&mut header, payload.len() as u64);
    header.push(flag);

    sink.write_all(&header)?;
    sink.write_all(&payload)?;
    Ok(header.len() + payload.len())
}
