use std::cmp::Ordering;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::encoding::varint::{get_uvarint, put_uvarint};
use crate::{error::Result, Error};

pub struct Builder {
    buffer: Vec<u8>,
    restart_positions: Vec<u32>,
    restart_interval: usize,
    entry_count: usize,
    last_key: Vec<u8>,
}

impl Builder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buffer: Vec::new(),
            restart_positions: Vec::new(),
            restart_interval: restart_interval.max(1),
            entry_count: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry. Keys must arrive in strictly increasing order; the
    /// table writer enforces this before calling.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8]) {
        let shared_prefix_len = if self.entry_count % self.restart_interval == 0 {
            self.restart_positions.push(self.buffer.len() as u32);
            0
        } else {
            shared_prefix_length(&self.last_key, key)
        };
        let unshared = &key[shared_prefix_len..];

        put_uvarint(&mut self.buffer, shared_prefix_len as u64);
        put_uvarint(&mut self.buffer, unshared.len() as u64);
        put_uvarint(&mut self.buffer, value.len() as u64);
        self.buffer.extend_from_slice(unshared);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
    }

    /// Size of the block if finished now, restart array included.
    pub fn estimated_size(&self) -> usize {
        self.buffer.len() + 4 * self.restart_positions.len().max(1) + 4
    }

    /// Appends the restart array and its length, returning the block contents.
    pub fn finish(mut self) -> Vec<u8> {
        if self.restart_positions.is_empty() {
            self.restart_positions.push(0);
        }
        for pos in &self.restart_positions {
            // Writes into a Vec cannot fail.
            let _ = self.buffer.write_u32::<LittleEndian>(*pos);
        }
        let _ = self
            .buffer
            .write_u32::<LittleEndian>(self.restart_positions.len() as u32);
        self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

fn shared_prefix_length(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|&(a, b)| a == b).count()
}

#[derive(Clone, Debug)]
pub struct Block {
    data: Vec<u8>,
    restart_positions: Vec<u32>,
}

impl Block {
    pub fn new(mut data: Vec<u8>) -> Result<Self> {
        let data_len = data.len();
        if data_len < 4 {
            return Err(Error::corruption("block shorter than its restart count"));
        }

        let num_restarts_offset = data_len - 4;
        let num_restarts = LittleEndian::read_u32(&data[num_restarts_offset..]) as usize;

        let restart_array_size = num_restarts
            .checked_mul(4)
            .filter(|&size| size <= num_restarts_offset)
            .ok_or_else(|| Error::corruption("block too short for its restart array"))?;

        let restart_array_offset = num_restarts_offset - restart_array_size;
        let restart_positions: Vec<u32> = data[restart_array_offset..num_restarts_offset]
            .chunks_exact(4)
            .map(LittleEndian::read_u32)
            .collect();
        if restart_positions
            .iter()
            .any(|&pos| pos as usize > restart_array_offset)
        {
            return Err(Error::corruption("restart point outside block"));
        }

        data.truncate(restart_array_offset);
        Ok(Self {
            data,
            restart_positions,
        })
    }

    pub fn get(self: &Arc<Self>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut iter = Arc::clone(self).iter();
        iter.seek(key)?;
        match iter.next() {
            Some(Ok((found_key, value))) if found_key == key => Ok(Some(value)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    pub fn iter(self: Arc<Self>) -> BlockIterator {
        BlockIterator::new(self)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

pub struct BlockIterator {
    block: Arc<Block>,
    current_offset: usize,
    last_key: Vec<u8>,
    /// An entry already decoded by `seek`, returned by the next `next()`.
    pending: Option<(Vec<u8>, Vec<u8>)>,
}

impl BlockIterator {
    pub fn new(block: Arc<Block>) -> Self {
        let initial_offset = block.restart_positions.first().map_or(0, |&p| p as usize);
        Self {
            block,
            current_offset: initial_offset,
            last_key: Vec::new(),
            pending: None,
        }
    }

    /// Reads the full key stored at a restart point.
    fn read_key_at(&self, offset: usize) -> Result<Vec<u8>> {
        let (shared_len, unshared_len, _value_len, pos) = self.read_header(offset)?;
        if shared_len != 0 {
            return Err(Error::corruption("restart point key has a shared prefix"));
        }
        Ok(self.block.data[pos..pos + unshared_len].to_vec())
    }

    /// Decodes the three varint lengths of the entry at `offset`, returning
    /// them with the offset of the key suffix.
    fn read_header(&self, offset: usize) -> Result<(usize, usize, usize, usize)> {
        let data = &self.block.data;
        let mut pos = offset;
        let mut field = |name: &'static str| -> Result<usize> {
            let (value, n) = get_uvarint(&data[pos.min(data.len())..])
                .ok_or_else(|| Error::corruption(format!("truncated {} in block entry", name)))?;
            pos += n;
            Ok(value as usize)
        };
        let shared_len = field("shared_len")?;
        let unshared_len = field("unshared_len")?;
        let value_len = field("value_len")?;

        let end = pos
            .checked_add(unshared_len)
            .and_then(|p| p.checked_add(value_len));
        match end {
            Some(end) if end <= data.len() => Ok((shared_len, unshared_len, value_len, pos)),
            _ => Err(Error::corruption("block entry out of bounds")),
        }
    }

    /// Positions the iterator so the next call to `next()` returns the first
    /// entry with key >= `target`, or `None` if there is no such entry.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.pending = None;
        if self.block.data.is_empty() {
            return Ok(());
        }

        // Binary search for the last restart point whose key is < target.
        let restarts = &self.block.restart_positions;
        let mut left = 0;
        let mut right = restarts.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let key = self.read_key_at(restarts[mid] as usize)?;
            match key.as_slice().cmp(target) {
                Ordering::Less => left = mid + 1,
                _ => right = mid,
            }
        }
        let restart_index = left.saturating_sub(1);

        self.current_offset = restarts.get(restart_index).map_or(0, |&p| p as usize);
        self.last_key.clear();

        while let Some(result) = self.next() {
            let (key, value) = result?;
            if key.as_slice() >= target {
                self.pending = Some((key, value));
                break;
            }
        }
        Ok(())
    }
}

impl Iterator for BlockIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.pending.take() {
            return Some(Ok(entry));
        }
        if self.current_offset >= self.block.data.len() {
            return None;
        }

        let (shared_len, unshared_len, value_len, mut pos) =
            match self.read_header(self.current_offset) {
                Ok(header) => header,
                Err(e) => {
                    self.current_offset = self.block.data.len();
                    return Some(Err(e));
                }
            };
        if shared_len > self.last_key.len() {
            self.current_offset = self.block.data.len();
            return Some(Err(Error::corruption(
                "shared prefix longer than previous key",
            )));
        }

        let data = &self.block.data;
        let mut key = Vec::with_capacity(shared_len + unshared_len);
        key.extend_from_slice(&self.last_key[..shared_len]);
        key.extend_from_slice(&data[pos..pos + unshared_len]);
        pos += unshared_len;

        let value = data[pos..pos + value_len].to_vec();
        pos += value_len;

        self.current_offset = pos;
        self.last_key.clone_from(&key);

        Some(Ok((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fruit_block(restart_interval: usize) -> (Arc<Block>, Vec<(Vec<u8>, Vec<u8>)>) {
        let entries = vec![
            (b"apple".to_vec(), b"fruit".to_vec()),
            (b"application".to_vec(), b"software".to_vec()),
            (b"banana".to_vec(), b"fruit".to_vec()),
            (b"band".to_vec(), b"music".to_vec()),
            (b"bandana".to_vec(), b"clothing".to_vec()),
        ];
        let mut builder = Builder::new(restart_interval);
        for (key, value) in &entries {
            builder.add_entry(key, value);
        }
        let block = Block::new(builder.finish()).expect("Failed to create block");
        (Arc::new(block), entries)
    }

    #[test]
    fn test_block_builder_and_reader() {
        for restart_interval in [1, 2, 16] {
            let (block, entries) = fruit_block(restart_interval);

            for (key, value) in &entries {
                let result = block.get(key).unwrap().unwrap();
                assert_eq!(&result, value);
            }
            assert!(block.get(b"unknown").unwrap().is_none());
            assert!(block.get(b"aardvark").unwrap().is_none());
            // Lookups borrow the shared block rather than keeping a handle.
            assert_eq!(Arc::strong_count(&block), 1);

            let collected: Vec<_> = block.clone().iter().map(|r| r.unwrap()).collect();
            assert_eq!(collected, entries);
        }
    }

    #[test]
    fn test_seek() {
        let (block, _) = fruit_block(2);
        let mut iter = block.iter();

        iter.seek(b"band").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, b"band");
        assert_eq!(iter.next().unwrap().unwrap().0, b"bandana");
        assert!(iter.next().is_none());

        iter.seek(b"bana").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, b"banana");

        iter.seek(b"").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, b"apple");

        iter.seek(b"zebra").unwrap();
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_prefix_compression_shrinks_block() {
        let mut compressed = Builder::new(16);
        let mut uncompressed = Builder::new(1);
        for i in 0..32 {
            let key = format!("shared/prefix/key_{:03}", i);
            compressed.add_entry(key.as_bytes(), b"v");
            uncompressed.add_entry(key.as_bytes(), b"v");
        }
        assert!(compressed.len() < uncompressed.len());
        assert_eq!(compressed.entry_count(), 32);
    }

    #[test]
    fn test_empty_block() {
        let builder = Builder::new(16);
        assert!(builder.is_empty());
        assert_eq!(builder.estimated_size(), 8);
        let block = Arc::new(Block::new(builder.finish()).unwrap());
        assert_eq!(block.size(), 0);
        assert!(block.get(b"any").unwrap().is_none());
        assert!(block.iter().next().is_none());
    }

    #[test]
    fn test_malformed_block() {
        assert!(Block::new(vec![1, 2]).unwrap_err().is_corruption());
        // Claims 1000 restart points in an 8-byte block.
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&1000u32.to_le_bytes());
        assert!(Block::new(data).unwrap_err().is_corruption());
    }
}
