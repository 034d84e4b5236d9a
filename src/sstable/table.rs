//! Writing and reading a complete SortedTable.
//!
//! ## Table Layout
//!
//! ```text
//! +-------------------------+
//! | Data Block 1 | trailer  |  ← prefix-compressed entries + restart array
//! +-------------------------+
//! | ...                     |
//! +-------------------------+
//! | Data Block N | trailer  |
//! +-------------------------+
//! | Metaindex    | trailer  |  ← empty, reserved
//! +-------------------------+
//! | Index Block  | trailer  |  ← separator key → data block handle
//! +-------------------------+
//! | Footer (48 bytes)       |  ← metaindex + index handles, magic
//! +-------------------------+
//! ```
//!
//! Offsets in handles are relative to the first byte of the table, so a table
//! can be embedded anywhere inside a larger file.

use std::io::Write;
use std::sync::Arc;

use super::block::{Block, BlockIterator, Builder};
use super::format::{
    put_trailer, read_block, BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE,
};
use super::index::{short_successor, shortest_separator, Index};
use crate::config::Config;
use crate::error::Result;
use crate::source::SharedSource;
use crate::Error;

/// Builds a table from keys supplied in strictly increasing order.
pub struct TableWriter<W: Write> {
    sink: W,
    /// Bytes written so far, relative to the table start.
    offset: u64,
    block_size: usize,
    restart_interval: usize,
    data_block: Builder,
    index_block: Builder,
    last_key: Vec<u8>,
    num_entries: u64,
    data_blocks: u64,
    /// Handle of the last flushed data block, indexed once the next key is
    /// known so a short separator can be chosen.
    pending_handle: Option<BlockHandle>,
    closed: bool,
}

impl<W: Write> TableWriter<W> {
    pub fn new(sink: W, config: &Config) -> Self {
        Self {
            sink,
            offset: 0,
            block_size: config.table_block_size,
            restart_interval: config.restart_interval,
            data_block: Builder::new(config.restart_interval),
            // Index lookups decode handles at every entry, so restart at each.
            index_block: Builder::new(1),
            last_key: Vec::new(),
            num_entries: 0,
            data_blocks: 0,
            pending_handle: None,
            closed: false,
        }
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Adds an entry. Keys must be strictly increasing across calls.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation(
                "cannot add to a closed table".to_string(),
            ));
        }
        if self.num_entries > 0 && key <= self.last_key.as_slice() {
            return Err(Error::UnsortedKey {
                previous: self.last_key.clone(),
                key: key.to_vec(),
            });
        }

        if let Some(handle) = self.pending_handle.take() {
            let separator = shortest_separator(&self.last_key, key);
            self.index_block.add_entry(&separator, &handle.encode());
        }

        self.data_block.add_entry(key, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;

        if self.data_block.estimated_size() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Writes the final data block, the metaindex and index blocks, and the
    /// footer. Returns the total table length. Calling again is a no-op.
    pub fn close(&mut self) -> Result<u64> {
        if self.closed {
            return Ok(self.offset);
        }

        if !self.data_block.is_empty() || self.data_blocks == 0 {
            self.flush_data_block()?;
        }
        if let Some(handle) = self.pending_handle.take() {
            let successor = short_successor(&self.last_key);
            self.index_block.add_entry(&successor, &handle.encode());
        }

        let metaindex = self.write_block(Builder::new(self.restart_interval).finish())?;
        let index_block = std::mem::replace(&mut self.index_block, Builder::new(1));
        let index = self.write_block(index_block.finish())?;

        let footer = Footer { metaindex, index }.encode();
        self.sink.write_all(&footer)?;
        self.offset += footer.len() as u64;
        self.sink.flush()?;
        self.closed = true;

        tracing::debug!(
            entries = self.num_entries,
            data_blocks = self.data_blocks,
            size = self.offset,
            "Wrote sorted table"
        );
        Ok(self.offset)
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn flush_data_block(&mut self) -> Result<()> {
        let block = std::mem::replace(&mut self.data_block, Builder::new(self.restart_interval));
        let handle = self.write_block(block.finish())?;
        self.pending_handle = Some(handle);
        self.data_blocks += 1;
        Ok(())
    }

    fn write_block(&mut self, contents: Vec<u8>) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let mut trailer = Vec::with_capacity(BLOCK_TRAILER_SIZE);
        put_trailer(&mut trailer, &contents);

        self.sink.write_all(&contents)?;
        self.sink.write_all(&trailer)?;
        self.offset += (contents.len() + trailer.len()) as u64;
        Ok(handle)
    }
}

/// Read access to a table stored at `[base, base + len)` of a source.
#[derive(Clone)]
pub struct TableReader {
    source: SharedSource,
    base: u64,
    index: Arc<Index>,
}

impl TableReader {
    /// Parses the footer and loads the index block into memory.
    pub fn open(source: SharedSource, base: u64, len: u64) -> Result<Self> {
        if len < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "table of {} bytes is shorter than its footer",
                len
            )));
        }

        let footer_offset = len - FOOTER_SIZE as u64;
        let mut footer = [0u8; FOOTER_SIZE];
        source.read_exact_at(&mut footer, base + footer_offset)?;
        let footer = Footer::decode(&footer)?;

        for handle in [footer.metaindex, footer.index] {
            check_handle(handle, footer_offset)?;
        }
        let index = Index::from_block(read_block(&*source, base, footer.index)?)?;
        for handle in index.handles() {
            check_handle(handle, footer_offset)?;
        }

        Ok(Self {
            source,
            base,
            index: Arc::new(index),
        })
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Looks up `key`. A missing key is `Ok(None)`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.find(key).and_then(|i| self.index.get(i)) {
            Some(handle) => Arc::new(self.read_block(handle)?).get(key),
            None => Ok(None),
        }
    }

    /// An iterator positioned at the first entry with key >= `key`.
    pub fn find(&self, key: &[u8]) -> Result<TableIterator> {
        let first = self.index.find(key).unwrap_or(self.index.len());
        let mut iter = TableIterator {
            table: self.clone(),
            next_block: first,
            current: None,
            failed: false,
        };
        if iter.load_next_block()? {
            if let Some(current) = iter.current.as_mut() {
                current.seek(key)?;
            }
        }
        Ok(iter)
    }

    /// An iterator over every entry in key order.
    pub fn iter(&self) -> Result<TableIterator> {
        self.find(&[])
    }

    fn read_block(&self, handle: BlockHandle) -> Result<Block> {
        read_block(&*self.source, self.base, handle)
    }
}

fn check_handle(handle: BlockHandle, limit: u64) -> Result<()> {
    let end = handle
        .offset
        .checked_add(handle.size)
        .and_then(|end| end.checked_add(BLOCK_TRAILER_SIZE as u64));
    match end {
        Some(end) if end <= limit => Ok(()),
        _ => Err(Error::corruption(format!(
            "block handle {:?} outside table of {} bytes",
            handle, limit
        ))),
    }
}

/// Forward iterator over a table, loading data blocks as earlier ones are
/// exhausted. Stops after the first error.
pub struct TableIterator {
    table: TableReader,
    next_block: usize,
    current: Option<BlockIterator>,
    failed: bool,
}

impl TableIterator {
    fn load_next_block(&mut self) -> Result<bool> {
        match self.table.index.get(self.next_block) {
            Some(handle) => {
                let block = Arc::new(self.table.read_block(handle)?);
                self.current = Some(block.iter());
                self.next_block += 1;
                Ok(true)
            }
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }
}

impl Iterator for TableIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok(entry)) => return Some(Ok(entry)),
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    None => {}
                }
            }

            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn small_blocks() -> Config {
        Config::new().table_block_size(256).restart_interval(4)
    }

    fn build(entries: &[(Vec<u8>, Vec<u8>)], config: &Config) -> Vec<u8> {
        let mut writer = TableWriter::new(Vec::new(), config);
        for (key, value) in entries {
            writer.set(key, value).expect("Failed to add entry");
        }
        writer.close().expect("Failed to close table");
        writer.into_inner()
    }

    fn open(bytes: Vec<u8>) -> TableReader {
        let len = bytes.len() as u64;
        TableReader::open(Arc::new(bytes), 0, len).expect("Failed to open table")
    }

    fn numbered(count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..count)
            .map(|i| {
                let key = format!("key_{:04}", i).into_bytes();
                let value = format!("value_{:04}", i).into_bytes();
                (key, value)
            })
            .collect()
    }

    #[test]
    fn test_write_and_read() {
        let entries = vec![
            (b"apple".to_vec(), b"fruit".to_vec()),
            (b"application".to_vec(), b"software".to_vec()),
            (b"banana".to_vec(), b"fruit".to_vec()),
            (b"band".to_vec(), b"music".to_vec()),
            (b"bandana".to_vec(), b"clothing".to_vec()),
        ];
        let table = open(build(&entries, &Config::default()));

        for (key, value) in entries {
            let result = table
                .get(&key)
                .expect("Error during read")
                .expect("Key not found");
            assert_eq!(result, value, "Value mismatch for key {:?}", key);
        }
        assert!(table.get(b"apricot").unwrap().is_none());
        assert!(table.get(b"zzz").unwrap().is_none());
        assert!(table.get(b"").unwrap().is_none());
    }

    #[test]
    fn test_many_keys_across_blocks() {
        let entries = numbered(1000);
        let table = open(build(&entries, &small_blocks()));
        assert!(table.block_count() > 10);

        for (key, value) in &entries {
            assert_eq!(table.get(key).unwrap().as_ref(), Some(value));
        }
        for i in 0..1000 {
            let missing = format!("key_{:04}x", i).into_bytes();
            assert!(table.get(&missing).unwrap().is_none());
        }

        let all: Vec<_> = table.iter().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(all, entries);
    }

    #[test]
    fn test_find_spans_block_boundaries() {
        let entries = numbered(500);
        let table = open(build(&entries, &small_blocks()));

        let from_middle: Vec<_> = table
            .find(b"key_0250")
            .unwrap()
            .map(|r| r.unwrap().0)
            .collect();
        let expected: Vec<_> = entries[250..].iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(from_middle, expected);

        // Between two keys: lands on the next one.
        let mut iter = table.find(b"key_0099~").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().0, b"key_0100");

        assert!(table.find(b"zzz").unwrap().next().is_none());
    }

    #[test]
    fn test_empty_table() {
        let table = open(build(&[], &Config::default()));
        assert_eq!(table.block_count(), 1);
        assert!(table.get(b"anything").unwrap().is_none());
        assert!(table.iter().unwrap().next().is_none());
    }

    #[test]
    fn test_out_of_order_keys_are_rejected() {
        let mut writer = TableWriter::new(Vec::new(), &Config::default());
        writer.set(b"b", b"1").unwrap();
        let err = writer.set(b"a", b"2").unwrap_err();
        assert!(matches!(err, Error::UnsortedKey { .. }));
        assert!(err.is_corruption());
        assert!(matches!(
            writer.set(b"b", b"3"),
            Err(Error::UnsortedKey { .. })
        ));
        writer.set(b"c", b"4").unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut writer = TableWriter::new(Vec::new(), &Config::default());
        writer.set(b"k", b"v").unwrap();
        let len = writer.close().unwrap();
        assert_eq!(writer.close().unwrap(), len);
        assert!(matches!(
            writer.set(b"z", b"v"),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(writer.into_inner().len() as u64, len);
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let entries = numbered(200);
        let mut bytes = build(&entries, &small_blocks());
        // Inside the first data block.
        bytes[10] ^= 0x40;
        let table = open(bytes);

        let err = table.get(b"key_0000").unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { offset: 0 }));
        assert!(err.is_corruption());

        assert!(matches!(
            table.iter().err(),
            Some(Error::ChecksumMismatch { .. })
        ));
        // Later blocks are still readable.
        assert_eq!(
            table.get(b"key_0199").unwrap(),
            Some(b"value_0199".to_vec())
        );
    }

    #[test]
    fn test_iteration_stops_at_corrupt_block() {
        let entries = numbered(200);
        let clean = build(&entries, &small_blocks());
        let clean_table = open(clean.clone());
        let second = clean_table.index.get(1).unwrap();

        let mut bytes = clean;
        bytes[second.offset as usize + 2] ^= 0x01;
        let table = open(bytes);

        let results: Vec<_> = table.iter().unwrap().collect();
        let last = results.last().unwrap();
        assert!(matches!(last, Err(Error::ChecksumMismatch { .. })));
        assert!(results[..results.len() - 1].iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_bad_footer() {
        let mut bytes = build(&numbered(3), &Config::default());
        let len = bytes.len();
        bytes[len - 2] ^= 0xFF;
        let err = TableReader::open(Arc::new(bytes), 0, len as u64).err().unwrap();
        assert!(matches!(err, Error::Corruption(_)));

        let err = TableReader::open(Arc::new(vec![0u8; 10]), 0, 10).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_table_embedded_in_file() {
        let temp = NamedTempFile::new().expect("Failed to create temp file");
        let mut file = temp.as_file();
        file.write_all(b"leading bytes").unwrap();

        let entries = numbered(50);
        let mut writer = TableWriter::new(&mut file, &small_blocks());
        for (key, value) in &entries {
            writer.set(key, value).unwrap();
        }
        let len = writer.close().unwrap();
        file.write_all(b"trailing").unwrap();

        let source: SharedSource = Arc::new(temp.reopen().unwrap());
        let table = TableReader::open(source, 13, len).unwrap();
        assert_eq!(table.get(b"key_0042").unwrap(), Some(b"value_0042".to_vec()));
    }
}
