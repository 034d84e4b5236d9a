//! In-memory form of a table's index block.

use std::sync::Arc;

use super::block::Block;
use super::format::BlockHandle;
use crate::error::Result;

/// Ordered separator keys and the data blocks they bound. Every key in block
/// `i` is <= `entries[i].0` and > `entries[i - 1].0`.
#[derive(Debug, Clone, Default)]
pub struct Index {
    entries: Vec<(Vec<u8>, BlockHandle)>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: Vec<u8>, handle: BlockHandle) {
        self.entries.push((key, handle));
    }

    /// Decodes an index block.
    pub fn from_block(block: Block) -> Result<Self> {
        let mut index = Self::new();
        for entry in Arc::new(block).iter() {
            let (key, value) = entry?;
            let (handle, _) = BlockHandle::decode(&value)?;
            index.push(key, handle);
        }
        Ok(index)
    }

    /// Position of the only block that may contain `key`: the first whose
    /// separator is >= `key`. `None` when `key` sorts after every block.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        let pos = self
            .entries
            .partition_point(|(separator, _)| separator.as_slice() < key);
        (pos < self.entries.len()).then_some(pos)
    }

    pub fn get(&self, index: usize) -> Option<BlockHandle> {
        self.entries.get(index).map(|(_, handle)| *handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = BlockHandle> + '_ {
        self.entries.iter().map(|(_, handle)| *handle)
    }
}

/// A short key `k` with `start <= k < limit`, used as the index entry between
/// two adjacent blocks.
pub fn shortest_separator(start: &[u8], limit: &[u8]) -> Vec<u8> {
    let min_len = start.len().min(limit.len());
    let diff = start
        .iter()
        .zip(limit.iter())
        .take_while(|&(a, b)| a == b)
        .count();

    if diff < min_len {
        let byte = start[diff];
        if byte < 0xFF && byte + 1 < limit[diff] {
            let mut separator = start[..=diff].to_vec();
            separator[diff] += 1;
            return separator;
        }
    }
    start.to_vec()
}

/// A short key `k >= key`, used as the index entry after the last block.
pub fn short_successor(key: &[u8]) -> Vec<u8> {
    match key.iter().position(|&b| b != 0xFF) {
        Some(i) => {
            let mut successor = key[..=i].to_vec();
            successor[i] += 1;
            successor
        }
        None => key.to_vec(),
    }
}
