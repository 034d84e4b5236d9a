use crate::codec::Compression;
use crate::error::Result;
use crate::Error;

/// Configuration shared by writers and readers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logical bytes per block in a space's block stream (default: 32KB).
    /// Also selects the width of block headers and intra-block pointers.
    pub block_size: usize,

    /// Block compression codec (default: LZ4)
    pub compression: Compression,

    /// Target size of a SortedTable data block (default: 4KB)
    pub table_block_size: usize,

    /// Entries between full-key restart points in a SortedTable block (default: 16)
    pub restart_interval: usize,

    /// Decode blocks on a background thread while scanning (default: true)
    pub read_ahead: bool,

    /// Decoded blocks buffered ahead of the consumer (default: 20)
    pub read_ahead_depth: usize,

    /// Page size used when parsing footers and directories (default: 4KB)
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 32 * 1024, // 32KB
            compression: Compression::Lz4,
            table_block_size: 4 * 1024, // 4KB
            restart_interval: 16,
            read_ahead: true,
            read_ahead_depth: 20,
            page_size: 4 * 1024, // 4KB
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block stream chunk size
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the block compression codec
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the SortedTable data block target size
    pub fn table_block_size(mut self, size: usize) -> Self {
        self.table_block_size = size;
        self
    }

    /// Set the SortedTable restart interval
    pub fn restart_interval(mut self, interval: usize) -> Self {
        self.restart_interval = interval;
        self
    }

    /// Enable or disable background read-ahead
    pub fn read_ahead(mut self, enabled: bool) -> Self {
        self.read_ahead = enabled;
        self
    }

    /// Set the read-ahead queue depth
    pub fn read_ahead_depth(mut self, depth: usize) -> Self {
        self.read_ahead_depth = depth;
        self
    }

    /// Set the paging buffer page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::InvalidArgument("block_size must be positive".into()));
        }
        if self.table_block_size == 0 {
            return Err(Error::InvalidArgument(
                "table_block_size must be positive".into(),
            ));
        }
        if self.restart_interval == 0 {
            return Err(Error::InvalidArgument(
                "restart_interval must be positive".into(),
            ));
        }
        if self.read_ahead_depth == 0 {
            return Err(Error::InvalidArgument(
                "read_ahead_depth must be positive".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidArgument("page_size must be positive".into()));
        }
        Ok(())
    }
}
