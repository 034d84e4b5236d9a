use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::Extent;
use crate::config::Config;
use crate::error::Result;
use crate::paging::PagingBuffer;
use crate::source::SharedSource;
use crate::space::Space;
use crate::sstable::TableReader;
use crate::Error;

/// Read-only access to a finalized database file.
///
/// Opening reads only the footer and the space directory's index. Cloning is
/// cheap and clones share the underlying file through positioned reads.
#[derive(Clone)]
pub struct Reader {
    source: SharedSource,
    directory: TableReader,
    /// Start of the space directory, and so the end of the last space.
    directory_offset: u64,
    config: Config,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = Self::from_source(Arc::new(file), config)?;
        tracing::info!(path = %path.as_ref().display(), "Opened database");
        Ok(reader)
    }

    /// Opens a database held by any positioned-read source.
    pub fn from_source(source: SharedSource, config: Config) -> Result<Self> {
        config.validate()?;
        let size = source.size()?;
        if size < 8 {
            return Err(Error::corruption(format!(
                "database of {} bytes is shorter than its footer",
                size
            )));
        }

        let mut paging = PagingBuffer::new(source.clone(), 0, size, config.page_size);
        let directory_len = paging.pop_fixed64()?;
        let directory_offset = (size - 8).checked_sub(directory_len).ok_or_else(|| {
            Error::corruption(format!(
                "space directory of {} bytes exceeds database of {} bytes",
                directory_len, size
            ))
        })?;
        let directory = TableReader::open(source.clone(), directory_offset, directory_len)?;

        Ok(Self {
            source,
            directory,
            directory_offset,
            config,
        })
    }

    /// Looks up a space. A space that was never written is `Ok(None)`.
    pub fn find(&self, id: impl AsRef<[u8]>) -> Result<Option<Space>> {
        let id = id.as_ref();
        let Some(value) = self.directory.get(id)? else {
            return Ok(None);
        };

        let extent = Extent::decode(&value)?;
        if extent.end().map_or(true, |end| end > self.directory_offset) {
            return Err(Error::corruption(format!(
                "space {:?} at {:?} overlaps the space directory",
                String::from_utf8_lossy(id),
                extent
            )));
        }
        Space::open(id, self.source.clone(), extent.offset, extent.len, &self.config).map(Some)
    }

    /// Ids of every space in the database, in byte order.
    pub fn spaces(&self) -> Result<Vec<Vec<u8>>> {
        self.directory
            .iter()?
            .map(|entry| entry.map(|(id, _)| id))
            .collect()
    }
}
