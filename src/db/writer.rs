use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use super::Extent;
use crate::config::Config;
use crate::error::Result;
use crate::space::SpaceBuilder;
use crate::sstable::TableWriter;
use crate::Error;

/// A byte sink the database can be written to and then made durable.
pub trait SyncWrite: Write {
    fn sync(&self) -> io::Result<()>;
}

impl SyncWrite for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }
}

impl SyncWrite for Vec<u8> {
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds a database file in one pass.
///
/// Events are buffered per space and written when the space is flushed, or
/// when the database is finalized. After [`Writer::finalize`] the file is
/// complete and every further `add` fails with [`Error::Immutable`].
///
/// A failed write leaves the file incomplete. The writer then refuses every
/// further `add`, `flush` and `finalize`.
pub struct Writer<F: SyncWrite = File> {
    path: PathBuf,
    file: BufWriter<F>,
    config: Config,
    /// Bytes written to `file` so far.
    offset: u64,
    pending: BTreeMap<Vec<u8>, SpaceBuilder>,
    written: BTreeMap<Vec<u8>, Extent>,
    finalized: bool,
    failed: bool,
}

impl Writer<File> {
    /// Creates a database file at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, Config::default())
    }

    pub fn create_with_config(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Self::from_sink(path, file, config)
    }
}

impl<F: SyncWrite> Writer<F> {
    /// Writes the database into `sink`. `path` only names it in logs.
    pub fn from_sink(path: impl Into<PathBuf>, sink: F, config: Config) -> Result<Self> {
        config.validate()?;
        let path = path.into();

        tracing::debug!(path = %path.display(), "Created database file");
        Ok(Self {
            path,
            file: BufWriter::new(sink),
            config,
            offset: 0,
            pending: BTreeMap::new(),
            written: BTreeMap::new(),
            finalized: false,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Ids of spaces holding events that have not been written yet.
    pub fn pending_spaces(&self) -> Vec<Vec<u8>> {
        self.pending.keys().cloned().collect()
    }

    /// Adds an event to `space`, creating the space on first use.
    ///
    /// `indexes` lists `(name, value)` pairs; the event becomes reachable
    /// through [`Space::scan_index`](crate::Space::scan_index) for each.
    pub fn add<I, N, V>(
        &mut self,
        space: impl AsRef<[u8]>,
        payload: impl AsRef<[u8]>,
        ordering: i64,
        grouping: impl AsRef<[u8]>,
        indexes: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.check_healthy()?;
        if self.finalized {
            return Err(Error::Immutable("database is finalized".to_string()));
        }
        let space = space.as_ref();
        if self.written.contains_key(space) {
            return Err(Error::Immutable(format!(
                "space {:?} has already been written",
                String::from_utf8_lossy(space)
            )));
        }

        let builder = self
            .pending
            .entry(space.to_vec())
            .or_insert_with(|| SpaceBuilder::new(space));
        let result = builder.add(payload.as_ref(), ordering, grouping.as_ref(), indexes);
        // A rejected first event must not leave the space behind.
        if result.is_err() && builder.is_empty() {
            self.pending.remove(space);
        }
        result
    }

    /// Writes one space now, releasing its buffered events. Unknown ids are
    /// ignored.
    pub fn flush(&mut self, space: impl AsRef<[u8]>) -> Result<()> {
        self.check_healthy()?;
        match self.pending.remove(space.as_ref()) {
            Some(builder) => self.write_space(builder),
            None => Ok(()),
        }
    }

    /// Writes every pending space, the space directory and the footer, then
    /// syncs the file. Calling again is a no-op.
    pub fn finalize(&mut self) -> Result<()> {
        self.check_healthy()?;
        if self.finalized {
            return Ok(());
        }

        while let Some((_, builder)) = self.pending.pop_first() {
            self.write_space(builder)?;
        }
        let result = self.write_directory();
        self.poison_on_error(result)?;
        self.finalized = true;

        tracing::info!(
            path = %self.path.display(),
            spaces = self.written.len(),
            size = self.offset,
            "Finalized database"
        );
        Ok(())
    }

    /// Returns the sink once everything buffered has been flushed to it.
    pub fn into_inner(self) -> Result<F> {
        self.file
            .into_inner()
            .map_err(|err| Error::IoError(err.into_error()))
    }

    fn check_healthy(&self) -> Result<()> {
        if self.failed {
            return Err(Error::InvalidOperation(format!(
                "an earlier write to {} failed, the database is incomplete",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn poison_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.failed = true;
            tracing::error!(path = %self.path.display(), error = %err, "Database write failed");
        }
        result
    }

    fn write_space(&mut self, builder: SpaceBuilder) -> Result<()> {
        let id = builder.id().to_vec();
        let result = builder.finish(&mut self.file, &self.config);
        let len = self.poison_on_error(result)?;
        self.written.insert(
            id,
            Extent {
                offset: self.offset,
                len,
            },
        );
        self.offset += len;
        Ok(())
    }

    fn write_directory(&mut self) -> Result<()> {
        let mut table = TableWriter::new(&mut self.file, &self.config);
        for (id, extent) in &self.written {
            table.set(id, &extent.encode())?;
        }
        let directory_len = table.close()?;
        self.file.write_u64::<LittleEndian>(directory_len)?;
        self.offset += directory_len + 8;

        self.file.flush()?;
        self.file.get_ref().sync()?;
        Ok(())
    }
}
