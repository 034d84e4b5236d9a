use std::collections::BTreeMap;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use super::event::{body_len, chain_order, check_body_len, Event, TERMINATOR};
use super::{grouping_key, index_key, magic_byte, ChainLocation, INDEX_SEPARATOR};
use crate::codec::{BlockWriter, HeaderWidth, Pointer};
use crate::config::Config;
use crate::error::Result;
use crate::sstable::TableWriter;
use crate::Error;

/// Buffers the events of one space until it is written out in one pass.
pub struct SpaceBuilder {
    id: Vec<u8>,
    events: Vec<Event>,
    /// Grouping name → ids into `events`, in insertion order.
    groupings: BTreeMap<Vec<u8>, Vec<usize>>,
    /// Index directory key → ids into `events`, in insertion order.
    indexes: BTreeMap<Vec<u8>, Vec<usize>>,
}

impl SpaceBuilder {
    pub fn new(id: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            events: Vec::new(),
            groupings: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Adds an event to `grouping` and to one index chain per `(name, value)`
    /// pair. Index names may not contain `:`, and an encoded event must fit
    /// in 4GB.
    pub fn add<I, N, V>(
        &mut self,
        payload: &[u8],
        ordering: i64,
        grouping: &[u8],
        indexes: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        check_body_len(body_len(ordering, payload.len()))?;
        let mut keys = Vec::new();
        for (name, value) in indexes {
            let name = name.as_ref();
            if name.contains(&INDEX_SEPARATOR) {
                return Err(Error::InvalidArgument(format!(
                    "index name {:?} contains ':'",
                    String::from_utf8_lossy(name)
                )));
            }
            let key = index_key(name, value.as_ref());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let id = self.events.len();
        self.events.push(Event::new(ordering, payload));
        self.groupings.entry(grouping.to_vec()).or_default().push(id);
        for key in keys {
            self.indexes.entry(key).or_default().push(id);
        }
        Ok(())
    }

    /// Writes the space to `sink`, returning the number of bytes written.
    ///
    /// Grouping chains are written first so every event's [`Pointer`] is known
    /// before the index chains referencing it.
    pub fn finish<W: Write>(self, mut sink: W, config: &Config) -> Result<u64> {
        let SpaceBuilder {
            id,
            events,
            groupings,
            indexes,
        } = self;

        let mut directory: BTreeMap<Vec<u8>, ChainLocation> = BTreeMap::new();
        let mut pointers = vec![Pointer::default(); events.len()];

        let width = HeaderWidth::for_block_size(config.block_size);
        sink.write_all(&[magic_byte(width)])?;
        let mut stream = BlockWriter::new(&mut sink, config.block_size, config.compression);

        let mut buf = Vec::new();
        for (grouping, mut ids) in groupings {
            ids.sort_by(|&a, &b| chain_order(&events[a], &events[b]));

            let start = stream.position();
            let before = stream.logical_len();
            for id in ids {
                pointers[id] = stream.position();
                buf.clear();
                events[id].encode_record(&mut buf);
                stream.write(&buf)?;
            }
            stream.write(&TERMINATOR)?;

            let len = stream.logical_len() - before;
            directory.insert(grouping_key(&grouping), ChainLocation { start, len });
        }

        for (key, mut ids) in indexes {
            ids.sort_by(|&a, &b| chain_order(&events[a], &events[b]));

            let start = stream.position();
            let before = stream.logical_len();
            buf.clear();
            for id in ids {
                pointers[id].encode(width, &mut buf);
            }
            stream.write(&buf)?;

            let len = stream.logical_len() - before;
            directory.insert(key, ChainLocation { start, len });
        }

        stream.flush()?;
        let stream_len = stream.physical_len();
        let blocks = stream.block_count();
        drop(stream);

        let mut table = TableWriter::new(&mut sink, config);
        for (key, location) in &directory {
            table.set(key, &location.encode())?;
        }
        let directory_len = table.close()?;
        sink.write_u64::<LittleEndian>(directory_len)?;

        let size = 1 + stream_len + directory_len + 8;
        tracing::debug!(
            space = %String::from_utf8_lossy(&id),
            events = events.len(),
            chains = directory.len(),
            blocks,
            size,
            "Wrote space"
        );
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::db::NO_INDEXES;

    #[test]
    fn test_rejects_separator_in_index_name() {
        let mut builder = SpaceBuilder::new("space");
        let err = builder
            .add(b"payload", 1, b"", [("bad:name", "value")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(builder.is_empty());

        // Values may contain the separator.
        builder.add(b"payload", 1, b"", [("name", "a:b")]).unwrap();
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_finish_reports_bytes_written() {
        let mut builder = SpaceBuilder::new("space");
        for i in 0..100i64 {
            builder
                .add(
                    format!("event {}", i).as_bytes(),
                    i,
                    b"all",
                    [("parity", (i % 2).to_string())],
                )
                .unwrap();
        }
        builder.add(b"lonely", 0, b"other", NO_INDEXES).unwrap();

        let config = Config::new().block_size(64).compression(Compression::None);
        let mut out = Vec::new();
        let size = builder.finish(&mut out, &config).unwrap();
        assert_eq!(size, out.len() as u64);
        assert_eq!(out[0], magic_byte(HeaderWidth::U16));
    }
}
