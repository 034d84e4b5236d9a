use std::sync::Arc;

use super::event::{read_record, Event};
use super::{grouping_key, index_key, index_prefix, parse_magic, ChainLocation, GROUPING_PREFIX};
use crate::codec::{BlockReader, BlockSource, HeaderWidth, Pointer};
use crate::config::Config;
use crate::error::Result;
use crate::paging::PagingBuffer;
use crate::source::SharedSource;
use crate::sstable::TableReader;
use crate::Error;

/// Read-only view of one space. Cheap to clone; every scan opens its own
/// readers, so clones can be scanned from different threads at once.
#[derive(Clone)]
pub struct Space {
    id: Vec<u8>,
    blocks: BlockSource,
    directory: TableReader,
    read_ahead: Option<usize>,
    page_size: usize,
}

impl Space {
    /// Opens the space stored at `[base, base + len)`, reading only its magic
    /// byte, footer, and chain directory index.
    pub fn open(
        id: impl Into<Vec<u8>>,
        source: SharedSource,
        base: u64,
        len: u64,
        config: &Config,
    ) -> Result<Self> {
        let id = id.into();
        if len < 9 {
            return Err(Error::corruption(format!(
                "space of {} bytes is shorter than its header and footer",
                len
            )));
        }

        let mut paging = PagingBuffer::new(source.clone(), base, base + len, config.page_size);
        let width = parse_magic(paging.pull_u8()?)?;
        let directory_len = paging.pop_fixed64()?;
        let stream_len = (len - 9).checked_sub(directory_len).ok_or_else(|| {
            Error::corruption(format!(
                "chain directory of {} bytes exceeds space of {} bytes",
                directory_len, len
            ))
        })?;

        let blocks = BlockSource::new(source.clone(), base + 1, stream_len, width);
        let directory = TableReader::open(source, base + 1 + stream_len, directory_len)?;

        Ok(Self {
            id,
            blocks,
            directory,
            read_ahead: config.read_ahead.then_some(config.read_ahead_depth),
            page_size: config.page_size,
        })
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Visits the events of `grouping`, most recent first, until `visitor`
    /// returns false. A missing grouping visits nothing.
    pub fn scan<F>(&self, grouping: impl AsRef<[u8]>, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Event) -> bool,
    {
        let Some(location) = self.locate(&grouping_key(grouping.as_ref()))? else {
            return Ok(());
        };

        let mut reader = self.sequential_reader();
        reader.seek_to(location.start)?;
        let mut remaining = location.len;
        while let Some(event) = next_in_chain(&mut reader, &mut remaining)? {
            if !visitor(&event) {
                break;
            }
        }
        Ok(())
    }

    /// Visits the events of `grouping`, oldest first.
    pub fn scan_reverse<F>(&self, grouping: impl AsRef<[u8]>, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Event) -> bool,
    {
        for event in self.events(grouping)?.iter().rev() {
            if !visitor(event) {
                break;
            }
        }
        Ok(())
    }

    /// Visits the events tagged with index `name` = `value`, most recent
    /// first.
    pub fn scan_index<F>(
        &self,
        name: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Event) -> bool,
    {
        let key = index_key(name.as_ref(), value.as_ref());
        let Some(location) = self.locate(&key)? else {
            return Ok(());
        };
        let count = self.pointer_count(&location)?;

        let mut pointers = self.sequential_reader();
        pointers.seek_to(location.start)?;
        let mut events = BlockReader::new(self.blocks.clone());

        let width = self.blocks.width();
        let mut buf = vec![0u8; Pointer::encoded_len(width)];
        for _ in 0..count {
            pointers.read_exact(&mut buf)?;
            let event = self.event_at(&mut events, Pointer::decode(width, &buf)?)?;
            if !visitor(&event) {
                break;
            }
        }
        Ok(())
    }

    /// Visits the events tagged with index `name` = `value`, oldest first.
    ///
    /// The pointer list is read once, then consumed from its tail.
    pub fn scan_index_reverse<F>(
        &self,
        name: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&Event) -> bool,
    {
        let key = index_key(name.as_ref(), value.as_ref());
        let Some(location) = self.locate(&key)? else {
            return Ok(());
        };
        let count = self.pointer_count(&location)?;

        let mut chain = vec![0u8; location.len as usize];
        let mut reader = self.sequential_reader();
        reader.seek_to(location.start)?;
        reader.read_exact(&mut chain)?;
        drop(reader);

        let width = self.blocks.width();
        let mut pointers = PagingBuffer::new(Arc::new(chain), 0, location.len, self.page_size);
        let mut events = BlockReader::new(self.blocks.clone());
        for _ in 0..count {
            let offset = pointers.pop_fixed(width.bytes())?;
            let block = pointers.pop_fixed64()?;
            let event = self.event_at(&mut events, Pointer::new(block, offset))?;
            if !visitor(&event) {
                break;
            }
        }
        Ok(())
    }

    /// All events of `grouping`, most recent first.
    pub fn events(&self, grouping: impl AsRef<[u8]>) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        self.scan(grouping, |event| {
            events.push(event.clone());
            true
        })?;
        Ok(events)
    }

    /// All events tagged with index `name` = `value`, most recent first.
    pub fn index_events(
        &self,
        name: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        self.scan_index(name, value, |event| {
            events.push(event.clone());
            true
        })?;
        Ok(events)
    }

    /// Names of every grouping in the space, in byte order.
    pub fn groupings(&self) -> Result<Vec<Vec<u8>>> {
        self.list_keys(&[GROUPING_PREFIX])
    }

    /// Every value recorded for index `name`, in byte order.
    pub fn index_values(&self, name: impl AsRef<[u8]>) -> Result<Vec<Vec<u8>>> {
        self.list_keys(&index_prefix(name.as_ref()))
    }

    /// Directory keys starting with `prefix`, with the prefix removed.
    fn list_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for entry in self.directory.find(prefix)? {
            let (key, _) = entry?;
            match key.strip_prefix(prefix) {
                Some(rest) => keys.push(rest.to_vec()),
                None => break,
            }
        }
        Ok(keys)
    }

    fn locate(&self, key: &[u8]) -> Result<Option<ChainLocation>> {
        match self.directory.get(key)? {
            Some(value) => ChainLocation::decode(&value).map(Some),
            None => Ok(None),
        }
    }

    fn pointer_count(&self, location: &ChainLocation) -> Result<u64> {
        let size = Pointer::encoded_len(self.blocks.width()) as u64;
        if location.len % size != 0 {
            return Err(Error::corruption(format!(
                "index chain of {} bytes is not a whole number of pointers",
                location.len
            )));
        }
        Ok(location.len / size)
    }

    fn sequential_reader(&self) -> BlockReader {
        match self.read_ahead {
            Some(depth) => BlockReader::with_read_ahead(self.blocks.clone(), depth),
            None => BlockReader::new(self.blocks.clone()),
        }
    }

    fn event_at(&self, reader: &mut BlockReader, pointer: Pointer) -> Result<Event> {
        reader.seek_to(pointer)?;
        let mut remaining = u64::MAX;
        next_in_chain(reader, &mut remaining)?.ok_or_else(|| {
            Error::corruption(format!("pointer {:?} addresses a chain terminator", pointer))
        })
    }

    /// Width of block headers and intra-block pointer offsets.
    pub fn width(&self) -> HeaderWidth {
        self.blocks.width()
    }
}

/// Decodes the next event of a grouping chain with `remaining` logical bytes
/// left. `None` at the terminator.
fn next_in_chain(reader: &mut BlockReader, remaining: &mut u64) -> Result<Option<Event>> {
    if *remaining < 4 {
        return Err(Error::corruption("grouping chain ends without a terminator"));
    }
    match read_record(reader)? {
        Some((event, consumed)) => {
            *remaining = remaining.checked_sub(consumed).ok_or_else(|| {
                Error::corruption("grouping chain record overruns its directory length")
            })?;
            Ok(Some(event))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Compression;
    use crate::space::SpaceBuilder;

    fn payloads(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|e| String::from_utf8_lossy(&e.payload).into_owned())
            .collect()
    }

    fn open(builder: SpaceBuilder, config: &Config) -> Space {
        let id = builder.id().to_vec();
        let mut bytes = vec![0xEE; 5];
        let size = builder.finish(&mut bytes, config).unwrap();
        let source: SharedSource = Arc::new(bytes);
        Space::open(id, source, 5, size, config).unwrap()
    }

    fn configs() -> Vec<Config> {
        vec![
            Config::default(),
            Config::new().block_size(32).compression(Compression::None),
            Config::new().block_size(48).read_ahead(false),
            Config::new().block_size(1 << 16).read_ahead_depth(1),
        ]
    }

    #[test]
    fn test_scan_orders_most_recent_first() {
        for config in configs() {
            let mut builder = SpaceBuilder::new("a");
            builder.add(b"1", 2, b"", [("i1", "")]).unwrap();
            builder.add(b"2", 3, b"", [("i2", "")]).unwrap();
            builder.add(b"3", 1, b"", [("i1", "")]).unwrap();
            let space = open(builder, &config);

            assert_eq!(payloads(&space.events("").unwrap()), vec!["2", "1", "3"]);
            assert_eq!(
                payloads(&space.index_events("i1", "").unwrap()),
                vec!["1", "3"]
            );

            let mut reversed = Vec::new();
            space
                .scan_index_reverse("i1", "", |e| {
                    reversed.push(e.payload.clone());
                    true
                })
                .unwrap();
            assert_eq!(reversed, vec![b"3".to_vec(), b"1".to_vec()]);

            let orderings: Vec<_> = space
                .events("")
                .unwrap()
                .iter()
                .map(|e| e.ordering)
                .collect();
            assert_eq!(orderings, vec![3, 2, 1]);
        }
    }

    #[test]
    fn test_equal_orderings_tie_break_on_payload() {
        let mut builder = SpaceBuilder::new("ties");
        for payload in ["c", "a", "b", "a"] {
            builder
                .add(payload.as_bytes(), 7, b"g", [("k", "v")])
                .unwrap();
        }
        builder.add(b"z", 8, b"g", [("k", "v")]).unwrap();
        let space = open(builder, &Config::default());

        let expected = vec!["z", "a", "a", "b", "c"];
        assert_eq!(payloads(&space.events("g").unwrap()), expected);
        assert_eq!(payloads(&space.index_events("k", "v").unwrap()), expected);
    }

    #[test]
    fn test_visitor_stops_early() {
        let mut builder = SpaceBuilder::new("s");
        for i in 0..50i64 {
            builder
                .add(&i.to_le_bytes(), i, b"", [("all", "yes")])
                .unwrap();
        }
        let space = open(builder, &Config::new().block_size(64));

        let mut seen = 0;
        space
            .scan("", |_| {
                seen += 1;
                seen < 3
            })
            .unwrap();
        assert_eq!(seen, 3);

        let mut seen = 0;
        space
            .scan_index_reverse("all", "yes", |e| {
                seen += 1;
                assert_eq!(e.ordering, seen - 1);
                seen < 10
            })
            .unwrap();
        assert_eq!(seen, 10);
    }

    #[test]
    fn test_reverse_is_forward_reversed_for_every_length() {
        let config = Config::new().block_size(40);
        for n in 0..25i64 {
            let mut builder = SpaceBuilder::new("s");
            for i in 0..n {
                let payload = format!("event-{}", i);
                builder
                    .add(payload.as_bytes(), (i * 7) % 5, b"g", [("idx", "v")])
                    .unwrap();
            }
            builder.add(b"anchor", 0, b"other", [("other", "v")]).unwrap();
            let space = open(builder, &config);

            let forward = space.events("g").unwrap();
            let mut backward = Vec::new();
            space
                .scan_reverse("g", |e| {
                    backward.push(e.clone());
                    true
                })
                .unwrap();
            backward.reverse();
            assert_eq!(forward, backward);
            assert_eq!(forward.len(), n as usize);

            let forward = space.index_events("idx", "v").unwrap();
            let mut backward = Vec::new();
            space
                .scan_index_reverse("idx", "v", |e| {
                    backward.push(e.clone());
                    true
                })
                .unwrap();
            backward.reverse();
            assert_eq!(forward, backward);
            assert_eq!(forward, space.events("g").unwrap());
        }
    }

    #[test]
    fn test_missing_chains_yield_nothing() {
        let mut builder = SpaceBuilder::new("s");
        builder.add(b"x", 1, b"g", [("k", "v")]).unwrap();
        let space = open(builder, &Config::default());

        assert!(space.events("nope").unwrap().is_empty());
        assert!(space.index_events("k", "other").unwrap().is_empty());
        assert!(space.index_events("nope", "v").unwrap().is_empty());
        space.scan_reverse("nope", |_| panic!("visited")).unwrap();
        space.scan_index_reverse("k", "w", |_| panic!("visited")).unwrap();
    }

    #[test]
    fn test_enumerates_groupings_and_index_values() {
        let mut builder = SpaceBuilder::new("s");
        builder
            .add(b"1", 1, b"beta", [("user", "bob"), ("kind", "click")])
            .unwrap();
        builder.add(b"2", 2, b"alpha", [("user", "alice")]).unwrap();
        builder
            .add(b"3", 3, b"", [("user", "bob"), ("user2", "carol")])
            .unwrap();
        let space = open(builder, &Config::default());

        assert_eq!(
            space.groupings().unwrap(),
            vec![b"".to_vec(), b"alpha".to_vec(), b"beta".to_vec()]
        );
        assert_eq!(
            space.index_values("user").unwrap(),
            vec![b"alice".to_vec(), b"bob".to_vec()]
        );
        assert_eq!(space.index_values("kind").unwrap(), vec![b"click".to_vec()]);
        assert!(space.index_values("missing").unwrap().is_empty());
        assert_eq!(space.id(), b"s");
    }

    #[test]
    fn test_events_span_many_blocks() {
        let config = Config::new().block_size(100);
        let mut builder = SpaceBuilder::new("big");
        let payload = vec![0xAB; 1000];
        for i in 0..20i64 {
            builder
                .add(&payload, i, b"g", [("n", (i % 3).to_string())])
                .unwrap();
        }
        let space = open(builder, &config);
        assert_eq!(space.width(), HeaderWidth::U16);

        let events = space.events("g").unwrap();
        assert_eq!(events.len(), 20);
        assert!(events.iter().all(|e| e.payload == payload));
        let zeros = space.index_events("n", "0").unwrap();
        assert_eq!(
            zeros.iter().map(|e| e.ordering).collect::<Vec<_>>(),
            vec![18, 15, 12, 9, 6, 3, 0]
        );
    }

    #[test]
    fn test_corrupt_space_header() {
        let mut builder = SpaceBuilder::new("s");
        builder.add(b"x", 1, b"g", crate::db::NO_INDEXES).unwrap();
        let mut bytes = Vec::new();
        let size = builder.finish(&mut bytes, &Config::default()).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = 0x11;
        let err = Space::open("s", Arc::new(bad_magic), 0, size, &Config::default())
            .err()
            .unwrap();
        assert!(err.is_corruption());

        let mut bad_footer = bytes;
        let len = bad_footer.len();
        bad_footer[len - 8..].copy_from_slice(&u64::MAX.to_le_bytes());
        let err = Space::open("s", Arc::new(bad_footer), 0, size, &Config::default())
            .err()
            .unwrap();
        assert!(err.is_corruption());

        let err = Space::open("s", Arc::new(vec![0u8; 4]), 0, 4, &Config::default())
            .err()
            .unwrap();
        assert!(err.is_corruption());
    }
}
