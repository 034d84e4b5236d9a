//! Sorted String Table: an immutable, ordered key-value directory.
//!
//! Every offset index in a database file is a SortedTable: the map from chain
//! names to chain locations inside a space, and the map from space ids to
//! space locations inside the file.
//!
//! ## Data Block Entry
//!
//! ```text
//! +--------------+----------------+--------------+-------------+-------+
//! | shared varint| unshared varint| value varint | key suffix  | value |
//! +--------------+----------------+--------------+-------------+-------+
//! ```
//!
//! Every `restart_interval` entries a key is stored in full. The offsets of
//! these restart points follow the entries as u32 LE values, then their count.
//! Each block is followed by a 4-byte masked CRC32C of its contents.
//!
//! ## Footer
//!
//! ```text
//! +---------------------------+-------------------+---------------+
//! | metaindex handle (varints)| index handle      | magic (8)     |
//! +---------------------------+-------------------+---------------+
//! |<---------- padded to 40 bytes --------------->|
//! ```

pub mod block;
pub mod format;
pub mod index;
pub mod table;

pub use format::BlockHandle;
pub use table::{TableIterator, TableReader, TableWriter};
