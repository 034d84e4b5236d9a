//! Immutable event-log files.
//!
//! A database file is written once by a [`Writer`] and then read by any
//! number of [`Reader`]s. Events live in named spaces; inside a space each
//! event belongs to one grouping chain and to any number of secondary index
//! chains, and every chain can be scanned most-recent-first or oldest-first.
//!
//! ```no_run
//! use spacelog::{Reader, Writer, NO_INDEXES};
//!
//! # fn main() -> spacelog::Result<()> {
//! let mut writer = Writer::create("events.db")?;
//! writer.add("customer-7", b"signup", 1, "web", [("plan", "free")])?;
//! writer.add("customer-7", b"upgrade", 2, "web", [("plan", "pro")])?;
//! writer.add("customer-7", b"login", 3, "mobile", NO_INDEXES)?;
//! writer.finalize()?;
//!
//! let reader = Reader::open("events.db")?;
//! if let Some(space) = reader.find("customer-7")? {
//!     space.scan("web", |event| {
//!         println!("{} {:?}", event.ordering, event.payload);
//!         true
//!     })?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod db;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod paging;
pub mod source;
pub mod space;
pub mod sstable;

pub use codec::{Compression, Pointer};
pub use config::Config;
pub use db::{Reader, SyncWrite, Writer, NO_INDEXES};
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use space::{Event, Space};
