//! An embedded, persistent key-value store based on log-structured merging (LSM).
//!
//! ##### About
//!
//! Writes are buffered in an in-memory sorted table (the memtable) and appended
//! to a write-ahead log for durability. When the memtable grows past a
//! threshold, it is frozen and flushed to an immutable, sorted, indexed table
//! file. Background compaction merges table files to keep read amplification
//! and disk usage in check.
//!
//! Every write is assigned a monotonically increasing snapshot id. Reads and
//! range scans are snapshot-consistent: a reader only observes tuples whose
//! snapshot id is less than or equal to its own, even while flushes and
//! compactions run concurrently.
//!
//! Deletes are tombstones: a tuple with an empty value shadows older versions
//! of the same key until compaction can safely drop both.
//!
//! # Example usage
//!
//! ```
//! use heftydb::Config;
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let db = Config::new(&folder).open()?;
//!
//! let snapshot = db.put("planet", "saturn")?;
//! assert_eq!(Some("saturn".as_bytes().into()), db.get("planet")?);
//!
//! db.put("planet", "neptune")?;
//!
//! // The old version stays readable at its snapshot
//! assert_eq!(
//!     Some("saturn".as_bytes().into()),
//!     db.get_at("planet", snapshot)?,
//! );
//!
//! db.delete("planet")?;
//! assert_eq!(None, db.get("planet")?);
//! #
//! # Ok::<(), heftydb::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e.into())),
        }
    };
}

pub(crate) use fail_iter;

#[doc(hidden)]
pub mod binary_search;

mod cache;
mod coding;

pub mod compaction;

mod config;
mod db;

#[doc(hidden)]
pub mod descriptor_table;

mod error;
mod executor;

#[doc(hidden)]
pub mod file;

mod flush;
mod hash;
mod key;

#[doc(hidden)]
pub mod memtable;

#[doc(hidden)]
pub mod merge;

mod metrics;
mod read;
mod recover;
mod slice;
mod snapshot;

#[doc(hidden)]
pub mod stop_signal;

#[doc(hidden)]
pub mod table;

mod tables;
mod value;

#[doc(hidden)]
pub mod wal;

mod write;

/// KV-tuple, typically returned by an iterator
pub type KvPair = (UserKey, UserValue);

#[doc(hidden)]
pub use {
    descriptor_table::DescriptorTable,
    key::Key,
    memtable::Memtable,
    merge::BoxedIterator,
    table::{SsTable, TableBuilder},
    tables::{TableHandle, Tables},
    value::Tuple,
};

pub use {
    cache::Caches,
    config::{CompactionPolicy, Config},
    db::{CompactionHandle, Database, DbIterator},
    error::{DecodeError, Error, Result},
    metrics::Metrics,
    snapshot::Snapshots,
    value::{GenerationId, SnapshotId},
};

pub use slice::Slice;

/// User defined key
pub type UserKey = Slice;

/// User defined data (byte array)
pub type UserValue = Slice;
