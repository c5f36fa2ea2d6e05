//! An embedded log-structured merge-tree key-value store.
//!
//! Writes land in a write-ahead log and an in-memory skip list; full
//! memtables are flushed to immutable sorted table files; a background
//! worker compacts size tiers of tables and garbage-collects deleted
//! entries. Crash recovery rebuilds state from the manifest and the WAL.
//!
//! ```no_run
//! use siltdb::{Options, DB};
//!
//! let db = DB::open("/tmp/silt", Options::default())?;
//! db.put(b"key", b"value")?;
//! assert_eq!(db.get(b"key")?, Some(b"value".to_vec()));
//! db.close()?;
//! # Ok::<(), siltdb::Error>(())
//! ```

pub mod bloom;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod types;
pub mod wal;

pub use db::{Options, Scan, Stats, DB};
pub use error::{Error, Result};
pub use wal::SyncPolicy;
