pub mod merge;

pub use merge::MergeIterator;

use crate::error::Result;
use crate::types::{InternalKey, Value};

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable snapshot, block, SSTable, merged view)
/// implements this trait, yielding entries in (user_key ASC, sequence DESC)
/// order. This enables composability — `MergeIterator` takes
/// `Vec<Box<dyn StorageIterator>>` and merges them.
pub trait StorageIterator {
    /// The current internal key. Only valid when `is_valid()` is true.
    fn key(&self) -> &InternalKey;

    /// The current value. Only valid when `is_valid()` is true.
    fn value(&self) -> &[u8];

    /// Whether the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advance to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Position at the first entry with user key >= `user_key`.
    fn seek(&mut self, user_key: &[u8]) -> Result<()>;
}

/// An owned, pre-sorted run of entries exposed through `StorageIterator`.
///
/// Used for frozen/active memtable snapshots taken under the state lock, so
/// scans and flushes never hold a lock while streaming.
pub struct VecIterator {
    entries: Vec<(InternalKey, Value)>,
    index: usize,
}

impl VecIterator {
    /// `entries` must already be in (user_key ASC, sequence DESC) order.
    pub fn new(entries: Vec<(InternalKey, Value)>) -> Self {
        VecIterator { entries, index: 0 }
    }
}

impl StorageIterator for VecIterator {
    fn key(&self) -> &InternalKey {
        &self.entries[self.index].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.index].1
    }

    fn is_valid(&self) -> bool {
        self.index < self.entries.len()
    }

    fn next(&mut self) -> Result<()> {
        self.index += 1;
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        self.index = self
            .entries
            .partition_point(|(k, _)| k.user_key.as_slice() < user_key);
        Ok(())
    }
}
