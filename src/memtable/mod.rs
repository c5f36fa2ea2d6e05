pub mod skiplist;

use skiplist::{SkipList, SkipListIterator};

use crate::types::{InternalKey, LookupResult, Value, ValueType};

/// In-memory sorted buffer for writes. Wraps a SkipList.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Deletes are handled via tombstones — a marker entry that means
/// "this key is deleted." You can't just remove the key because older
/// versions may exist in SSTables on disk.
///
/// All versions of a key coexist (keyed by sequence number) until flush;
/// lookups resolve to the newest one.
pub struct MemTable {
    data: SkipList,
    size_limit: usize,
    /// WAL segment ids whose records landed in this memtable. The flush edit
    /// uses these to decide which segments become obsolete.
    wal_ids: Vec<u64>,
}

impl MemTable {
    /// Create a new empty memtable with given size limit.
    pub fn new(size_limit: usize) -> Self {
        MemTable {
            data: SkipList::new(),
            size_limit,
            wal_ids: Vec::new(),
        }
    }

    /// Insert a key-value version.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, sequence: u64) {
        self.data
            .insert(InternalKey::new(key, sequence, ValueType::Put), value);
    }

    /// Mark a key as deleted by writing a tombstone.
    pub fn delete(&mut self, key: Vec<u8>, sequence: u64) {
        self.data
            .insert(InternalKey::new(key, sequence, ValueType::Delete), Vec::new());
    }

    /// Look up the newest version of a key.
    ///
    /// `None` means this memtable knows nothing about the key — older
    /// sources must be consulted. A tombstone is a resolved answer.
    pub fn get(&self, key: &[u8]) -> Option<LookupResult> {
        let (ikey, value) = self.data.get(key)?;
        if ikey.is_tombstone() {
            Some(LookupResult::Tombstone)
        } else {
            Some(LookupResult::Value(value.to_vec()))
        }
    }

    /// Sorted iterator over all entries (including tombstones).
    pub fn iter(&self) -> SkipListIterator<'_> {
        self.data.iter()
    }

    /// Copy out all entries with user key in `[low, high)`, in order.
    /// Tombstones are included; the merge layers above suppress them.
    pub fn range_entries(&self, low: &[u8], high: &[u8]) -> Vec<(InternalKey, Value)> {
        self.data
            .iter_from(low)
            .take_while(|(k, _)| k.user_key.as_slice() < high)
            .map(|(k, v)| (k.clone(), v.to_vec()))
            .collect()
    }

    /// Current memory usage in bytes.
    pub fn size(&self) -> usize {
        self.data.size_bytes()
    }

    /// Number of entries (all versions, tombstones included).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.data.size_bytes() >= self.size_limit
    }

    /// Record that `wal_id` feeds this memtable.
    pub fn attach_wal(&mut self, wal_id: u64) {
        if self.wal_ids.last() != Some(&wal_id) {
            self.wal_ids.push(wal_id);
        }
    }

    /// WAL segments covered by this memtable, oldest first.
    pub fn wal_ids(&self) -> &[u64] {
        &self.wal_ids
    }
}
