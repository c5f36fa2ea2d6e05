use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone — the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// A normal put operation.
    Put = 0x01,
    /// A delete (tombstone marker).
    Delete = 0x02,
}

impl ValueType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(ValueType::Put),
            0x02 => Ok(ValueType::Delete),
            _ => Err(Error::Corruption(format!("invalid value type: {byte}"))),
        }
    }
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC).
/// This ensures the newest version of a key always comes first during merging.
///
/// The sequence number is a monotonically increasing counter assigned to each
/// write operation. It provides a total ordering of all writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: u64,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: Key, sequence: u64, value_type: ValueType) -> Self {
        InternalKey {
            user_key,
            sequence,
            value_type,
        }
    }

    /// Whether this entry is a delete marker.
    pub fn is_tombstone(&self) -> bool {
        self.value_type == ValueType::Delete
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            // Higher sequence sorts first: the newest version of a key
            // is always encountered before older ones.
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| (self.value_type as u8).cmp(&(other.value_type as u8)))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of a point lookup against a single source (memtable or SSTable).
///
/// A tombstone is a *resolved* result: the key was deleted, and older
/// versions in other sources must not be consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    Value(Value),
    Tombstone,
}
