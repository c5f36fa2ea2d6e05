use crate::sstable::block::ENTRY_HEADER_SIZE;
use crate::types::InternalKey;

/// Accumulates sorted entries and serializes them into a data block.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │ Entry 0: [key_len(2B)][val_len(4B)][seq(8B)][type(1B)][key][value] │
/// │ Entry 1: ...                                                 │
/// │ Entry N: ...                                                 │
/// ├──────────────────────────────────────────────────────────────┤
/// │ Offset array: [off_0(4B)]...[off_N(4B)]                       │
/// │ Num entries (4B)                                             │
/// │ CRC32 of everything above (4B)                               │
/// └──────────────────────────────────────────────────────────────┘
/// ```
///
/// The offset array enables binary search without parsing every entry —
/// jump to offsets[mid], read the key, compare.
pub struct BlockBuilder {
    data: Vec<u8>,
    offsets: Vec<u32>,
    block_size: usize,
}

impl BlockBuilder {
    /// Create a new block builder with target block size.
    pub fn new(block_size: usize) -> Self {
        BlockBuilder {
            data: Vec::new(),
            offsets: Vec::new(),
            block_size,
        }
    }

    /// Add an entry to the block.
    /// Returns false if the block is full (entry doesn't fit).
    /// The first entry is always accepted even if it exceeds the target size.
    /// Entries MUST be added in sorted `InternalKey` order.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> bool {
        let entry_size = ENTRY_HEADER_SIZE + key.user_key.len() + value.len();
        if !self.offsets.is_empty() && self.estimated_size() + entry_size > self.block_size {
            return false;
        }
        self.add_forced(key, value);
        true
    }

    /// Add an entry regardless of the size target. The table builder uses
    /// this to keep all versions of one user key inside a single block —
    /// the sparse-index lookup depends on that.
    pub fn add_forced(&mut self, key: &InternalKey, value: &[u8]) {
        self.offsets.push(self.data.len() as u32);
        self.data
            .extend_from_slice(&(key.user_key.len() as u16).to_le_bytes());
        self.data
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.data.extend_from_slice(&key.sequence.to_le_bytes());
        self.data.push(key.value_type as u8);
        self.data.extend_from_slice(&key.user_key);
        self.data.extend_from_slice(value);
    }

    /// Finalize the block: append offset array, entry count, and checksum.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;
        for offset in &self.offsets {
            block.extend_from_slice(&offset.to_le_bytes());
        }
        block.extend_from_slice(&(self.offsets.len() as u32).to_le_bytes());
        let crc = crc32fast::hash(&block);
        block.extend_from_slice(&crc.to_le_bytes());
        block
    }

    /// Current estimated size of the block (data + offsets + count + crc).
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.offsets.len() * 4 + 8
    }

    /// Number of entries added so far.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
