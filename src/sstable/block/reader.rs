use bytes::Bytes;

use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::ENTRY_HEADER_SIZE;
use crate::types::{InternalKey, ValueType};

/// A decoded data block: entry bytes plus the offset array for binary search.
///
/// The payload is kept as `Bytes` so iterators can hand out value slices
/// without copying the block again.
pub struct Block {
    data: Bytes,
    offsets: Vec<u32>,
}

impl Block {
    /// Decode a block from its on-disk bytes, verifying the trailing CRC.
    pub fn decode(raw: Vec<u8>) -> Result<Self> {
        if raw.len() < 8 {
            return Err(Error::Corruption("block too short".into()));
        }
        let crc_start = raw.len() - 4;
        let stored_crc = u32::from_le_bytes(raw[crc_start..].try_into().unwrap());
        if crc32fast::hash(&raw[..crc_start]) != stored_crc {
            return Err(Error::Corruption("block CRC mismatch".into()));
        }

        let count_start = crc_start - 4;
        let num_entries = u32::from_le_bytes(raw[count_start..crc_start].try_into().unwrap()) as usize;
        let offsets_start = count_start
            .checked_sub(num_entries * 4)
            .ok_or_else(|| Error::Corruption("block offset array out of bounds".into()))?;

        let mut offsets = Vec::with_capacity(num_entries);
        for chunk in raw[offsets_start..count_start].chunks_exact(4) {
            let off = u32::from_le_bytes(chunk.try_into().unwrap());
            if off as usize >= offsets_start {
                return Err(Error::Corruption("block entry offset out of bounds".into()));
            }
            offsets.push(off);
        }

        let mut data = Bytes::from(raw);
        data.truncate(offsets_start);
        Ok(Block { data, offsets })
    }

    /// Number of entries in the block.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Parse the entry at index `i`.
    fn entry_at(&self, i: usize) -> Result<(InternalKey, Bytes)> {
        let start = self.offsets[i] as usize;
        if start + ENTRY_HEADER_SIZE > self.data.len() {
            return Err(Error::Corruption("block entry header out of bounds".into()));
        }
        let key_len = u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()) as usize;
        let val_len =
            u32::from_le_bytes(self.data[start + 2..start + 6].try_into().unwrap()) as usize;
        let sequence = u64::from_le_bytes(self.data[start + 6..start + 14].try_into().unwrap());
        let value_type = ValueType::from_u8(self.data[start + 14])?;

        let key_start = start + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;
        let end = val_start + val_len;
        if end > self.data.len() {
            return Err(Error::Corruption("block entry body out of bounds".into()));
        }

        let user_key = self.data[key_start..val_start].to_vec();
        let value = self.data.slice(val_start..end);
        Ok((InternalKey::new(user_key, sequence, value_type), value))
    }

    /// User-key slice of the entry at index `i`, without parsing the value.
    fn user_key_at(&self, i: usize) -> &[u8] {
        let start = self.offsets[i] as usize;
        let key_len = u16::from_le_bytes(self.data[start..start + 2].try_into().unwrap()) as usize;
        let key_start = start + ENTRY_HEADER_SIZE;
        &self.data[key_start..key_start + key_len]
    }

    /// Index of the first entry with user key >= `user_key`.
    fn lower_bound(&self, user_key: &[u8]) -> usize {
        let mut lo = 0usize;
        let mut hi = self.offsets.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.user_key_at(mid) < user_key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Point lookup for the newest version of `user_key` inside this block.
    pub fn get(&self, user_key: &[u8]) -> Result<Option<(InternalKey, Bytes)>> {
        let idx = self.lower_bound(user_key);
        if idx >= self.offsets.len() || self.user_key_at(idx) != user_key {
            return Ok(None);
        }
        // Entries are (user_key ASC, seq DESC): the first match is newest.
        self.entry_at(idx).map(Some)
    }

    /// Iterator positioned at the first entry.
    pub fn iter(self) -> Result<BlockIterator> {
        BlockIterator::new(self)
    }
}

/// Iterator over the entries of a single block, in sorted order.
pub struct BlockIterator {
    block: Block,
    index: usize,
    current: Option<(InternalKey, Bytes)>,
}

impl BlockIterator {
    pub fn new(block: Block) -> Result<Self> {
        let mut iter = BlockIterator {
            block,
            index: 0,
            current: None,
        };
        iter.load()?;
        Ok(iter)
    }

    fn load(&mut self) -> Result<()> {
        self.current = if self.index < self.block.len() {
            Some(self.block.entry_at(self.index)?)
        } else {
            None
        };
        Ok(())
    }
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &InternalKey {
        &self.current.as_ref().expect("iterator not valid").0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").1
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        self.index += 1;
        self.load()
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        self.index = self.block.lower_bound(user_key);
        self.load()
    }
}
