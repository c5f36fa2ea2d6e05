use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::{Error, Result};
use crate::sstable::block::Block;
use crate::sstable::footer::{Footer, IndexEntry, TableMeta};
use crate::sstable::iterator::TableIterator;
use crate::types::LookupResult;

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 68 bytes) → locate filter/index/props sections
/// 2. Read and parse the sparse index → Vec<IndexEntry>
/// 3. Read and deserialize the bloom filter and table props
/// 4. Ready for queries (data blocks read on demand)
///
/// Tables are shared across reader threads and Version snapshots via `Arc`.
/// A table marked obsolete (replaced by compaction) deletes its file when
/// the last reference drops — that is the deferred-reclamation half of the
/// versioning scheme.
pub struct Table {
    path: PathBuf,
    /// File handle for on-demand block reads. Behind a mutex so concurrent
    /// readers can share one handle; reads are short seek+read sections.
    file: Mutex<File>,
    index: Vec<IndexEntry>,
    filter: BloomFilter,
    meta: TableMeta,
    /// When set, the file is deleted on drop (table was compacted away).
    obsolete: AtomicBool,
}

impl Table {
    /// Open an SSTable file, verifying footer and section checksums.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        file.seek(SeekFrom::Start(file_size - Footer::SIZE as u64))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = read_section(&mut file, footer.index_offset, footer.index_size)?;
        let mut index = Vec::new();
        let mut offset = 0usize;
        while offset < index_data.len() {
            let (entry, consumed) = IndexEntry::decode(&index_data[offset..])?;
            index.push(entry);
            offset += consumed;
        }
        if index.len() != footer.block_count as usize {
            return Err(Error::Corruption(format!(
                "{}: index has {} entries, footer claims {} blocks",
                path.display(),
                index.len(),
                footer.block_count
            )));
        }

        let filter_data = read_section(&mut file, footer.filter_offset, footer.filter_size)?;
        let filter = BloomFilter::deserialize(&filter_data)?;

        let props_data = read_section(&mut file, footer.props_offset, footer.props_size)?;
        let meta = TableMeta::decode(&props_data, file_size)?;

        Ok(Arc::new(Table {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            filter,
            meta,
            obsolete: AtomicBool::new(false),
        }))
    }

    /// Point lookup: the newest version of `key` in this table, if any.
    ///
    /// Algorithm:
    /// 1. Range check against [min_key, max_key]
    /// 2. Bloom filter — definite miss skips the disk entirely
    /// 3. Binary search the sparse index for the candidate block
    /// 4. Read the block, verify its checksum, binary search within
    pub fn get(&self, key: &[u8]) -> Result<Option<LookupResult>> {
        if key < self.meta.min_key.as_slice() || key > self.meta.max_key.as_slice() {
            return Ok(None);
        }
        if !self.filter.may_contain(key) {
            return Ok(None);
        }
        let Some(block_idx) = self.candidate_block(key) else {
            return Ok(None);
        };
        let block = self.read_block(block_idx)?;
        match block.get(key)? {
            // The candidate block is the only block that can hold the key;
            // a miss here is a miss for the whole table.
            None => Ok(None),
            Some((ikey, _)) if ikey.is_tombstone() => Ok(Some(LookupResult::Tombstone)),
            Some((_, value)) => Ok(Some(LookupResult::Value(value.to_vec()))),
        }
    }

    /// Whether the bloom filter rules this key out without touching disk.
    pub fn filter_rules_out(&self, key: &[u8]) -> bool {
        !self.filter.may_contain(key)
    }

    /// Index of the last block whose first key is <= `key`. Blocks are
    /// ordered and non-overlapping, so this is the unique candidate.
    pub(crate) fn candidate_block(&self, key: &[u8]) -> Option<usize> {
        let idx = self
            .index
            .partition_point(|entry| entry.first_key.as_slice() <= key);
        idx.checked_sub(1)
    }

    /// Read and decode the data block at `block_idx`, verifying its CRC.
    pub(crate) fn read_block(&self, block_idx: usize) -> Result<Block> {
        let entry = &self.index[block_idx];
        let mut buf = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut buf)?;
        }
        Block::decode(buf)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Iterator over all entries in the table.
    pub fn iter(self: &Arc<Self>) -> Result<TableIterator> {
        TableIterator::new(Arc::clone(self))
    }

    /// Iterator positioned at the first entry with user key >= `start`.
    pub fn range_iter(self: &Arc<Self>, start: &[u8]) -> Result<TableIterator> {
        let mut iter = TableIterator::new(Arc::clone(self))?;
        iter.seek_to(start)?;
        Ok(iter)
    }

    /// Metadata about this SSTable.
    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the table's file for deletion once the last reference drops.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove obsolete SSTable"
                );
            }
        }
    }
}

/// Read a non-data section and verify its CRC trailer.
fn read_section(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    if size < 4 {
        return Err(Error::Corruption("section too short for checksum".into()));
    }
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    let payload_len = buf.len() - 4;
    let stored_crc = u32::from_le_bytes(buf[payload_len..].try_into().unwrap());
    if crc32fast::hash(&buf[..payload_len]) != stored_crc {
        return Err(Error::Corruption("section CRC mismatch".into()));
    }
    buf.truncate(payload_len);
    Ok(buf)
}
