use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::bloom::BloomFilterBuilder;
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, TableMeta};
use crate::types::InternalKey;

/// Builds an SSTable file from a sorted stream of entries.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTable)
///
/// Build process:
/// 1. Add entries one by one (must be in sorted internal-key order)
/// 2. Entries fill up blocks; a full block is written out and indexed,
///    except that further versions of the current user key are forced into
///    the open block so one key's versions never straddle a block boundary
/// 3. finish() flushes the last block, writes filter/index/props/footer, fsyncs
///
/// On any I/O failure the caller must `abort()` so the partial file is
/// deleted — nothing half-written ever reaches the manifest.
pub struct TableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    block_builder: BlockBuilder,
    bloom: BloomFilterBuilder,
    index_entries: Vec<IndexEntry>,
    data_offset: u64,
    id: u64,
    generation: u32,
    block_size: usize,
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    entry_count: u64,
    max_sequence: u64,
    /// First key of the block currently being filled.
    first_key_in_block: Option<Vec<u8>>,
    /// User key of the most recently added entry.
    last_user_key: Option<Vec<u8>>,
}

impl TableBuilder {
    /// Create a builder writing to `path`.
    pub fn new(
        path: &Path,
        id: u64,
        generation: u32,
        block_size: usize,
        false_positive_rate: f64,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Ok(TableBuilder {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            block_builder: BlockBuilder::new(block_size),
            bloom: BloomFilterBuilder::new(false_positive_rate),
            index_entries: Vec::new(),
            data_offset: 0,
            id,
            generation,
            block_size,
            min_key: None,
            max_key: None,
            entry_count: 0,
            max_sequence: 0,
            first_key_in_block: None,
            last_user_key: None,
        })
    }

    /// Add an entry. MUST be called in sorted internal-key order.
    pub fn add(&mut self, key: &InternalKey, value: &[u8]) -> Result<()> {
        if self.min_key.is_none() {
            self.min_key = Some(key.user_key.clone());
        }
        self.max_key = Some(key.user_key.clone());
        self.entry_count += 1;
        self.max_sequence = self.max_sequence.max(key.sequence);
        self.bloom.add_key(&key.user_key);

        if self.first_key_in_block.is_none() {
            self.first_key_in_block = Some(key.user_key.clone());
        }

        if !self.block_builder.add(key, value) {
            if self.last_user_key.as_deref() == Some(key.user_key.as_slice()) {
                // Another version of the key that closed the block: it must
                // live in the same block as its siblings.
                self.block_builder.add_forced(key, value);
            } else {
                self.flush_block()?;
                self.first_key_in_block = Some(key.user_key.clone());
                let accepted = self.block_builder.add(key, value);
                debug_assert!(accepted, "first entry of a fresh block is always accepted");
            }
        }
        self.last_user_key = Some(key.user_key.clone());
        Ok(())
    }

    /// Flush the current block to disk and record a sparse-index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }
        let old_builder =
            std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = old_builder.build();
        self.writer.write_all(&block_data)?;

        self.index_entries.push(IndexEntry {
            first_key: self
                .first_key_in_block
                .take()
                .expect("non-empty block has a first key"),
            offset: self.data_offset,
            size: block_data.len() as u64,
        });
        self.data_offset += block_data.len() as u64;
        Ok(())
    }

    /// Write a non-data section (filter/index/props) with its CRC trailer.
    fn write_section(&mut self, payload: &[u8]) -> Result<(u64, u64)> {
        let offset = self.data_offset;
        self.writer.write_all(payload)?;
        let crc = crc32fast::hash(payload);
        self.writer.write_all(&crc.to_le_bytes())?;
        let size = payload.len() as u64 + 4;
        self.data_offset += size;
        Ok((offset, size))
    }

    /// Finalize the table: last data block, filter, index, props, footer, fsync.
    pub fn finish(mut self) -> Result<TableMeta> {
        match self.finish_inner() {
            Ok(meta) => Ok(meta),
            Err(e) => {
                self.remove_partial();
                Err(e)
            }
        }
    }

    fn finish_inner(&mut self) -> Result<TableMeta> {
        self.flush_block()?;
        let block_count = self.index_entries.len() as u32;

        let filter = std::mem::replace(&mut self.bloom, BloomFilterBuilder::new(0.5)).build();
        let (filter_offset, filter_size) = self.write_section(&filter.serialize())?;

        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        let (index_offset, index_size) = self.write_section(&index_data)?;

        let mut meta = TableMeta {
            id: self.id,
            generation: self.generation,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            file_size: 0,
            entry_count: self.entry_count,
            max_sequence: self.max_sequence,
        };
        let (props_offset, props_size) = self.write_section(&meta.encode())?;

        let footer = Footer {
            filter_offset,
            filter_size,
            index_offset,
            index_size,
            props_offset,
            props_size,
            block_count,
        };
        self.writer.write_all(&footer.encode())?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        meta.file_size = self.data_offset + Footer::SIZE as u64;
        Ok(meta)
    }

    /// Abandon the build and delete the partial file.
    pub fn abort(mut self) {
        self.remove_partial();
    }

    fn remove_partial(&mut self) {
        // Flush errors are irrelevant here; the file is being discarded.
        let _ = self.writer.flush();
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial SSTable");
        }
    }
}

/// Drain a sorted iterator into a new SSTable at `path`.
///
/// On any error the partial file is removed and nothing becomes visible;
/// the caller retries later. Returns the metadata to record in the manifest.
pub fn write_table(
    path: &Path,
    id: u64,
    generation: u32,
    block_size: usize,
    false_positive_rate: f64,
    iter: &mut dyn StorageIterator,
) -> Result<TableMeta> {
    let mut builder = TableBuilder::new(path, id, generation, block_size, false_positive_rate)?;
    while iter.is_valid() {
        if let Err(e) = builder.add(iter.key(), iter.value()) {
            builder.abort();
            return Err(e);
        }
        if let Err(e) = iter.next() {
            builder.abort();
            return Err(e);
        }
    }
    builder.finish()
}
