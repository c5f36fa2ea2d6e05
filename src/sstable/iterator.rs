use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::BlockIterator;
use crate::sstable::reader::Table;
use crate::types::InternalKey;

/// Streams a table's entries in sorted order, loading one data block at a
/// time. Holds an `Arc<Table>` so the file stays alive (and undeleted) for
/// as long as the scan runs, even if compaction retires the table meanwhile.
pub struct TableIterator {
    table: Arc<Table>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
}

impl TableIterator {
    pub fn new(table: Arc<Table>) -> Result<Self> {
        let mut iter = TableIterator {
            table,
            block_idx: 0,
            block_iter: None,
        };
        iter.load_block()?;
        Ok(iter)
    }

    /// Load the block at `block_idx`, skipping forward past empty blocks.
    fn load_block(&mut self) -> Result<()> {
        while self.block_idx < self.table.block_count() {
            let block = self.table.read_block(self.block_idx)?;
            let block_iter = block.iter()?;
            if block_iter.is_valid() {
                self.block_iter = Some(block_iter);
                return Ok(());
            }
            self.block_idx += 1;
        }
        self.block_iter = None;
        Ok(())
    }

    /// Position at the first entry with user key >= `start`.
    pub(crate) fn seek_to(&mut self, start: &[u8]) -> Result<()> {
        // The candidate block may end before `start`; if its scan runs off
        // the end, fall through to the next block's first entry.
        self.block_idx = self.table.candidate_block(start).unwrap_or(0);
        self.load_block()?;
        if let Some(iter) = &mut self.block_iter {
            iter.seek(start)?;
            if !iter.is_valid() {
                self.block_idx += 1;
                self.load_block()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for TableIterator {
    fn key(&self) -> &InternalKey {
        self.block_iter.as_ref().expect("iterator not valid").key()
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().expect("iterator not valid").value()
    }

    fn is_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|i| i.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(iter) = &mut self.block_iter {
            iter.next()?;
            if !iter.is_valid() {
                self.block_idx += 1;
                self.load_block()?;
            }
        }
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        self.seek_to(user_key)
    }
}
