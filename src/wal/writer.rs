use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::wal::record::WalRecord;
use crate::wal::SyncPolicy;

/// Writes WAL records to a segment file on disk.
///
/// Every write must be durable before it's acknowledged to the client
/// (under the default `SyncPolicy::EveryWrite`). The WAL ensures crash
/// recovery: on restart, replay the segment to reconstruct the memtable.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
pub struct WalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    id: u64,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
}

impl WalWriter {
    /// Create a WAL writer appending to the segment at `path`.
    pub fn new(path: &Path, id: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(WalWriter {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            id,
            offset,
            sync_policy,
            writes_since_sync: 0,
        })
    }

    /// Append a record to the WAL.
    /// Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        match self.sync_policy {
            SyncPolicy::EveryWrite => {
                self.writer.get_ref().sync_all()?;
                self.writes_since_sync = 0;
            }
            SyncPolicy::EveryNWrites(n) => {
                if self.writes_since_sync >= n {
                    self.writer.get_ref().sync_all()?;
                    self.writes_since_sync = 0;
                }
            }
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Segment id of this writer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
