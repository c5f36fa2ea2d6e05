use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::wal::record::WalRecord;

/// Outcome of replaying one WAL segment.
#[derive(Debug)]
pub struct Replay {
    /// All valid records, in write order.
    pub records: Vec<WalRecord>,
    /// Byte offset of the last valid record's end. Anything past this is a
    /// torn tail and should be truncated before the segment is reused.
    pub valid_len: u64,
    /// Whether a torn tail was detected (and skipped).
    pub truncated: bool,
}

/// Reads WAL records from a segment file for crash recovery.
///
/// Loads the file into memory, then walks it record by record.
///
/// Corruption handling:
/// - A record cut short by EOF, or one whose CRC fails and whose declared
///   extent reaches the end of the file, is the signature of a crash
///   mid-write. Recovery keeps everything before it, logs a warning, and
///   reports where to truncate.
/// - A CRC failure with valid data *after* the damaged record cannot be a
///   crash artifact — appends are sequential — so it is surfaced as fatal
///   corruption rather than silently dropped.
pub struct WalReader {
    path: PathBuf,
    data: Vec<u8>,
}

impl WalReader {
    /// Open a WAL segment for reading.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WalReader {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Replay every record in the segment, applying the tail-truncation rule.
    pub fn replay(&self) -> Result<Replay> {
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < self.data.len() {
            let remaining = &self.data[offset..];
            match WalRecord::decode(remaining) {
                Ok(record) => {
                    offset += record.encoded_size();
                    records.push(record);
                }
                Err(Error::Eof) => {
                    // Fewer bytes than the record claims: truncated tail.
                    warn!(
                        wal = %self.path.display(),
                        offset,
                        "truncated record at WAL tail, discarding {} trailing bytes",
                        remaining.len()
                    );
                    return Ok(Replay {
                        records,
                        valid_len: offset as u64,
                        truncated: true,
                    });
                }
                Err(Error::Corruption(msg)) => {
                    let extent = WalRecord::declared_extent(remaining).unwrap_or(remaining.len());
                    if extent >= remaining.len() {
                        // Damaged record is the last one in the file: a torn
                        // write from a crash. Recoverable.
                        warn!(
                            wal = %self.path.display(),
                            offset,
                            "corrupt record at WAL tail ({msg}), truncating"
                        );
                        return Ok(Replay {
                            records,
                            valid_len: offset as u64,
                            truncated: true,
                        });
                    }
                    // Valid-looking data follows the damage: this is not a
                    // crash pattern, it is storage-level corruption.
                    return Err(Error::Corruption(format!(
                        "WAL {} corrupt mid-stream at offset {offset}: {msg}",
                        self.path.display()
                    )));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Replay {
            records,
            valid_len: offset as u64,
            truncated: false,
        })
    }

    /// Truncate the segment file to its valid prefix.
    pub fn truncate_to(&self, valid_len: u64) -> Result<()> {
        let file = fs::OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(valid_len)?;
        file.sync_all()?;
        Ok(())
    }
}
