use crate::error::{Error, Result};
use crate::sstable::footer::TableMeta;

const FLUSH: u8 = 0x01;
const COMPACTION: u8 = 0x02;
const SNAPSHOT: u8 = 0x03;

/// An atomic transition of the LSM-tree structure, recorded in the manifest.
///
/// The manifest is a WAL for metadata: while the WAL tracks key-value
/// changes, version edits track which SSTables exist and which WAL segments
/// still matter.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionEdit {
    /// A memtable flush produced `table`; WAL segments below `log_number`
    /// are now covered by SSTables and may be deleted.
    Flush { table: TableMeta, log_number: u64 },

    /// A compaction replaced `removed` (table ids) with `added`, as one
    /// atomic step. Readers holding the old version keep their files until
    /// they finish.
    Compaction {
        added: Vec<TableMeta>,
        removed: Vec<u64>,
    },

    /// Full state snapshot, written as the first record of a fresh manifest
    /// so replay never depends on an unbounded edit history.
    Snapshot {
        tables: Vec<TableMeta>,
        log_number: u64,
        next_table_id: u64,
    },
}

impl VersionEdit {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            VersionEdit::Flush { table, log_number } => {
                buf.push(FLUSH);
                buf.extend_from_slice(&log_number.to_le_bytes());
                encode_table(&mut buf, table);
            }
            VersionEdit::Compaction { added, removed } => {
                buf.push(COMPACTION);
                buf.extend_from_slice(&(removed.len() as u32).to_le_bytes());
                for id in removed {
                    buf.extend_from_slice(&id.to_le_bytes());
                }
                buf.extend_from_slice(&(added.len() as u32).to_le_bytes());
                for table in added {
                    encode_table(&mut buf, table);
                }
            }
            VersionEdit::Snapshot {
                tables,
                log_number,
                next_table_id,
            } => {
                buf.push(SNAPSHOT);
                buf.extend_from_slice(&log_number.to_le_bytes());
                buf.extend_from_slice(&next_table_id.to_le_bytes());
                buf.extend_from_slice(&(tables.len() as u32).to_le_bytes());
                for table in tables {
                    encode_table(&mut buf, table);
                }
            }
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cur = Cursor { data, pos: 0 };
        match cur.read_u8()? {
            FLUSH => {
                let log_number = cur.read_u64()?;
                let table = decode_table(&mut cur)?;
                Ok(VersionEdit::Flush { table, log_number })
            }
            COMPACTION => {
                let removed_len = cur.read_u32()? as usize;
                let mut removed = Vec::with_capacity(removed_len);
                for _ in 0..removed_len {
                    removed.push(cur.read_u64()?);
                }
                let added_len = cur.read_u32()? as usize;
                let mut added = Vec::with_capacity(added_len);
                for _ in 0..added_len {
                    added.push(decode_table(&mut cur)?);
                }
                Ok(VersionEdit::Compaction { added, removed })
            }
            SNAPSHOT => {
                let log_number = cur.read_u64()?;
                let next_table_id = cur.read_u64()?;
                let len = cur.read_u32()? as usize;
                let mut tables = Vec::with_capacity(len);
                for _ in 0..len {
                    tables.push(decode_table(&mut cur)?);
                }
                Ok(VersionEdit::Snapshot {
                    tables,
                    log_number,
                    next_table_id,
                })
            }
            tag => Err(Error::Corruption(format!("unknown manifest edit tag {tag:#x}"))),
        }
    }
}

/// Table record inside an edit: [meta_len(4B)][meta][file_size(8B)].
/// `TableMeta::encode` covers everything but the file size, which lives in
/// the file itself on the SSTable side but must be carried here for stats.
fn encode_table(buf: &mut Vec<u8>, table: &TableMeta) {
    let meta = table.encode();
    buf.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(&table.file_size.to_le_bytes());
}

fn decode_table(cur: &mut Cursor<'_>) -> Result<TableMeta> {
    let meta_len = cur.read_u32()? as usize;
    let meta_bytes = cur.read_bytes(meta_len)?;
    let file_size = cur.read_u64()?;
    TableMeta::decode(meta_bytes, file_size)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Corruption("manifest edit truncated".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}
