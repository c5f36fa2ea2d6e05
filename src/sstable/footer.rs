use crate::error::{Error, Result};

/// Magic number identifying SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x53494C545F535354; // "SILT_SST"

/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Metadata about an SSTable, recorded in the manifest and in the table's
/// own props block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Unique table identifier (also the file name stem).
    pub id: u64,
    /// Size-tier generation. 0 = freshly flushed; each compaction merges a
    /// tier into a table of generation + 1.
    pub generation: u32,
    /// Smallest user key in the table.
    pub min_key: Vec<u8>,
    /// Largest user key in the table.
    pub max_key: Vec<u8>,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of entries (all versions, tombstones included).
    pub entry_count: u64,
    /// Highest sequence number stored in the table.
    pub max_sequence: u64,
}

impl TableMeta {
    /// Encode into a props block payload (without the block CRC).
    /// Format: [id(8B)][gen(4B)][min_len(4B)][min][max_len(4B)][max]
    ///         [entry_count(8B)][max_seq(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(36 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.max_sequence.to_le_bytes());
        buf
    }

    /// Decode a props block payload. `file_size` comes from the file itself.
    pub fn decode(data: &[u8], file_size: u64) -> Result<Self> {
        let mut cur = Cursor { data, pos: 0 };
        let id = cur.read_u64()?;
        let generation = cur.read_u32()?;
        let min_len = cur.read_u32()? as usize;
        let min_key = cur.read_bytes(min_len)?.to_vec();
        let max_len = cur.read_u32()? as usize;
        let max_key = cur.read_bytes(max_len)?.to_vec();
        let entry_count = cur.read_u64()?;
        let max_sequence = cur.read_u64()?;
        Ok(TableMeta {
            id,
            generation,
            min_key,
            max_key,
            file_size,
            entry_count,
            max_sequence,
        })
    }
}

/// An entry in the SSTable's sparse index.
/// Maps a block's first (smallest) key to its location in the file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// First key in the block.
    pub first_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes (checksum included).
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry.
    /// Format: [key_len(2B)][key][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.first_key.len() + 16);
        buf.extend_from_slice(&(self.first_key.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.first_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry, returning (entry, bytes consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(Error::Corruption("index entry too short".into()));
        }
        let key_len = u16::from_le_bytes([data[0], data[1]]) as usize;
        let total = 2 + key_len + 16;
        if data.len() < total {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let first_key = data[2..2 + key_len].to_vec();
        let offset = u64::from_le_bytes(data[2 + key_len..10 + key_len].try_into().unwrap());
        let size = u64::from_le_bytes(data[10 + key_len..18 + key_len].try_into().unwrap());
        Ok((
            IndexEntry {
                first_key,
                offset,
                size,
            },
            total,
        ))
    }
}

/// The footer sits at the end of the SSTable file and tells the reader where
/// every other section lives.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Filter block offset (8B) / size (8B) │
/// │ Index block offset (8B) / size (8B)  │
/// │ Props block offset (8B) / size (8B)  │
/// │ Block count (4B)                     │
/// │ Format version (4B)                  │
/// │ CRC32 over the fields above (4B)     │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct Footer {
    pub filter_offset: u64,
    pub filter_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
    pub props_offset: u64,
    pub props_size: u64,
    pub block_count: u32,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 6 * 8 + 4 + 4 + 4 + 8; // 68 bytes

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.filter_offset.to_le_bytes());
        buf.extend_from_slice(&self.filter_size.to_le_bytes());
        buf.extend_from_slice(&self.index_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_size.to_le_bytes());
        buf.extend_from_slice(&self.props_offset.to_le_bytes());
        buf.extend_from_slice(&self.props_size.to_le_bytes());
        buf.extend_from_slice(&self.block_count.to_le_bytes());
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&SSTABLE_MAGIC.to_le_bytes());
        buf
    }

    /// Decode footer from its fixed-size byte slice.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let magic = u64::from_le_bytes(data[60..68].try_into().unwrap());
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {SSTABLE_MAGIC:#x}, got {magic:#x}"
            )));
        }
        let stored_crc = u32::from_le_bytes(data[56..60].try_into().unwrap());
        if crc32fast::hash(&data[0..56]) != stored_crc {
            return Err(Error::Corruption("footer CRC mismatch".into()));
        }
        let version = u32::from_le_bytes(data[52..56].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported format version {version}"
            )));
        }

        Ok(Footer {
            filter_offset: u64::from_le_bytes(data[0..8].try_into().unwrap()),
            filter_size: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            index_offset: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            index_size: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            props_offset: u64::from_le_bytes(data[32..40].try_into().unwrap()),
            props_size: u64::from_le_bytes(data[40..48].try_into().unwrap()),
            block_count: u32::from_le_bytes(data[48..52].try_into().unwrap()),
        })
    }
}

/// Minimal bounds-checked reader for decoding props payloads.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Corruption("props block truncated".into()));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            filter_offset: 4096,
            filter_size: 128,
            index_offset: 4224,
            index_size: 512,
            props_offset: 4736,
            props_size: 64,
            block_count: 3,
        };
        let encoded = footer.encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(decoded.index_offset, 4224);
        assert_eq!(decoded.block_count, 3);
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = Footer {
            filter_offset: 0,
            filter_size: 0,
            index_offset: 0,
            index_size: 0,
            props_offset: 0,
            props_size: 0,
            block_count: 0,
        }
        .encode();
        encoded[62] = 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn footer_detects_field_corruption() {
        let mut encoded = Footer {
            filter_offset: 10,
            filter_size: 20,
            index_offset: 30,
            index_size: 40,
            props_offset: 50,
            props_size: 60,
            block_count: 2,
        }
        .encode();
        encoded[0] ^= 0xFF;
        assert!(Footer::decode(&encoded).is_err());
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            first_key: b"cherry".to_vec(),
            offset: 8192,
            size: 4096,
        };
        let encoded = entry.encode();
        let (decoded, consumed) = IndexEntry::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.first_key, b"cherry");
        assert_eq!(decoded.offset, 8192);
        assert_eq!(decoded.size, 4096);
    }

    #[test]
    fn table_meta_roundtrip() {
        let meta = TableMeta {
            id: 7,
            generation: 2,
            min_key: b"aardvark".to_vec(),
            max_key: b"zebra".to_vec(),
            file_size: 0,
            entry_count: 999,
            max_sequence: 123456,
        };
        let decoded = TableMeta::decode(&meta.encode(), 4096).unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.generation, 2);
        assert_eq!(decoded.min_key, b"aardvark");
        assert_eq!(decoded.max_key, b"zebra");
        assert_eq!(decoded.file_size, 4096);
        assert_eq!(decoded.entry_count, 999);
        assert_eq!(decoded.max_sequence, 123456);
    }
}
