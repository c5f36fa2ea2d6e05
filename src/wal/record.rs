use crate::error::{Error, Result};
use crate::types::ValueType;

/// A single record in the WAL.
///
/// On-disk format (little-endian):
/// ```text
/// ┌─────────┬──────────┬──────────┬────────────┬───────────┬───────────┬──────────┐
/// │ Len(4B) │ Seq (8B) │ Type(1B) │ Key Len(4B)│ Key (var) │ Val (var) │ CRC (4B) │
/// └─────────┴──────────┴──────────┴────────────┴───────────┴───────────┴──────────┘
/// ```
///
/// Len counts everything between the Len and CRC fields. The CRC covers the
/// same span. A record that fails its CRC at the end of the file was a
/// partial write (crash mid-write) — recovery truncates there. A CRC failure
/// with valid data following it is storage damage and is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub sequence: u64,
    pub value_type: ValueType,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

const LEN_SIZE: usize = 4;
const SEQ_SIZE: usize = 8;
const TYPE_SIZE: usize = 1;
const KEY_LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Payload bytes before the key starts.
const PAYLOAD_FIXED: usize = SEQ_SIZE + TYPE_SIZE + KEY_LEN_SIZE;

impl WalRecord {
    /// Create a Put record.
    pub fn put(key: Vec<u8>, value: Vec<u8>, sequence: u64) -> Self {
        WalRecord {
            sequence,
            value_type: ValueType::Put,
            key,
            value,
        }
    }

    /// Create a Delete (tombstone) record.
    pub fn delete(key: Vec<u8>, sequence: u64) -> Self {
        WalRecord {
            sequence,
            value_type: ValueType::Delete,
            key,
            value: Vec::new(),
        }
    }

    /// Serialize this record to bytes (including length prefix and CRC).
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = PAYLOAD_FIXED + self.key.len() + self.value.len();
        let mut buf = Vec::with_capacity(LEN_SIZE + payload_len + CRC_SIZE);

        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.value_type as u8);
        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[LEN_SIZE..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize one record from the front of `data`.
    ///
    /// Errors:
    /// - `Error::Eof` — not enough bytes for the declared record (a
    ///   truncated tail; recoverable).
    /// - `Error::Corruption` — the bytes are all present but the CRC or
    ///   structure is wrong.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < LEN_SIZE {
            return Err(Error::Eof);
        }
        let payload_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        if payload_len < PAYLOAD_FIXED {
            return Err(Error::Corruption(format!(
                "WAL record length {payload_len} below minimum"
            )));
        }
        let total = LEN_SIZE + payload_len + CRC_SIZE;
        if data.len() < total {
            return Err(Error::Eof);
        }

        let payload = &data[LEN_SIZE..LEN_SIZE + payload_len];
        let stored_crc =
            u32::from_le_bytes(data[LEN_SIZE + payload_len..total].try_into().unwrap());
        if crc32fast::hash(payload) != stored_crc {
            return Err(Error::Corruption("WAL record CRC mismatch".into()));
        }

        let sequence = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let value_type = ValueType::from_u8(payload[8])?;
        let key_len = u32::from_le_bytes(payload[9..13].try_into().unwrap()) as usize;
        if PAYLOAD_FIXED + key_len > payload_len {
            return Err(Error::Corruption("WAL key length exceeds record".into()));
        }
        let key = payload[PAYLOAD_FIXED..PAYLOAD_FIXED + key_len].to_vec();
        let value = payload[PAYLOAD_FIXED + key_len..].to_vec();

        Ok(WalRecord {
            sequence,
            value_type,
            key,
            value,
        })
    }

    /// Bytes this record occupies on disk once encoded.
    pub fn encoded_size(&self) -> usize {
        LEN_SIZE + PAYLOAD_FIXED + self.key.len() + self.value.len() + CRC_SIZE
    }

    /// The on-disk extent a record starting at the front of `data` claims to
    /// cover, if its length prefix is readable. Recovery uses this to tell a
    /// torn tail (extent reaches EOF) from mid-log damage.
    pub fn declared_extent(data: &[u8]) -> Option<usize> {
        if data.len() < LEN_SIZE {
            return None;
        }
        let payload_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        Some(LEN_SIZE + payload_len + CRC_SIZE)
    }
}
