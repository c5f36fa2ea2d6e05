pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Probabilistic set membership: "is this key in the set?"
///
/// - If any probed bit is 0 → key is DEFINITELY NOT in the set
/// - If all probed bits are 1 → key is PROBABLY in the set
///
/// Used on reads to skip SSTables that definitely don't contain the target
/// key. On a miss-heavy workload this eliminates most disk reads.
///
/// Sizing (classic formulas, with p the target false-positive rate):
///   bits_per_key = -1.44 * log2(p)          (= -ln(p)/(ln 2)² per key)
///   num_hashes   = bits_per_key * ln(2)
///
/// Hash trick: no need for k independent hash functions. Double hashing
/// derives probe i as h1 + i*h2 (mod m), with h1/h2 the two halves of a
/// single 128-bit xxh3.
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at the given FPR.
    ///
    /// # Panics
    /// Panics if `expected_items` is 0 or FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = (((expected_items as f64) * bits_per_key).ceil() as u32).max(64);
        let num_hashes = ((bits_per_key * 2.0f64.ln()).ceil() as u32).max(1);

        let num_u64s = (num_bits as usize).div_ceil(64);
        BloomFilter {
            bits: vec![0u64; num_u64s],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.probe(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.probe(h1, h2, i);
            if (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 0 {
                return false;
            }
        }
        true
    }

    /// Serialize the filter for the SSTable filter block.
    /// Format: [num_hashes(4B)][num_bits(4B)][words...]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Deserialize a filter read back from an SSTable.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::Corruption("bloom filter block too short".into()));
        }
        let num_hashes = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let num_bits = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let words = &data[8..];
        if words.len() % 8 != 0 || words.len() / 8 != (num_bits as usize).div_ceil(64) {
            return Err(Error::Corruption(format!(
                "bloom filter bit array size mismatch: {} bits, {} bytes",
                num_bits,
                words.len()
            )));
        }
        let bits = words
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(BloomFilter {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Probe position i via double hashing: (h1 + i*h2) mod num_bits.
    fn probe(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % (self.num_bits as u64)) as u32
    }
}

/// Two independent 64-bit hashes from one xxh3_128 computation.
fn hash_key(key: &[u8]) -> (u64, u64) {
    let hash128 = xxh3_128(key);
    ((hash128 & u128::from(u64::MAX)) as u64, (hash128 >> 64) as u64)
}
