use crate::bloom::BloomFilter;

/// Collects keys during SSTable construction and builds a filter sized from
/// the real key count at the end.
///
/// The entry count of a flush is known up front, but a compaction's output
/// count is not (versions collapse, tombstones drop), so the builder defers
/// sizing until `build`.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::new(),
            false_positive_rate,
        }
    }

    /// Record a key. Duplicate user keys (multiple versions) are fine; the
    /// filter only cares about membership.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().map(Vec::as_slice) != Some(key) {
            self.keys.push(key.to_vec());
        }
    }

    /// Number of distinct keys recorded so far (input arrives sorted, so
    /// adjacent-duplicate suppression is exact).
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Finalize and return the filter.
    pub fn build(self) -> BloomFilter {
        let count = self.keys.len().max(1);
        let mut filter = BloomFilter::new(count, self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
