use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::InternalKey;

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all SSTables
/// - Compaction (merging tiers of SSTables)
///
/// Ordering guarantee: entries are yielded in (user_key ASC, sequence DESC)
/// order, and only the newest version of each user key is yielded. When two
/// sources carry the same internal key, the lower source index (the newer
/// source) wins.
///
/// Tombstones are passed through: compaction must see them to decide
/// retention, and scan layers filter them above this iterator.
pub struct MergeIterator {
    sources: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    current: Option<usize>,
}

/// Heap key: the source's current internal key plus its priority index.
struct HeapEntry {
    key: InternalKey,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MergeIterator {
    /// Create a MergeIterator from multiple sorted sources.
    /// Sources are ordered by priority: index 0 = newest (active memtable),
    /// higher indices = older sources.
    pub fn new(sources: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        let mut iter = MergeIterator {
            sources,
            heap: BinaryHeap::new(),
            current: None,
        };
        iter.rebuild_heap();
        Ok(iter)
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (idx, source) in self.sources.iter().enumerate() {
            if source.is_valid() {
                self.heap.push(Reverse(HeapEntry {
                    key: source.key().clone(),
                    source: idx,
                }));
            }
        }
        self.current = self.heap.peek().map(|Reverse(e)| e.source);
    }

    /// Pop the heap top, advance its source, and reinsert if still valid.
    fn pop_and_advance(&mut self) -> Result<()> {
        if let Some(Reverse(entry)) = self.heap.pop() {
            let source = &mut self.sources[entry.source];
            source.next()?;
            if source.is_valid() {
                self.heap.push(Reverse(HeapEntry {
                    key: source.key().clone(),
                    source: entry.source,
                }));
            }
        }
        Ok(())
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &InternalKey {
        self.sources[self.current.expect("iterator not valid")].key()
    }

    fn value(&self) -> &[u8] {
        self.sources[self.current.expect("iterator not valid")].value()
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        let yielded = match self.current {
            Some(idx) => self.sources[idx].key().user_key.clone(),
            None => return Ok(()),
        };
        // Skip every remaining version of the yielded user key, across all
        // sources: they are superseded by construction of the ordering.
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.key.user_key != yielded {
                break;
            }
            self.pop_and_advance()?;
        }
        self.current = self.heap.peek().map(|Reverse(e)| e.source);
        Ok(())
    }

    fn seek(&mut self, user_key: &[u8]) -> Result<()> {
        for source in &mut self.sources {
            source.seek(user_key)?;
        }
        self.rebuild_heap();
        Ok(())
    }
}
