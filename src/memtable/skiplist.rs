use rand::Rng;

use crate::types::{InternalKey, Value};

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// Probability denominator for level promotion (1/4 per level, like LevelDB).
const BRANCHING: u32 = 4;

/// A single node in the skip list.
///
/// Nodes live in an arena (`Vec`) and point at each other by index — no
/// unsafe, good cache locality, and iteration over level 0 is a plain
/// linked-list walk.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
struct SkipNode {
    key: InternalKey,
    value: Value,
    /// forward[level] = arena index of the next node at that level.
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted container over `(InternalKey, value)` entries.
///
/// Ordering follows `InternalKey`: user key ascending, sequence descending.
/// Multiple versions of the same user key coexist as distinct nodes; the
/// newest version of a key is always the first one reached.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
pub struct SkipList {
    /// Arena of nodes. Index 0 is the head sentinel (its key is never read).
    nodes: Vec<SkipNode>,
    /// Current max level in use (1-based).
    height: usize,
    len: usize,
    size_bytes: usize,
}

/// Arena index of the head sentinel.
const HEAD: usize = 0;

impl SkipList {
    /// Create a new empty skip list.
    pub fn new() -> Self {
        let head = SkipNode {
            key: InternalKey::new(Vec::new(), 0, crate::types::ValueType::Put),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
        }
    }

    /// Insert an entry. Entries with identical `(user_key, sequence)` replace
    /// the existing node; otherwise a new version node is added.
    pub fn insert(&mut self, key: InternalKey, value: Value) {
        // Find the predecessor at every level.
        let mut prev = [HEAD; MAX_HEIGHT];
        let mut cur = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[cur].forward[level] {
                if self.nodes[next].key < key {
                    cur = next;
                } else {
                    break;
                }
            }
            prev[level] = cur;
        }

        // Exact duplicate (same user key, sequence, type): overwrite in place.
        if let Some(next) = self.nodes[cur].forward[0] {
            if self.nodes[next].key == key {
                let old_len = self.nodes[next].value.len();
                self.size_bytes = self.size_bytes - old_len + value.len();
                self.nodes[next].value = value;
                return;
            }
        }

        let node_height = self.random_height();
        if node_height > self.height {
            // New levels start from the head sentinel.
            for level in self.height..node_height {
                prev[level] = HEAD;
            }
            self.height = node_height;
        }

        self.size_bytes += key.user_key.len() + value.len() + Self::NODE_OVERHEAD;
        let idx = self.nodes.len();
        let mut forward = vec![None; node_height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[prev[level]].forward[level];
        }
        self.nodes.push(SkipNode {
            key,
            value,
            forward,
        });
        for level in 0..node_height {
            self.nodes[prev[level]].forward[level] = Some(idx);
        }
        self.len += 1;
    }

    /// Accounted per-entry overhead: sequence, type, pointers.
    const NODE_OVERHEAD: usize = 32;

    /// Find the newest version of `user_key`. Tombstones are returned like
    /// any other entry — interpreting them is the caller's job.
    pub fn get(&self, user_key: &[u8]) -> Option<(&InternalKey, &[u8])> {
        let node = self.seek_index(user_key)?;
        let node = &self.nodes[node];
        if node.key.user_key == user_key {
            // Sequence-descending order within a user key means the first
            // match is the newest version.
            Some((&node.key, node.value.as_slice()))
        } else {
            None
        }
    }

    /// Arena index of the first node whose user key is >= `user_key`.
    fn seek_index(&self, user_key: &[u8]) -> Option<usize> {
        let mut cur = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[cur].forward[level] {
                if self.nodes[next].key.user_key.as_slice() < user_key {
                    cur = next;
                } else {
                    break;
                }
            }
        }
        self.nodes[cur].forward[0]
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Create an iterator over all entries in sorted order.
    /// Traverses level 0 (the bottom level contains all entries).
    pub fn iter(&self) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.nodes[HEAD].forward[0],
        }
    }

    /// Iterator positioned at the first entry with user key >= `user_key`.
    pub fn iter_from(&self, user_key: &[u8]) -> SkipListIterator<'_> {
        SkipListIterator {
            list: self,
            current: self.seek_index(user_key),
        }
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    /// Higher branching factor = shorter skip list = less memory.
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over skip list entries in sorted order.
///
/// Simply follows level 0 forward pointers — level 0 is a sorted linked list
/// containing every entry.
pub struct SkipListIterator<'a> {
    list: &'a SkipList,
    current: Option<usize>,
}

impl<'a> Iterator for SkipListIterator<'a> {
    type Item = (&'a InternalKey, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.current?;
        let node = &self.list.nodes[idx];
        self.current = node.forward[0];
        Some((&node.key, node.value.as_slice()))
    }
}
