// MemTable tests: writes, tombstones, version resolution, and flush triggers.

use siltdb::memtable::MemTable;
use siltdb::types::LookupResult;

// =============================================================================
// Test 1: Put then get
// =============================================================================
#[test]
fn put_and_get() {
    let mut mt = MemTable::new(1 << 20);
    mt.put(b"key".to_vec(), b"value".to_vec(), 1);

    assert_eq!(
        mt.get(b"key"),
        Some(LookupResult::Value(b"value".to_vec()))
    );
    assert_eq!(mt.get(b"other"), None);
}

// =============================================================================
// Test 2: Newer version shadows older
// =============================================================================
#[test]
fn newer_version_wins() {
    let mut mt = MemTable::new(1 << 20);
    mt.put(b"key".to_vec(), b"old".to_vec(), 1);
    mt.put(b"key".to_vec(), b"new".to_vec(), 2);

    assert_eq!(mt.get(b"key"), Some(LookupResult::Value(b"new".to_vec())));
    // Both versions are retained until flush.
    assert_eq!(mt.len(), 2);
}

// =============================================================================
// Test 3: Delete writes a tombstone — a resolved answer, not a miss
// =============================================================================
#[test]
fn delete_is_tombstone() {
    let mut mt = MemTable::new(1 << 20);
    mt.put(b"key".to_vec(), b"value".to_vec(), 1);
    mt.delete(b"key".to_vec(), 2);

    assert_eq!(mt.get(b"key"), Some(LookupResult::Tombstone));
}

// =============================================================================
// Test 4: Delete of a key this memtable never saw still resolves
// =============================================================================
#[test]
fn delete_unknown_key() {
    let mut mt = MemTable::new(1 << 20);
    mt.delete(b"ghost".to_vec(), 1);

    // The key may exist in an SSTable; the tombstone must shadow it.
    assert_eq!(mt.get(b"ghost"), Some(LookupResult::Tombstone));
}

// =============================================================================
// Test 5: Put after delete resurrects the key
// =============================================================================
#[test]
fn put_after_delete() {
    let mut mt = MemTable::new(1 << 20);
    mt.put(b"key".to_vec(), b"v1".to_vec(), 1);
    mt.delete(b"key".to_vec(), 2);
    mt.put(b"key".to_vec(), b"v2".to_vec(), 3);

    assert_eq!(mt.get(b"key"), Some(LookupResult::Value(b"v2".to_vec())));
}

// =============================================================================
// Test 6: is_full flips once the size limit is reached
// =============================================================================
#[test]
fn is_full_at_size_limit() {
    let mut mt = MemTable::new(256);
    assert!(!mt.is_full());

    let mut seq = 0;
    while !mt.is_full() {
        seq += 1;
        mt.put(format!("key{seq}").into_bytes(), vec![0u8; 32], seq);
        assert!(seq < 1000, "memtable never filled");
    }
    assert!(mt.size() >= 256);
}

// =============================================================================
// Test 7: range_entries returns [low, high) in order, tombstones included
// =============================================================================
#[test]
fn range_entries_half_open() {
    let mut mt = MemTable::new(1 << 20);
    mt.put(b"a".to_vec(), b"1".to_vec(), 1);
    mt.put(b"b".to_vec(), b"2".to_vec(), 2);
    mt.delete(b"c".to_vec(), 3);
    mt.put(b"d".to_vec(), b"4".to_vec(), 4);

    let entries = mt.range_entries(b"b", b"d");
    let keys: Vec<Vec<u8>> = entries.iter().map(|(k, _)| k.user_key.clone()).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    assert!(entries[1].0.is_tombstone());
}

// =============================================================================
// Test 8: WAL segment bookkeeping deduplicates consecutive attaches
// =============================================================================
#[test]
fn wal_ids_deduplicated() {
    let mut mt = MemTable::new(1 << 20);
    mt.attach_wal(3);
    mt.attach_wal(3);
    mt.attach_wal(4);

    assert_eq!(mt.wal_ids(), &[3, 4]);
}
