// SSTable tests: build, open, point lookups through the sparse index and
// bloom filter, and full/range iteration.

use siltdb::iterator::StorageIterator;
use siltdb::sstable::builder::TableBuilder;
use siltdb::sstable::reader::Table;
use siltdb::sstable::table_path;
use siltdb::types::{InternalKey, LookupResult, ValueType};

fn put_key(key: &[u8], seq: u64) -> InternalKey {
    InternalKey::new(key.to_vec(), seq, ValueType::Put)
}

fn build_table(
    dir: &std::path::Path,
    id: u64,
    block_size: usize,
    entries: &[(InternalKey, Vec<u8>)],
) -> std::sync::Arc<Table> {
    let path = table_path(dir, id);
    let mut builder = TableBuilder::new(&path, id, 0, block_size, 0.01).unwrap();
    for (key, value) in entries {
        builder.add(key, value).unwrap();
    }
    builder.finish().unwrap();
    Table::open(&path).unwrap()
}

// =============================================================================
// Test 1: Build a table, reopen it, read every key back
// =============================================================================
#[test]
fn build_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(InternalKey, Vec<u8>)> = (0..100u32)
        .map(|i| {
            (
                put_key(format!("key{i:03}").as_bytes(), i as u64 + 1),
                format!("value{i}").into_bytes(),
            )
        })
        .collect();
    let table = build_table(dir.path(), 1, 4096, &entries);

    assert_eq!(table.meta().entry_count, 100);
    assert_eq!(table.meta().min_key, b"key000");
    assert_eq!(table.meta().max_key, b"key099");
    assert_eq!(table.meta().max_sequence, 100);

    for i in (0..100u32).step_by(7) {
        let key = format!("key{i:03}").into_bytes();
        match table.get(&key).unwrap() {
            Some(LookupResult::Value(v)) => assert_eq!(v, format!("value{i}").into_bytes()),
            other => panic!("expected value for {i}, got {other:?}"),
        }
    }
}

// =============================================================================
// Test 2: Misses — outside the range, and inside but absent
// =============================================================================
#[test]
fn lookup_misses() {
    let dir = tempfile::tempdir().unwrap();
    let entries = vec![
        (put_key(b"banana", 1), b"v1".to_vec()),
        (put_key(b"date", 2), b"v2".to_vec()),
        (put_key(b"fig", 3), b"v3".to_vec()),
    ];
    let table = build_table(dir.path(), 1, 4096, &entries);

    assert!(table.get(b"apple").unwrap().is_none());
    assert!(table.get(b"grape").unwrap().is_none());
    assert!(table.get(b"cherry").unwrap().is_none());
}

// =============================================================================
// Test 3: Tombstones resolve as Tombstone, not as a miss
// =============================================================================
#[test]
fn tombstone_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let entries = vec![
        (put_key(b"alive", 2), b"v".to_vec()),
        (
            InternalKey::new(b"dead".to_vec(), 3, ValueType::Delete),
            Vec::new(),
        ),
    ];
    let table = build_table(dir.path(), 1, 4096, &entries);

    assert_eq!(table.get(b"dead").unwrap(), Some(LookupResult::Tombstone));
    assert_eq!(
        table.get(b"alive").unwrap(),
        Some(LookupResult::Value(b"v".to_vec()))
    );
}

// =============================================================================
// Test 4: Tiny block size forces many blocks; sparse index still finds keys
// =============================================================================
#[test]
fn multi_block_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(InternalKey, Vec<u8>)> = (0..500u32)
        .map(|i| {
            (
                put_key(format!("key{i:04}").as_bytes(), i as u64 + 1),
                vec![b'x'; 64],
            )
        })
        .collect();
    // 128-byte blocks: a couple of entries each.
    let table = build_table(dir.path(), 1, 128, &entries);
    assert!(table.meta().entry_count == 500);

    for i in [0u32, 1, 249, 250, 498, 499] {
        let key = format!("key{i:04}").into_bytes();
        assert!(
            matches!(table.get(&key).unwrap(), Some(LookupResult::Value(_))),
            "key{i:04} not found"
        );
    }
    assert!(table.get(b"key0500").unwrap().is_none());
}

// =============================================================================
// Test 5: All versions of one user key stay in a single block
// =============================================================================
#[test]
fn versions_never_straddle_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = Vec::new();
    entries.push((put_key(b"aaa", 1), vec![b'a'; 50]));
    // Many versions of one key, together larger than the block size.
    for seq in (1..=20u64).rev() {
        entries.push((put_key(b"hot", seq + 100), vec![b'h'; 50]));
    }
    entries.push((put_key(b"zzz", 1), vec![b'z'; 50]));
    let table = build_table(dir.path(), 1, 128, &entries);

    // The newest version must be what a lookup resolves to.
    match table.get(b"hot").unwrap() {
        Some(LookupResult::Value(v)) => assert_eq!(v.len(), 50),
        other => panic!("expected value, got {other:?}"),
    }
    assert_eq!(
        table.get(b"aaa").unwrap(),
        Some(LookupResult::Value(vec![b'a'; 50]))
    );
    assert_eq!(
        table.get(b"zzz").unwrap(),
        Some(LookupResult::Value(vec![b'z'; 50]))
    );
}

// =============================================================================
// Test 6: Full iteration returns every entry in key order
// =============================================================================
#[test]
fn full_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(InternalKey, Vec<u8>)> = (0..50u32)
        .map(|i| (put_key(format!("k{i:02}").as_bytes(), i as u64 + 1), vec![b'v']))
        .collect();
    let table = build_table(dir.path(), 1, 256, &entries);

    let mut iter = table.iter().unwrap();
    let mut count = 0;
    let mut prev: Option<Vec<u8>> = None;
    while iter.is_valid() {
        let key = iter.key().user_key.clone();
        if let Some(p) = &prev {
            assert!(*p < key);
        }
        prev = Some(key);
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 50);
}

// =============================================================================
// Test 7: Range iteration starts at the seek point
// =============================================================================
#[test]
fn range_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let entries: Vec<(InternalKey, Vec<u8>)> = (0..50u32)
        .map(|i| (put_key(format!("k{i:02}").as_bytes(), i as u64 + 1), vec![b'v']))
        .collect();
    let table = build_table(dir.path(), 1, 256, &entries);

    let mut iter = table.range_iter(b"k30").unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key().user_key, b"k30");

    let mut count = 0;
    while iter.is_valid() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 20);

    // Seek past the end.
    let iter = table.range_iter(b"zzz").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 8: Corrupt footer magic is rejected at open
// =============================================================================
#[test]
fn corrupt_footer_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let entries = vec![(put_key(b"k", 1), b"v".to_vec())];
    build_table(dir.path(), 1, 4096, &entries);

    let path = table_path(dir.path(), 1);
    let mut data = std::fs::read(&path).unwrap();
    let len = data.len();
    data[len - 1] ^= 0xFF; // last magic byte
    std::fs::write(&path, &data).unwrap();

    assert!(Table::open(&path).is_err());
}

// =============================================================================
// Test 9: Empty iterator input produces an empty but valid table
// =============================================================================
#[test]
fn empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let table = build_table(dir.path(), 1, 4096, &[]);
    assert_eq!(table.meta().entry_count, 0);
    assert!(table.get(b"anything").unwrap().is_none());
    assert!(!table.iter().unwrap().is_valid());
}
