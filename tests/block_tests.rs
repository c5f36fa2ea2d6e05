// Data block tests: build/decode round trip, binary search, checksums.

use siltdb::iterator::StorageIterator;
use siltdb::sstable::block::builder::BlockBuilder;
use siltdb::sstable::block::Block;
use siltdb::types::{InternalKey, ValueType};

fn put_key(key: &[u8], seq: u64) -> InternalKey {
    InternalKey::new(key.to_vec(), seq, ValueType::Put)
}

fn build_block(entries: &[(&[u8], u64, &[u8])]) -> Vec<u8> {
    let mut builder = BlockBuilder::new(1 << 16);
    for (key, seq, value) in entries {
        assert!(builder.add(&put_key(key, *seq), value));
    }
    builder.build()
}

// =============================================================================
// Test 1: Build then decode preserves entries and order
// =============================================================================
#[test]
fn round_trip() {
    let raw = build_block(&[
        (b"apple", 1, b"red"),
        (b"banana", 2, b"yellow"),
        (b"cherry", 3, b"dark"),
    ]);
    let block = Block::decode(raw).unwrap();
    assert_eq!(block.len(), 3);

    let mut iter = block.iter().unwrap();
    let mut seen = Vec::new();
    while iter.is_valid() {
        seen.push((iter.key().user_key.clone(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            (b"apple".to_vec(), b"red".to_vec()),
            (b"banana".to_vec(), b"yellow".to_vec()),
            (b"cherry".to_vec(), b"dark".to_vec()),
        ]
    );
}

// =============================================================================
// Test 2: Point lookup hits and misses
// =============================================================================
#[test]
fn get_hit_and_miss() {
    let raw = build_block(&[(b"a", 1, b"1"), (b"c", 2, b"3"), (b"e", 3, b"5")]);
    let block = Block::decode(raw).unwrap();

    let (ikey, value) = block.get(b"c").unwrap().unwrap();
    assert_eq!(ikey.sequence, 2);
    assert_eq!(&value[..], b"3");

    assert!(block.get(b"b").unwrap().is_none());
    assert!(block.get(b"z").unwrap().is_none());
}

// =============================================================================
// Test 3: Multiple versions of one key — get returns the newest
// =============================================================================
#[test]
fn get_resolves_newest_version() {
    let mut builder = BlockBuilder::new(1 << 16);
    builder.add(&put_key(b"k", 9), b"newest");
    builder.add_forced(&put_key(b"k", 5), b"older");
    builder.add_forced(
        &InternalKey::new(b"k".to_vec(), 3, ValueType::Delete),
        b"",
    );
    let block = Block::decode(builder.build()).unwrap();

    let (ikey, value) = block.get(b"k").unwrap().unwrap();
    assert_eq!(ikey.sequence, 9);
    assert_eq!(&value[..], b"newest");
}

// =============================================================================
// Test 4: Full block rejects new entries but always accepts the first
// =============================================================================
#[test]
fn size_limit_respected() {
    let mut builder = BlockBuilder::new(64);
    // First entry exceeds the target but is accepted anyway.
    assert!(builder.add(&put_key(b"big", 1), &[0u8; 100]));
    assert!(!builder.add(&put_key(b"more", 2), b"v"));
    assert_eq!(builder.len(), 1);
}

// =============================================================================
// Test 5: A flipped byte fails the block checksum
// =============================================================================
#[test]
fn bit_flip_detected() {
    let mut raw = build_block(&[(b"key", 1, b"value")]);
    raw[5] ^= 0x01;
    assert!(Block::decode(raw).is_err());
}

// =============================================================================
// Test 6: Truncated block is rejected
// =============================================================================
#[test]
fn truncated_block_rejected() {
    let raw = build_block(&[(b"key", 1, b"value")]);
    assert!(Block::decode(raw[..raw.len() - 2].to_vec()).is_err());
    assert!(Block::decode(vec![0u8; 4]).is_err());
}

// =============================================================================
// Test 7: Iterator seek lands on the first key >= target
// =============================================================================
#[test]
fn iterator_seek() {
    let raw = build_block(&[(b"b", 1, b"1"), (b"d", 2, b"2"), (b"f", 3, b"3")]);
    let mut iter = Block::decode(raw).unwrap().iter().unwrap();

    iter.seek(b"c").unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key().user_key, b"d");

    iter.seek(b"f").unwrap();
    assert_eq!(iter.key().user_key, b"f");

    iter.seek(b"g").unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 8: Empty block decodes and iterates to nothing
// =============================================================================
#[test]
fn empty_block() {
    let raw = BlockBuilder::new(4096).build();
    let block = Block::decode(raw).unwrap();
    assert!(block.is_empty());

    let iter = block.iter().unwrap();
    assert!(!iter.is_valid());
}
