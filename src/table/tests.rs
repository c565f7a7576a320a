use std::sync::Arc;

use bytes::Bytes;
use tempfile::tempdir;

use super::*;
use crate::iterators::StorageIterator;

#[test]
fn test_block_meta_encode_decode() {
    let metas = vec![
        BlockMeta {
            offset: 0,
            first_key: Bytes::from_static(b"key0000"),
            last_key: Bytes::from_static(b"key0004"),
        },
        BlockMeta {
            offset: 64,
            first_key: Bytes::from_static(b"key0005"),
            last_key: Bytes::from_static(b"key0009"),
        },
        BlockMeta {
            offset: 128,
            first_key: Bytes::from_static(b"key0010"),
            last_key: Bytes::from_static(b"key0014"),
        },
    ];
    let mut buf = Vec::new();
    BlockMeta::encode_block_meta(&metas, &mut buf);
    let decoded = BlockMeta::decode_block_meta(&buf).unwrap();
    assert_eq!(decoded, metas);
}

#[test]
fn test_block_meta_rejects_corruption() {
    let metas = vec![
        BlockMeta {
            offset: 0,
            first_key: Bytes::from_static(b"apple"),
            last_key: Bytes::from_static(b"banana"),
        },
        BlockMeta {
            offset: 100,
            first_key: Bytes::from_static(b"cherry"),
            last_key: Bytes::from_static(b"durian"),
        },
    ];
    let mut buf = Vec::new();
    BlockMeta::encode_block_meta(&metas, &mut buf);
    for pos in 0..buf.len() {
        let mut corrupted = buf.clone();
        corrupted[pos] ^= 0xff;
        assert!(
            BlockMeta::decode_block_meta(&corrupted).is_err(),
            "flip at byte {} went unnoticed",
            pos
        );
    }
}

#[test]
fn test_block_meta_rejects_short_input() {
    assert!(BlockMeta::decode_block_meta(&[]).is_err());
    assert!(BlockMeta::decode_block_meta(&[0; 4]).is_err());
    assert!(BlockMeta::decode_block_meta(&[0; 7]).is_err());
}

fn key_of(idx: usize) -> Vec<u8> {
    format!("key{:04}", idx).into_bytes()
}

fn value_of(idx: usize) -> Vec<u8> {
    format!("value{}", idx).into_bytes()
}

fn build_sst(block_size: usize, num_keys: usize, path: impl AsRef<std::path::Path>) -> SsTable {
    let mut builder = SsTableBuilder::new(block_size);
    for idx in 0..num_keys {
        builder.add(&key_of(idx), &value_of(idx));
    }
    builder.build_for_test(path).unwrap()
}

#[test]
fn test_sst_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.sst");

    let mut builder = SsTableBuilder::new(4096);
    builder.add(b"key1", b"value1");
    builder.add(b"key2", b"value2");
    builder.add(b"key3", b"value3");
    let sst = builder.build_for_test(&path).unwrap();

    assert_eq!(sst.first_key().as_ref(), b"key1");
    assert_eq!(sst.last_key().as_ref(), b"key3");
    assert_eq!(sst.num_of_blocks(), 1);
    assert_eq!(
        sst.read_block(0).unwrap().get_value_binary(b"key2"),
        Some(&b"value2"[..])
    );

    // reopening from disk yields the same view
    let reopened = SsTable::open(0, None, FileObject::open(&path).unwrap()).unwrap();
    assert_eq!(reopened.first_key().as_ref(), b"key1");
    assert_eq!(reopened.last_key().as_ref(), b"key3");
    assert_eq!(reopened.num_of_blocks(), 1);
    assert_eq!(reopened.table_size(), sst.table_size());
}

#[test]
fn test_sst_block_rotation() {
    let dir = tempdir().unwrap();
    let sst = build_sst(64, 20, dir.path().join("1.sst"));

    assert!(sst.num_of_blocks() > 1);
    for idx in 0..20 {
        let key = key_of(idx);
        let block_idx = sst.find_block_idx(&key).unwrap();
        let block = sst.read_block(block_idx).unwrap();
        assert_eq!(
            block.get_value_binary(&key),
            Some(&value_of(idx)[..]),
            "lost {:?} after rotation",
            String::from_utf8_lossy(&key)
        );
    }
}

#[test]
fn test_sst_find_block_idx_out_of_range() {
    let dir = tempdir().unwrap();
    let sst = build_sst(128, 100, dir.path().join("1.sst"));

    assert!(sst.find_block_idx(b"key9999").is_err());
    assert!(sst.find_block_idx(b"a").is_err());
    assert!(sst.find_block_idx(&key_of(57)).is_ok());
}

#[test]
fn test_sst_builder_estimated_size() {
    let mut builder = SsTableBuilder::new(64);
    assert_eq!(builder.estimated_size(), 0);
    for idx in 0..20 {
        builder.add(&key_of(idx), &value_of(idx));
    }
    // only finished blocks count; at least one rotated out by now
    assert!(builder.estimated_size() > 0);
}

#[test]
fn test_sst_empty_build_fails() {
    let dir = tempdir().unwrap();
    let builder = SsTableBuilder::new(4096);
    assert!(builder.build_for_test(dir.path().join("1.sst")).is_err());
}

#[test]
fn test_sst_meta_only_handle() {
    let sst = SsTable::create_with_meta_only(
        7,
        4096,
        Bytes::from_static(b"key0000"),
        Bytes::from_static(b"key0099"),
    );
    assert_eq!(sst.sst_id(), 7);
    assert_eq!(sst.table_size(), 4096);
    assert_eq!(sst.first_key().as_ref(), b"key0000");
    assert_eq!(sst.last_key().as_ref(), b"key0099");
    assert_eq!(sst.num_of_blocks(), 0);
    assert!(sst.read_block(0).is_err());
}

#[test]
fn test_sst_rejects_corrupted_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.sst");
    build_sst(4096, 100, &path);

    // flip one byte inside the block section; the meta section still
    // decodes, the block read must not.
    let mut raw = std::fs::read(&path).unwrap();
    raw[10] ^= 0xff;
    std::fs::write(&path, &raw).unwrap();

    let sst = SsTable::open(0, None, FileObject::open(&path).unwrap()).unwrap();
    assert!(sst.read_block(0).is_err());
}

#[test]
fn test_sst_iterator_full_scan() {
    let dir = tempdir().unwrap();
    let sst = Arc::new(build_sst(128, 100, dir.path().join("1.sst")));

    let mut iter = SsTableIterator::create_and_seek_to_first(sst).unwrap();
    for idx in 0..100 {
        assert!(iter.is_valid());
        assert_eq!(iter.key(), key_of(idx));
        assert_eq!(iter.value(), value_of(idx));
        iter.next().unwrap();
    }
    assert!(!iter.is_valid());

    iter.seek_to_first().unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key(), key_of(0));
}

#[test]
fn test_sst_iterator_seek() {
    let dir = tempdir().unwrap();
    let sst = Arc::new(build_sst(128, 100, dir.path().join("1.sst")));

    // exact hit
    let iter = SsTableIterator::create_and_seek_to_key(sst.clone(), &key_of(42)).unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key(), key_of(42));

    // a probe between entries lands on the next key
    let mut iter = SsTableIterator::create_and_seek_to_key(sst.clone(), b"key0042x").unwrap();
    assert!(iter.is_valid());
    assert_eq!(iter.key(), key_of(43));

    // reseek walks backwards fine
    iter.seek_to_key(&key_of(0)).unwrap();
    assert_eq!(iter.key(), key_of(0));

    // crossing a block boundary mid-seek still finds every key
    for idx in 0..100 {
        iter.seek_to_key(&key_of(idx)).unwrap();
        assert!(iter.is_valid());
        assert_eq!(iter.key(), key_of(idx));
    }
}

#[test]
fn test_sst_reopened_iterates_identically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.sst");
    build_sst(64, 20, &path);

    let reopened = Arc::new(SsTable::open(0, None, FileObject::open(&path).unwrap()).unwrap());
    let mut iter = SsTableIterator::create_and_seek_to_first(reopened).unwrap();
    for idx in 0..20 {
        assert!(iter.is_valid());
        assert_eq!(iter.key(), key_of(idx));
        assert_eq!(iter.value(), value_of(idx));
        iter.next().unwrap();
    }
    assert!(!iter.is_valid());
}
