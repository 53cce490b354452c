use std::sync::Arc;

use tessera_core::types::doc_limits;
use tessera_directory::{Directory, IndexOutput, MemoryDirectory, XorKeystreamCipher};

use super::*;

fn seal(writer: ColumnstoreWriter, segment_docs: u32) -> Arc<MemoryDirectory> {
    let dir = Arc::new(MemoryDirectory::new());
    let mut data = dir.create("seg.cs").unwrap();
    let mut index = dir.create("seg.csi").unwrap();
    writer.finish(&mut data, &mut index, segment_docs).unwrap();
    data.close().unwrap();
    index.close().unwrap();
    dir
}

fn open(dir: Arc<MemoryDirectory>, opts: ReaderOptions) -> ColumnstoreReader {
    ColumnstoreReader::open(dir, "seg.cs", "seg.csi", opts).unwrap()
}

#[test]
fn test_mask_column_roundtrip() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts {
        name: Some("flags".to_string()),
        ..ColumnOpts::default()
    });
    for doc in [2u32, 4, 8, 9] {
        writer.column_mut(id).unwrap().prepare(doc).unwrap();
    }
    let reader = open(seal(writer, 16), ReaderOptions::default());

    let column = reader.column(id).unwrap();
    assert_eq!(column.column_type(), ColumnType::Mask);
    assert_eq!(column.docs_count(), 4);
    assert_eq!(reader.column_by_name("flags").unwrap().id(), id);

    let mut it = reader.iterator(id, ColumnHint::MASK).unwrap();
    assert_eq!(it.seek(1).unwrap(), 2);
    assert_eq!(it.seek(2).unwrap(), 2);
    assert_eq!(it.seek(6).unwrap(), 8);
    assert_eq!(it.seek(10).unwrap(), doc_limits::EOF);

    let mut it = reader.iterator(id, ColumnHint::MASK).unwrap();
    let mut seen = Vec::new();
    while it.next().unwrap() {
        seen.push(it.value());
    }
    assert_eq!(seen, vec![2, 4, 8, 9]);
    // mask columns carry no value bytes
    assert_eq!(it.payload().unwrap(), b"");
}

#[test]
fn test_fixed_column_with_gap() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    for doc in 1..=2037u32 {
        if doc == 1025 {
            continue;
        }
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(b"abcd").unwrap();
    }
    let reader = open(seal(writer, 2037), ReaderOptions::default());
    let column = reader.column(id).unwrap();
    assert_eq!(column.column_type(), ColumnType::Fixed);

    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    for probe in [1u32, 2, 512, 1024, 1026, 2000, 2037] {
        let mut it2 = reader.iterator(id, ColumnHint::NORMAL).unwrap();
        assert_eq!(it2.seek(probe).unwrap(), probe, "seek {probe}");
        assert_eq!(it2.payload().unwrap(), b"abcd");
    }
    assert_eq!(it.seek(1025).unwrap(), 1026);
    assert_eq!(it.payload().unwrap(), b"abcd");
}

#[test]
fn test_sparse_variable_length_values() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    let value_of = |doc: u32| -> Vec<u8> {
        let mut v = format!("v{doc}").into_bytes();
        v.resize(1 + (doc as usize % 7), b'x');
        v
    };
    let docs: Vec<u32> = (1..=500).map(|i| i * 3).collect();
    for &doc in &docs {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(&value_of(doc)).unwrap();
    }
    let reader = open(seal(writer, 2000), ReaderOptions::default());
    assert_eq!(reader.column(id).unwrap().column_type(), ColumnType::Sparse);

    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    for &doc in &docs {
        assert!(it.next().unwrap());
        assert_eq!(it.value(), doc);
        assert_eq!(it.payload().unwrap(), value_of(doc).as_slice());
    }
    assert!(!it.next().unwrap());

    // random access
    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    assert_eq!(it.seek(907).unwrap(), 909);
    assert_eq!(it.payload().unwrap(), value_of(909).as_slice());
}

#[test]
fn test_full_coverage_column_has_no_bitmap() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    for doc in 1..=100u32 {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(&doc.to_le_bytes()).unwrap();
    }
    let reader = open(seal(writer, 100), ReaderOptions::default());
    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    assert_eq!(it.seek(42).unwrap(), 42);
    assert_eq!(it.payload().unwrap(), 42u32.to_le_bytes());
    assert_eq!(it.seek(101).unwrap(), doc_limits::EOF);
}

#[test]
fn test_dense_fixed_under_consolidation() {
    let mut writer = ColumnstoreWriter::new(true, None);
    let id = writer.push_column(ColumnOpts::default());
    for doc in 1..=300u32 {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(&[doc as u8; 8]).unwrap();
    }
    let reader = open(seal(writer, 300), ReaderOptions::default());
    assert_eq!(
        reader.column(id).unwrap().column_type(),
        ColumnType::DenseFixed
    );
    let mut it = reader
        .iterator(id, ColumnHint::CONSOLIDATION)
        .unwrap();
    assert_eq!(it.seek(77).unwrap(), 77);
    assert_eq!(it.payload().unwrap(), &[77u8; 8]);
}

#[test]
fn test_reset_then_reuse_pending_slot() {
    // pinned behavior: prepare -> reset -> prepare(next_key) must leave no
    // trace of the rolled-back value
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    let col = writer.column_mut(id).unwrap();
    col.prepare(3).unwrap();
    col.write_bytes(b"discarded").unwrap();
    col.reset();
    col.prepare(5).unwrap();
    col.write_bytes(b"kept----").unwrap();
    col.prepare(9).unwrap();
    col.write_bytes(b"second--").unwrap();
    assert_eq!(col.docs_count(), 2);

    let reader = open(seal(writer, 10), ReaderOptions::default());
    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    assert!(it.next().unwrap());
    assert_eq!(it.value(), 5);
    assert_eq!(it.payload().unwrap(), b"kept----");
    assert!(it.next().unwrap());
    assert_eq!(it.value(), 9);
    assert_eq!(it.payload().unwrap(), b"second--");
    assert!(!it.next().unwrap());
}

#[test]
fn test_out_of_order_key_rejected() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    let col = writer.column_mut(id).unwrap();
    col.prepare(5).unwrap();
    assert!(col.prepare(5).is_err());
    assert!(col.prepare(4).is_err());
    assert!(col.prepare(doc_limits::INVALID).is_err());
}

#[test]
fn test_encrypted_roundtrip_and_missing_cipher() {
    let cipher = Arc::new(XorKeystreamCipher::test_cipher());
    let mut writer = ColumnstoreWriter::new(false, Some(cipher.clone()));
    let id = writer.push_column(ColumnOpts {
        name: Some("secret".to_string()),
        ..ColumnOpts::default()
    });
    for doc in [3u32, 7, 20] {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(format!("value-{doc}").as_bytes()).unwrap();
    }
    let dir = seal(writer, 64);

    // without a cipher the open fails as an index error
    let err = ColumnstoreReader::open(
        dir.clone(),
        "seg.cs",
        "seg.csi",
        ReaderOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, tessera_core::Error::Index(_)));

    let reader = open(
        dir,
        ReaderOptions {
            cipher: Some(cipher),
            ..ReaderOptions::default()
        },
    );
    assert_eq!(reader.column_by_name("secret").unwrap().id(), id);
    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    assert_eq!(it.seek(7).unwrap(), 7);
    assert_eq!(it.payload().unwrap(), b"value-7");
}

#[test]
fn test_warmup_with_accountant() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let small = writer.push_column(ColumnOpts::default());
    let big = writer.push_column(ColumnOpts::default());
    for doc in [1u32, 5, 9] {
        let col = writer.column_mut(small).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(b"ab").unwrap();
    }
    for doc in 1..=200u32 {
        let col = writer.column_mut(big).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(&[0u8; 64]).unwrap();
    }
    let dir = seal(writer, 256);

    // accountant admits only small buffers; the big column silently stays
    // on disk
    let mut reader = ColumnstoreReader::open(
        dir,
        "seg.cs",
        "seg.csi",
        ReaderOptions {
            cipher: None,
            accountant: Some(Arc::new(|bytes| bytes < 1024)),
        },
    )
    .unwrap();
    reader.warmup(&[small, big]).unwrap();

    let mut it = reader.iterator(small, ColumnHint::NORMAL).unwrap();
    assert_eq!(it.seek(5).unwrap(), 5);
    assert_eq!(it.payload().unwrap(), b"ab");

    let mut it = reader.iterator(big, ColumnHint::NORMAL).unwrap();
    assert_eq!(it.seek(100).unwrap(), 100);
    assert_eq!(it.payload().unwrap(), &[0u8; 64]);
}

#[test]
fn test_prev_doc_hint() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts {
        track_prev_doc: true,
        ..ColumnOpts::default()
    });
    for doc in [4u32, 9, 11] {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(b"x").unwrap();
    }
    let reader = open(seal(writer, 100), ReaderOptions::default());
    let mut it = reader
        .iterator(id, ColumnHint::PREV_DOC)
        .unwrap();
    assert_eq!(it.seek(9).unwrap(), 9);
    assert_eq!(it.prev_value(), 4);
    assert!(it.next().unwrap());
    assert_eq!(it.prev_value(), 9);
}

#[test]
fn test_bitmap_cardinality_matches_docs_count() {
    let mut writer = ColumnstoreWriter::new(false, None);
    let id = writer.push_column(ColumnOpts::default());
    let docs: Vec<u32> = (1..=1000).filter(|d| d % 3 != 0).collect();
    for &doc in &docs {
        let col = writer.column_mut(id).unwrap();
        col.prepare(doc).unwrap();
        col.write_bytes(b"p").unwrap();
    }
    let reader = open(seal(writer, 4000), ReaderOptions::default());
    let column = reader.column(id).unwrap();
    assert_eq!(column.docs_count() as usize, docs.len());

    let mut it = reader.iterator(id, ColumnHint::NORMAL).unwrap();
    let mut count = 0u32;
    while it.next().unwrap() {
        count += 1;
    }
    assert_eq!(count, column.docs_count());
}
