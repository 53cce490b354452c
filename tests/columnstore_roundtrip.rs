//! Columnstore behavior through the full index path: write documents,
//! commit, reopen, and exercise column iterators.

use std::sync::Arc;

use tessera::core::types::doc_limits;
use tessera::directory::MemoryDirectory;
use tessera::formats::columnstore::ColumnHint;
use tessera::index::{FieldOpts, Index, IndexOptions, VecTokenStream};

fn open_index() -> Index {
    Index::open(Arc::new(MemoryDirectory::new()), IndexOptions::default()).unwrap()
}

#[test]
fn mask_column_roundtrip() {
    let index = open_index();
    let writer = index.writer().unwrap();

    // nine documents; only 2, 4, 8, 9 carry the payload-less column
    let mut batch = writer.documents();
    for doc in 1u32..=9 {
        batch
            .insert(|d| {
                let mut body = VecTokenStream::from_text("filler");
                d.index("body", FieldOpts::text(), &mut body)?;
                if matches!(doc, 2 | 4 | 8 | 9) {
                    d.store("flags", b"")?;
                }
                Ok(())
            })
            .unwrap();
    }
    drop(batch);
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    assert_eq!(reader.segments_count(), 1);
    let segment = reader.segment(0).unwrap();

    let mut it = segment
        .column_by_name("flags", ColumnHint::MASK)
        .unwrap()
        .expect("column exists");
    assert_eq!(it.seek(1).unwrap(), 2);
    assert_eq!(it.seek(2).unwrap(), 2);
    assert_eq!(it.seek(6).unwrap(), 8);
    assert_eq!(it.seek(10).unwrap(), doc_limits::EOF);

    let mut it = segment
        .column_by_name("flags", ColumnHint::MASK)
        .unwrap()
        .expect("column exists");
    let mut seen = Vec::new();
    while it.next().unwrap() {
        seen.push(it.value());
    }
    assert_eq!(seen, vec![2, 4, 8, 9]);
}

#[test]
fn fixed_length_column_with_gap() {
    let index = open_index();
    let writer = index.writer().unwrap();

    let mut batch = writer.documents();
    for doc in 1u32..=2037 {
        batch
            .insert(|d| {
                let mut body = VecTokenStream::from_text("x");
                d.index("body", FieldOpts::text(), &mut body)?;
                if doc != 1025 {
                    d.store("fixed", b"abcd")?;
                }
                Ok(())
            })
            .unwrap();
    }
    drop(batch);
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    let segment = reader.segment(0).unwrap();
    assert_eq!(segment.docs_count(), 2037);

    for probe in [1u32, 2, 512, 1024, 1026, 1500, 2037] {
        let mut it = segment
            .column_by_name("fixed", ColumnHint::NORMAL)
            .unwrap()
            .expect("column exists");
        assert_eq!(it.seek(probe).unwrap(), probe, "seek {probe}");
        assert_eq!(it.payload().unwrap(), b"abcd");
    }

    // the gap seeks to its successor
    let mut it = segment
        .column_by_name("fixed", ColumnHint::NORMAL)
        .unwrap()
        .expect("column exists");
    assert_eq!(it.seek(1025).unwrap(), 1026);
    assert_eq!(it.payload().unwrap(), b"abcd");
    assert_eq!(it.seek(2038).unwrap(), doc_limits::EOF);
}

#[test]
fn out_of_range_segment_access() {
    let index = open_index();
    let writer = index.writer().unwrap();
    let mut batch = writer.documents();
    batch
        .insert(|d| {
            let mut body = VecTokenStream::from_text("solo");
            d.index("body", FieldOpts::text(), &mut body)
        })
        .unwrap();
    drop(batch);
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    assert!(reader.segment(0).is_ok());
    assert!(matches!(
        reader.segment(1),
        Err(tessera::Error::OutOfRange(_))
    ));
}
