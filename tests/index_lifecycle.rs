//! Transactional lifecycle: commit/reopen, deletion by filter,
//! consolidation racing a commit, writer rollback, cleanup.

use std::sync::Arc;

use tessera::directory::MemoryDirectory;
use tessera::index::{
    ConsolidateAll, FieldOpts, Index, IndexOptions, Token, VecTokenStream,
};
use tessera::search::{Filter, FilterDeleter, PrepareContext, TermFilter};
use tessera::DocIterator;

fn open_index() -> Index {
    Index::open(Arc::new(MemoryDirectory::new()), IndexOptions::default()).unwrap()
}

/// Insert one document whose `key` field holds a single term.
fn insert_keyed(writer: &tessera::index::IndexWriter, keys: &[&str]) {
    let mut batch = writer.documents();
    for key in keys {
        batch
            .insert(|d| {
                let mut stream = VecTokenStream::new(vec![Token::new(key.as_bytes().to_vec())]);
                d.index("key", FieldOpts::text(), &mut stream)?;
                d.store("raw", key.as_bytes())
            })
            .unwrap();
    }
}

/// Collect the `key` terms of every live document across all segments.
fn live_keys(index: &Index) -> Vec<String> {
    let reader = index.reader().unwrap();
    let mut keys = Vec::new();
    for segment in reader.segments() {
        let Some(field) = segment.field("key") else {
            continue;
        };
        let mut terms = field.iterator().unwrap();
        while terms.next().unwrap() {
            let cookie = terms.meta().unwrap();
            let mut postings = field
                .postings(cookie, tessera::core::IndexFeatures::NONE)
                .unwrap();
            while postings.next() {
                if !segment.mask().contains(&postings.value()) {
                    keys.push(String::from_utf8(terms.term().to_vec()).unwrap());
                }
            }
        }
    }
    keys.sort();
    keys
}

fn deleter_for(index: &Index, key: &str) -> Arc<FilterDeleter> {
    let reader = index.reader().unwrap();
    let filter = TermFilter::new("key", key.as_bytes().to_vec());
    let prepared = filter.prepare(&PrepareContext::new(&reader)).unwrap();
    Arc::new(FilterDeleter::from_prepared(prepared))
}

#[test]
fn commit_reopen_roundtrip() {
    let index = open_index();
    let writer = index.writer().unwrap();

    insert_keyed(&writer, &["doc1", "doc2"]);
    writer.commit().unwrap();
    assert_eq!(live_keys(&index), vec!["doc1", "doc2"]);

    insert_keyed(&writer, &["doc3"]);
    // not visible until committed
    assert_eq!(live_keys(&index), vec!["doc1", "doc2"]);
    writer.commit().unwrap();
    assert_eq!(live_keys(&index), vec!["doc1", "doc2", "doc3"]);

    let reader = index.reader().unwrap();
    assert_eq!(reader.segments_count(), 2);
    assert_eq!(reader.live_docs_count(), 3);
}

#[test]
fn second_writer_is_locked_out() {
    let index = open_index();
    let _writer = index.writer().unwrap();
    assert!(matches!(
        index.writer(),
        Err(tessera::Error::LockObtainFailed(_))
    ));
}

#[test]
fn deletion_by_filter_masks_documents() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["doc1", "doc2", "doc3"]);
    writer.commit().unwrap();

    writer.remove(deleter_for(&index, "doc2"));
    writer.commit().unwrap();

    assert_eq!(live_keys(&index), vec!["doc1", "doc3"]);
    let reader = index.reader().unwrap();
    let segment = reader.segment(0).unwrap();
    assert_eq!(segment.docs_count(), 3);
    assert_eq!(segment.live_docs_count(), 2);
    assert!(segment.meta().has_mask());
}

#[test]
fn deletion_does_not_mask_later_documents() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["doc1"]);
    writer.commit().unwrap();

    // deletion queued before the matching document is written
    writer.remove(deleter_for(&index, "late"));
    insert_keyed(&writer, &["late"]);
    writer.commit().unwrap();

    assert_eq!(live_keys(&index), vec!["doc1", "late"]);
}

#[test]
fn consolidation_merges_segments() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["doc1", "doc2"]);
    writer.commit().unwrap();
    insert_keyed(&writer, &["doc3"]);
    writer.commit().unwrap();
    assert_eq!(index.reader().unwrap().segments_count(), 2);

    assert!(writer.consolidate(&ConsolidateAll).unwrap());
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    assert_eq!(reader.segments_count(), 1);
    assert_eq!(reader.live_docs_count(), 3);
    assert_eq!(live_keys(&index), vec!["doc1", "doc2", "doc3"]);
}

#[test]
fn consolidation_survives_intervening_commit() {
    let index = open_index();
    let writer = index.writer().unwrap();

    // segment A = {doc1, doc2}, segment B = {doc3}
    insert_keyed(&writer, &["doc1", "doc2"]);
    writer.commit().unwrap();
    insert_keyed(&writer, &["doc3"]);
    writer.commit().unwrap();

    // begin a commit, so the consolidation below lands mid-transaction
    // and is staged instead of installed
    writer.begin().unwrap();
    assert!(writer.consolidate(&ConsolidateAll).unwrap());
    writer.finish().unwrap();

    // the merge snapshot predates this deletion; installing the staged
    // result must remap the fresh mask onto the merged segment
    writer.remove(deleter_for(&index, "doc1"));
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    assert_eq!(reader.segments_count(), 1);
    let segment = reader.segment(0).unwrap();
    assert_eq!(segment.docs_count(), 3);
    assert_eq!(segment.live_docs_count(), 2);
    assert_eq!(live_keys(&index), vec!["doc2", "doc3"]);
}

#[test]
fn failed_document_rolls_back_whole_batch() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["committed"]);
    writer.commit().unwrap();

    {
        let mut batch = writer.documents();
        batch
            .insert(|d| {
                let mut stream = VecTokenStream::from_text("valid");
                d.index("key", FieldOpts::text(), &mut stream)
            })
            .unwrap();
        // the second document's analyzer fails mid-stream
        let result = batch.insert(|d| {
            let tokens = vec![Token::new("a"), Token::new("b"), Token::new("c")];
            let mut failing = tessera::index::FailingTokenStream::new(tokens, 1);
            d.index("key", FieldOpts::text(), &mut failing)
        });
        assert!(result.is_err());
        // a poisoned batch rejects further inserts
        assert!(batch.insert(|_| Ok(())).is_err());
    }
    writer.commit().unwrap();

    // only the previously committed document is visible
    assert_eq!(live_keys(&index), vec!["committed"]);

    // the writer stays usable
    insert_keyed(&writer, &["after"]);
    writer.commit().unwrap();
    assert_eq!(live_keys(&index), vec!["after", "committed"]);
}

#[test]
fn rollback_discards_pending_commit() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["keep"]);
    writer.commit().unwrap();

    insert_keyed(&writer, &["discard"]);
    writer.begin().unwrap();
    writer.rollback().unwrap();

    assert_eq!(live_keys(&index), vec!["keep"]);
    let reader = index.reader().unwrap();
    assert_eq!(reader.generation(), 1);
}

#[test]
fn cleanup_removes_superseded_files() {
    let index = open_index();
    let writer = index.writer().unwrap();
    insert_keyed(&writer, &["doc1", "doc2"]);
    writer.commit().unwrap();
    insert_keyed(&writer, &["doc3"]);
    writer.commit().unwrap();
    assert!(writer.consolidate(&ConsolidateAll).unwrap());
    writer.commit().unwrap();

    let removed = index.cleanup().unwrap();
    assert!(!removed.is_empty(), "stale segment files should go");

    // the index still reads correctly afterwards
    assert_eq!(live_keys(&index), vec!["doc1", "doc2", "doc3"]);

    // with a reader open, its files survive cleanup
    let reader = index.reader().unwrap();
    insert_keyed(&writer, &["doc4"]);
    writer.commit().unwrap();
    index.cleanup().unwrap();
    assert_eq!(reader.live_docs_count(), 3);
    assert_eq!(reader.segments_count(), 1);
    // the pinned segment is still readable
    let segment = reader.segment(0).unwrap();
    let mut terms = segment.field("key").unwrap().iterator().unwrap();
    assert!(terms.next().unwrap());
}
