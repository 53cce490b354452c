//! Scoring end to end: a by-range query under TF-IDF with norms must rank
//! documents by hand-computed scores.

use std::ops::Bound;
use std::sync::Arc;

use tessera::core::types::doc_limits;
use tessera::directory::MemoryDirectory;
use tessera::index::{FieldOpts, Index, IndexOptions, VecTokenStream};
use tessera::search::{
    Filter, PhraseFilter, PrepareContext, RangeFilter, Scorer, TermFilter, TfIdf,
};
use tessera::DocIterator;

fn open_index() -> Index {
    Index::open(Arc::new(MemoryDirectory::new()), IndexOptions::default()).unwrap()
}

/// Field contents per document; terms are single digits so byte order is
/// numeric order.
fn corpus() -> Vec<&'static str> {
    vec![
        "7",                 // doc 1: shortest match of "7"
        "7 7 5",             // doc 2: two "7"s in a longer field
        "8 1 1 1 1 1 1 1 1", // doc 3: one "8" in a long field
        "5 5",               // doc 4: no term in range
        "7 8",               // doc 5: both matching terms
    ]
}

fn build() -> Index {
    let index = open_index();
    let writer = index.writer().unwrap();
    let mut batch = writer.documents();
    for text in corpus() {
        batch
            .insert(|d| {
                let mut stream = VecTokenStream::from_text(text);
                d.index("field", FieldOpts::text().with_norms(), &mut stream)
            })
            .unwrap();
    }
    drop(batch);
    writer.commit().unwrap();
    index
}

fn ranked(index: &Index, filter: &dyn Filter, scorer: Arc<dyn Scorer>) -> Vec<(u32, f32)> {
    let reader = index.reader().unwrap();
    let ctx = PrepareContext::new(&reader).with_scorer(scorer);
    let prepared = filter.prepare(&ctx).unwrap();
    let mut hits = Vec::new();
    for segment in reader.segments() {
        let mut it = prepared.execute(segment).unwrap();
        while it.next() {
            hits.push((it.value(), it.score()));
        }
    }
    hits.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    hits
}

#[test]
fn range_query_ranks_by_tfidf_with_norms() {
    let index = build();
    let filter = RangeFilter::new(
        "field",
        Bound::Excluded(b"6".to_vec()),
        Bound::Included(b"8".to_vec()),
    );
    let hits = ranked(&index, &filter, Arc::new(TfIdf::new(true)));

    let docs: Vec<u32> = hits.iter().map(|&(d, _)| d).collect();
    // hand-computed with idf = 1 + ln((N+1)/(df+1)), tf = sqrt(freq),
    // norm = 1/sqrt(field length), N = 5, df("7") = 3, df("8") = 2:
    //   doc 5: (1.4055 + 1.6931) / sqrt(2)   = 2.1910
    //   doc 1: 1.4055 * 1.0                  = 1.4055
    //   doc 2: 1.4055 * sqrt(2) / sqrt(3)    = 1.1476
    //   doc 3: 1.6931 / 3                    = 0.5644
    assert_eq!(docs, vec![5, 1, 2, 3]);

    let by_doc = |d: u32| hits.iter().find(|&&(doc, _)| doc == d).unwrap().1;
    assert!((by_doc(5) - 2.1910).abs() < 1e-3);
    assert!((by_doc(1) - 1.4055).abs() < 1e-3);
    assert!((by_doc(2) - 1.1476).abs() < 1e-3);
    assert!((by_doc(3) - 0.5644).abs() < 1e-3);
}

#[test]
fn term_query_scores_and_masks() {
    let index = build();
    let filter = TermFilter::new("field", b"7".to_vec());
    let hits = ranked(&index, &filter, Arc::new(TfIdf::new(true)));
    let docs: Vec<u32> = hits.iter().map(|&(d, _)| d).collect();
    // doc 1 (norm 1.0) beats doc 2 (sqrt(2)/sqrt(3)) beats doc 5 (1/sqrt(2))
    assert_eq!(docs, vec![1, 2, 5]);
}

#[test]
fn unscored_execution_propagates_zero() {
    let index = build();
    let reader = index.reader().unwrap();
    let filter = TermFilter::new("field", b"8".to_vec());
    let prepared = filter.prepare(&PrepareContext::new(&reader)).unwrap();
    let segment = reader.segment(0).unwrap();
    let mut it = prepared.execute(segment).unwrap();
    assert!(it.next());
    assert_eq!(it.score(), 0.0);
}

#[test]
fn seek_contract_on_query_iterators() {
    let index = build();
    let reader = index.reader().unwrap();
    let filter = TermFilter::new("field", b"7".to_vec());
    let prepared = filter.prepare(&PrepareContext::new(&reader)).unwrap();
    let segment = reader.segment(0).unwrap();

    let mut it = prepared.execute(segment).unwrap();
    // docs with "7": 1, 2, 5
    assert_eq!(it.seek(2), 2);
    // seeking backward returns the current document
    assert_eq!(it.seek(1), 2);
    assert_eq!(it.seek(3), 5);
    assert_eq!(it.seek(doc_limits::EOF), doc_limits::EOF);
    assert!(!it.next());
    assert_eq!(it.seek(1), doc_limits::EOF);
}

#[test]
fn phrase_query_matches_adjacent_terms() {
    let index = open_index();
    let writer = index.writer().unwrap();
    let mut batch = writer.documents();
    for text in [
        "quick brown fox",
        "brown quick fox",
        "the quick brown dog",
        "quick red brown",
    ] {
        batch
            .insert(|d| {
                let mut stream = VecTokenStream::from_text(text);
                d.index("body", FieldOpts::text(), &mut stream)
            })
            .unwrap();
    }
    drop(batch);
    writer.commit().unwrap();

    let reader = index.reader().unwrap();
    let filter = PhraseFilter::of_terms("body", &[b"quick".as_slice(), b"brown".as_slice()]);
    let prepared = filter.prepare(&PrepareContext::new(&reader)).unwrap();
    let segment = reader.segment(0).unwrap();
    let mut it = prepared.execute(segment).unwrap();
    let mut docs = Vec::new();
    while it.next() {
        docs.push(it.value());
    }
    assert_eq!(docs, vec![1, 3]);

    // with slop 1, "quick red brown" also matches
    let sloppy = PhraseFilter::of_terms("body", &[b"quick".as_slice(), b"brown".as_slice()]).with_slop(1);
    let prepared = sloppy.prepare(&PrepareContext::new(&reader)).unwrap();
    let mut it = prepared.execute(segment).unwrap();
    let mut docs = Vec::new();
    while it.next() {
        docs.push(it.value());
    }
    assert_eq!(docs, vec![1, 3, 4]);
}
