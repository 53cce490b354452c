use std::sync::Arc;

use tessera_core::types::doc_limits;
use tessera_core::{DocIterator, IndexFeatures};
use tessera_directory::{BufferOutput, SliceInput};

use super::*;

fn docs_features() -> IndexFeatures {
    IndexFeatures::NONE
}

fn freq_features() -> IndexFeatures {
    IndexFeatures::FREQ
}

fn full_features() -> IndexFeatures {
    IndexFeatures::FREQ | IndexFeatures::POS | IndexFeatures::OFFS | IndexFeatures::PAY
}

struct Built {
    meta: TermMeta,
    doc: SliceInput,
    pos: Option<SliceInput>,
    pay: Option<SliceInput>,
}

/// Write a single term. `docs` carries `(doc, freq, positions)`.
fn build(features: IndexFeatures, docs: &[(u32, u32, Vec<u32>)]) -> Built {
    let mut writer = PostingsWriter::new(
        features,
        BufferOutput::new(),
        features.position().then(BufferOutput::new),
        (features.offset() || features.payload()).then(BufferOutput::new),
    )
    .unwrap();
    writer.begin_term(Some(docs.len() as u64)).unwrap();
    for (doc, freq, positions) in docs {
        writer.write_doc(*doc, *freq).unwrap();
        for &p in positions {
            let offsets = features.offset().then_some((p * 10, p * 10 + 4));
            let payload = vec![p as u8, (p >> 8) as u8];
            let payload_ref = features.payload().then_some(payload.as_slice());
            writer.write_position(p, offsets, payload_ref).unwrap();
        }
    }
    let meta = writer.end_term().unwrap();
    let (doc_out, pos_out, pay_out) = writer.into_outputs();

    let to_input = |out: BufferOutput| SliceInput::new(Arc::new(out.into_bytes()));
    Built {
        meta,
        doc: to_input(doc_out),
        pos: pos_out.map(to_input),
        pay: pay_out.map(to_input),
    }
}

fn simple_docs(n: u32, stride: u32) -> Vec<(u32, u32, Vec<u32>)> {
    (1..=n).map(|i| (i * stride, 1 + i % 3, vec![])).collect()
}

#[test]
fn test_docs_only_roundtrip() {
    let input: Vec<_> = simple_docs(200, 3);
    let built = build(docs_features(), &input);
    let mut it = PostingsIterator::open(
        built.meta,
        docs_features(),
        docs_features(),
        &built.doc,
        None,
        None,
    )
    .unwrap();
    let mut seen = Vec::new();
    while it.next() {
        seen.push(it.value());
    }
    let expected: Vec<u32> = input.iter().map(|d| d.0).collect();
    assert_eq!(seen, expected);
    assert_eq!(it.value(), doc_limits::EOF);
    assert!(!it.next());
}

#[test]
fn test_freqs_roundtrip() {
    let input = simple_docs(300, 2);
    let built = build(freq_features(), &input);
    let mut it = PostingsIterator::open(
        built.meta,
        freq_features(),
        freq_features(),
        &built.doc,
        None,
        None,
    )
    .unwrap();
    for (doc, freq, _) in &input {
        assert!(it.next());
        assert_eq!(it.value(), *doc);
        assert_eq!(it.freq(), *freq);
    }
    assert!(!it.next());
}

#[test]
fn test_seek_with_skip_list() {
    // enough docs for two skip levels
    let input = simple_docs(3000, 2);
    let built = build(freq_features(), &input);
    assert_ne!(built.meta.skip_start, 0);
    let mut it = PostingsIterator::open(
        built.meta,
        freq_features(),
        freq_features(),
        &built.doc,
        None,
        None,
    )
    .unwrap();

    assert_eq!(it.seek(2), 2);
    assert_eq!(it.freq(), 1 + 1 % 3);
    // seek far ahead, landing mid-block
    assert_eq!(it.seek(2501), 2502);
    assert_eq!(it.freq(), 1 + (2502 / 2) % 3);
    // seek to a present doc
    assert_eq!(it.seek(5000), 5000);
    // seek backward is a no-op
    assert_eq!(it.seek(100), 5000);
    // past the end
    assert_eq!(it.seek(6001), doc_limits::EOF);
    assert_eq!(it.seek(1), doc_limits::EOF);
}

#[test]
fn test_seek_matches_linear_scan() {
    let input = simple_docs(1000, 7);
    let built = build(freq_features(), &input);
    for target in [1u32, 7, 350, 3500, 3501, 6999, 7000, 7001] {
        let mut by_seek = PostingsIterator::open(
            built.meta,
            freq_features(),
            freq_features(),
            &built.doc,
            None,
            None,
        )
        .unwrap();
        let mut by_next = PostingsIterator::open(
            built.meta,
            freq_features(),
            freq_features(),
            &built.doc,
            None,
            None,
        )
        .unwrap();
        let sought = by_seek.seek(target);
        let mut linear = doc_limits::EOF;
        while by_next.next() {
            if by_next.value() >= target {
                linear = by_next.value();
                break;
            }
        }
        assert_eq!(sought, linear, "target {target}");
    }
}

#[test]
fn test_positions_with_offsets_and_payloads() {
    let input = vec![
        (1u32, 2u32, vec![1u32, 5]),
        (4, 1, vec![3]),
        (9, 3, vec![2, 4, 10]),
    ];
    let built = build(full_features(), &input);
    let mut it = PostingsIterator::open(
        built.meta,
        full_features(),
        full_features(),
        &built.doc,
        built.pos.as_ref(),
        built.pay.as_ref(),
    )
    .unwrap();

    for (doc, freq, positions) in &input {
        assert!(it.next());
        assert_eq!(it.value(), *doc);
        assert_eq!(it.freq(), *freq);
        let reader = it.positions().unwrap();
        for &p in positions {
            assert!(reader.next().unwrap());
            assert_eq!(reader.pos(), p);
            assert_eq!(reader.offsets(), Some((p * 10, p * 10 + 4)));
            assert_eq!(reader.payload(), Some(&[p as u8, (p >> 8) as u8][..]));
        }
        assert_eq!(reader.remaining(), 0);
    }
}

#[test]
fn test_lazy_positions_skip_documents() {
    let input = vec![
        (1u32, 2u32, vec![1u32, 5]),
        (4, 1, vec![3]),
        (9, 2, vec![2, 4]),
        (12, 1, vec![8]),
    ];
    let built = build(full_features(), &input);
    let mut it = PostingsIterator::open(
        built.meta,
        full_features(),
        full_features(),
        &built.doc,
        built.pos.as_ref(),
        built.pay.as_ref(),
    )
    .unwrap();

    // visit doc 1 without touching positions, then read doc 9's fully
    assert!(it.next());
    assert_eq!(it.seek(9), 9);
    let reader = it.positions().unwrap();
    assert!(reader.next().unwrap());
    assert_eq!(reader.pos(), 2);
    assert!(reader.next().unwrap());
    assert_eq!(reader.pos(), 4);

    // partial consumption, then advance
    assert!(it.next());
    assert_eq!(it.value(), 12);
    let reader = it.positions().unwrap();
    assert!(reader.next().unwrap());
    assert_eq!(reader.pos(), 8);
}

#[test]
fn test_positions_across_block_jump() {
    // multi-block postings with positions; seek across blocks and verify
    // the position stream stays aligned
    let input: Vec<_> = (1..=400u32).map(|i| (i, 1u32, vec![i % 50 + 1])).collect();
    let features = IndexFeatures::FREQ | IndexFeatures::POS;
    let built = build(features, &input);
    let mut it = PostingsIterator::open(
        built.meta,
        features,
        features,
        &built.doc,
        built.pos.as_ref(),
        None,
    )
    .unwrap();
    assert_eq!(it.seek(333), 333);
    let reader = it.positions().unwrap();
    assert!(reader.next().unwrap());
    assert_eq!(reader.pos(), 333 % 50 + 1);
}

#[test]
fn test_wanderator_matches_plain_iteration() {
    let input = simple_docs(1000, 3);
    let built = build(freq_features(), &input);
    let mut w = Wanderator::open(built.meta, freq_features(), freq_features(), &built.doc).unwrap();
    let mut it = PostingsIterator::open(
        built.meta,
        freq_features(),
        freq_features(),
        &built.doc,
        None,
        None,
    )
    .unwrap();
    loop {
        let a = it.next();
        let b = w.next();
        assert_eq!(a, b);
        if !a {
            break;
        }
        assert_eq!(it.value(), w.value());
        assert_eq!(it.freq(), w.freq());
    }
}

#[test]
fn test_wanderator_skips_non_competitive_blocks() {
    // freq pattern: doc multiple of 900 gets freq 7, everything else 1;
    // with threshold 7 the wanderator may only stop on competitive blocks
    // or the tail
    let input: Vec<_> = (1..=2000u32)
        .map(|i| (i, if i % 900 == 0 { 7 } else { 1 }, vec![]))
        .collect();
    let built = build(freq_features(), &input);
    let mut w = Wanderator::open(built.meta, freq_features(), freq_features(), &built.doc).unwrap();
    w.set_min_competitive_freq(7);

    let mut hits = Vec::new();
    let mut doc = w.seek(1);
    while !doc_limits::eof(doc) {
        if w.freq() >= 7 {
            hits.push(doc);
        }
        doc = w.seek(doc + 1);
    }
    // every competitive doc must have been surfaced
    assert!(hits.contains(&900));
    assert!(hits.contains(&1800));
}

#[test]
fn test_write_doc_rejects_out_of_order() {
    let mut writer =
        PostingsWriter::new(docs_features(), Box::new(BufferOutput::new()), None, None).unwrap();
    writer.begin_term(None).unwrap();
    writer.write_doc(5, 1).unwrap();
    assert!(writer.write_doc(5, 1).is_err());
    assert!(writer.write_doc(3, 1).is_err());
    assert!(writer.write_doc(doc_limits::INVALID, 1).is_err());
}

#[test]
fn test_exact_block_multiple() {
    // 256 docs: two packed blocks, empty tail
    let input = simple_docs(256, 1);
    let built = build(freq_features(), &input);
    let mut it = PostingsIterator::open(
        built.meta,
        freq_features(),
        freq_features(),
        &built.doc,
        None,
        None,
    )
    .unwrap();
    let mut count = 0;
    while it.next() {
        count += 1;
    }
    assert_eq!(count, 256);
}
