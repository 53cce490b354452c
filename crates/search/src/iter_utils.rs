//! Leaf iterator adapters: mask filtering, bitset iteration, scored
//! postings.

use std::sync::Arc;

use tessera_core::bitset::DocBitSet;
use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator};
use tessera_formats::columnstore::ColumnIterator;
use tessera_formats::doc_mask::DocMask;
use tessera_formats::postings::PostingsIterator;

use crate::score::ScoreFunction;

/// Postings filtered by the segment mask, with optional scoring.
pub struct ScoredPostings<'s> {
    it: PostingsIterator,
    mask: Arc<DocMask>,
    score_fn: Option<ScoreFunction>,
    norms: Option<ColumnIterator<'s>>,
}

impl<'s> ScoredPostings<'s> {
    pub fn new(
        it: PostingsIterator,
        mask: Arc<DocMask>,
        score_fn: Option<ScoreFunction>,
        norms: Option<ColumnIterator<'s>>,
    ) -> Self {
        Self {
            it,
            mask,
            score_fn,
            norms,
        }
    }

    fn skip_masked_forward(&mut self) -> bool {
        loop {
            let doc = self.it.value();
            if doc_limits::eof(doc) {
                return false;
            }
            if !self.mask.contains(&doc) {
                return true;
            }
            if !self.it.next() {
                return false;
            }
        }
    }

    fn norm(&mut self) -> Option<f32> {
        let doc = self.it.value();
        let norms = self.norms.as_mut()?;
        match norms.seek(doc) {
            Ok(at) if at == doc => {
                let payload = norms.payload().ok()?;
                let bytes: [u8; 4] = payload.try_into().ok()?;
                Some(f32::from_le_bytes(bytes))
            }
            _ => None,
        }
    }
}

impl DocIterator for ScoredPostings<'_> {
    fn value(&self) -> DocId {
        self.it.value()
    }

    fn next(&mut self) -> bool {
        if !self.it.next() {
            return false;
        }
        self.skip_masked_forward()
    }

    fn seek(&mut self, target: DocId) -> DocId {
        self.it.seek(target);
        self.skip_masked_forward();
        self.it.value()
    }

    fn cost(&self) -> u64 {
        self.it.cost()
    }

    fn score(&mut self) -> f32 {
        if self.score_fn.is_none() {
            return 0.0;
        }
        let freq = self.it.freq();
        let norm = self.norm();
        self.score_fn.as_ref().expect("present").score(freq, norm)
    }
}

/// Iterator over an owned bitset, mask-filtered, with a constant score.
pub struct BitSetIterator {
    docs: Vec<DocId>,
    at: Option<usize>,
    exhausted: bool,
    score: f32,
}

impl BitSetIterator {
    pub fn new(set: DocBitSet, mask: Arc<DocMask>, score: f32) -> Self {
        let docs: Vec<DocId> = set.iter().filter(|d| !mask.contains(d)).collect();
        Self {
            docs,
            at: None,
            exhausted: false,
            score,
        }
    }
}

impl DocIterator for BitSetIterator {
    fn value(&self) -> DocId {
        if self.exhausted {
            doc_limits::EOF
        } else {
            match self.at {
                Some(i) => self.docs[i],
                None => doc_limits::INVALID,
            }
        }
    }

    fn next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        let next = self.at.map_or(0, |i| i + 1);
        if next >= self.docs.len() {
            self.exhausted = true;
            false
        } else {
            self.at = Some(next);
            true
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if self.exhausted {
            return doc_limits::EOF;
        }
        if let Some(i) = self.at {
            if target <= self.docs[i] {
                return self.docs[i];
            }
        }
        let from = self.at.map_or(0, |i| i + 1);
        let pos = from + self.docs[from..].partition_point(|&d| d < target);
        if pos >= self.docs.len() {
            self.exhausted = true;
            doc_limits::EOF
        } else {
            self.at = Some(pos);
            self.docs[pos]
        }
    }

    fn cost(&self) -> u64 {
        self.docs.len() as u64
    }

    fn score(&mut self) -> f32 {
        self.score
    }
}

/// Every live document of a segment, with a constant score.
pub struct AllIterator {
    docs_count: u32,
    mask: Arc<DocMask>,
    value: DocId,
    score: f32,
}

impl AllIterator {
    pub fn new(docs_count: u32, mask: Arc<DocMask>, score: f32) -> Self {
        Self {
            docs_count,
            mask,
            value: doc_limits::INVALID,
            score,
        }
    }

    fn advance_from(&mut self, mut doc: DocId) -> bool {
        while doc <= self.docs_count {
            if !self.mask.contains(&doc) {
                self.value = doc;
                return true;
            }
            doc += 1;
        }
        self.value = doc_limits::EOF;
        false
    }
}

impl DocIterator for AllIterator {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        let from = if self.value == doc_limits::INVALID {
            doc_limits::MIN
        } else {
            self.value + 1
        };
        self.advance_from(from)
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        self.advance_from(target.max(doc_limits::MIN));
        self.value
    }

    fn cost(&self) -> u64 {
        u64::from(self.docs_count)
    }

    fn score(&mut self) -> f32 {
        self.score
    }
}

/// Column-existence iterator: documents holding a value in one column.
pub struct ColumnDocsIterator<'s> {
    it: ColumnIterator<'s>,
    mask: Arc<DocMask>,
    exhausted: bool,
    score: f32,
}

impl<'s> ColumnDocsIterator<'s> {
    pub fn new(it: ColumnIterator<'s>, mask: Arc<DocMask>, score: f32) -> Self {
        Self {
            it,
            mask,
            exhausted: false,
            score,
        }
    }

    fn settle(&mut self) -> bool {
        loop {
            let doc = self.it.value();
            if doc_limits::eof(doc) {
                self.exhausted = true;
                return false;
            }
            if !self.mask.contains(&doc) {
                return true;
            }
            match self.it.next() {
                Ok(true) => {}
                _ => {
                    self.exhausted = true;
                    return false;
                }
            }
        }
    }
}

impl DocIterator for ColumnDocsIterator<'_> {
    fn value(&self) -> DocId {
        if self.exhausted {
            doc_limits::EOF
        } else {
            self.it.value()
        }
    }

    fn next(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        match self.it.next() {
            Ok(true) => self.settle(),
            _ => {
                self.exhausted = true;
                false
            }
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if self.exhausted {
            return doc_limits::EOF;
        }
        match self.it.seek(target) {
            Ok(_) => {
                self.settle();
                self.value()
            }
            Err(_) => {
                self.exhausted = true;
                doc_limits::EOF
            }
        }
    }

    fn score(&mut self) -> f32 {
        self.score
    }
}
