//! Positional phrase filter.
//!
//! A phrase is a sequence of slots, one per position. A slot is a single
//! term or a small term set expanded from a prefix/wildcard pattern at
//! execute time. Document-level matching is a conjunction over the slots'
//! unions; position-level matching materializes each slot's positions for
//! the candidate document and walks them in order.

use std::sync::Arc;

use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator, EmptyIterator, IndexFeatures, Result};
use tessera_formats::doc_mask::DocMask;
use tessera_formats::postings::PostingsIterator;
use tessera_index::SegmentReader;

use crate::automaton::{PrefixAutomaton, WildcardAutomaton};
use crate::filter::{Filter, PrepareContext, PreparedFilter};
use crate::score::{ScoreFunction, Scorer, TermStats};
use crate::term_query::collect_field_stats;

/// Upper bound of terms a non-exact slot expands to.
const SLOT_TERMS_LIMIT: usize = 64;

/// One position of a phrase.
#[derive(Debug, Clone)]
pub enum PhraseSlot {
    /// Exactly this term.
    Term(Vec<u8>),
    /// Any term with this prefix.
    Prefix(Vec<u8>),
    /// Any term matching this glob pattern.
    Wildcard(Vec<u8>),
    /// Any term of this set.
    Set(Vec<Vec<u8>>),
    /// Any term within the given edit distance.
    Fuzzy { term: Vec<u8>, max_edits: u32 },
}

/// Banded Levenshtein distance check: is `a` within `max` edits of `b`?
fn within_edit_distance(a: &[u8], b: &[u8], max: u32) -> bool {
    let max = max as usize;
    if a.len().abs_diff(b.len()) > max {
        return false;
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        row[0] = i + 1;
        let mut best = row[0];
        for (j, &cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1);
            best = best.min(row[j + 1]);
        }
        if best > max {
            return false;
        }
        std::mem::swap(&mut prev, &mut row);
    }
    prev[b.len()] <= max
}

/// Matches documents containing the slots at consecutive positions
/// (or within `slop` extra distance, preserving order).
pub struct PhraseFilter {
    pub field: String,
    pub slots: Vec<PhraseSlot>,
    pub slop: u32,
    pub boost: f32,
}

impl PhraseFilter {
    pub fn exact(field: impl Into<String>, slots: Vec<PhraseSlot>) -> Self {
        Self {
            field: field.into(),
            slots,
            slop: 0,
            boost: 1.0,
        }
    }

    pub fn with_slop(mut self, slop: u32) -> Self {
        self.slop = slop;
        self
    }

    /// Convenience: an exact phrase of plain terms.
    pub fn of_terms(field: impl Into<String>, terms: &[&[u8]]) -> Self {
        Self::exact(
            field,
            terms.iter().map(|t| PhraseSlot::Term(t.to_vec())).collect(),
        )
    }
}

impl Filter for PhraseFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        if self.slots.is_empty() {
            return Err(tessera_core::Error::IllegalArgument(
                "empty phrase".to_string(),
            ));
        }
        let field_stats = collect_field_stats(ctx, &self.field);
        // phrase statistics approximate with the rarest slot's first term
        let mut term_stats = TermStats::default();
        for segment in ctx.reader.segments() {
            if let Some(reader) = segment.field(&self.field) {
                for slot in &self.slots {
                    if let PhraseSlot::Term(term) = slot {
                        if let Some(meta) = reader.seek_exact(term)? {
                            term_stats.merge(&TermStats {
                                docs_count: u64::from(meta.docs_count),
                                total_freq: meta.total_freq,
                            });
                        }
                    }
                }
            }
        }
        let score_fn = ctx
            .scorer
            .as_ref()
            .map(|s| s.prepare(&field_stats, &term_stats, self.boost * ctx.boost));
        Ok(Box::new(PreparedPhrase {
            field: self.field.clone(),
            slots: self.slots.clone(),
            slop: self.slop,
            score_fn,
        }))
    }
}

struct PreparedPhrase {
    field: String,
    slots: Vec<PhraseSlot>,
    slop: u32,
    score_fn: Option<ScoreFunction>,
}

impl PreparedFilter for PreparedPhrase {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        let Some(field) = segment.field(&self.field) else {
            return Ok(Box::new(EmptyIterator::new()));
        };
        if !field.features().position() {
            return Err(tessera_core::Error::NotSupported(format!(
                "field '{}' does not index positions",
                self.field
            )));
        }
        let requested = IndexFeatures::FREQ | IndexFeatures::POS;
        let mut slot_iters = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let mut terms = Vec::new();
            match slot {
                PhraseSlot::Term(term) => {
                    if let Some(meta) = field.seek_exact(term)? {
                        terms.push(field.postings(meta, requested)?);
                    }
                }
                PhraseSlot::Set(set) => {
                    for term in set {
                        if let Some(meta) = field.seek_exact(term)? {
                            terms.push(field.postings(meta, requested)?);
                        }
                    }
                }
                PhraseSlot::Prefix(prefix) => {
                    let mut it = field.intersect(PrefixAutomaton::new(prefix.clone()))?;
                    while it.next()? && terms.len() < SLOT_TERMS_LIMIT {
                        if let Some(meta) = it.meta() {
                            terms.push(field.postings(meta, requested)?);
                        }
                    }
                }
                PhraseSlot::Wildcard(pattern) => {
                    let automaton = WildcardAutomaton::new(pattern).ok_or_else(|| {
                        tessera_core::Error::IllegalArgument(
                            "wildcard pattern too long".to_string(),
                        )
                    })?;
                    let mut it = field.intersect(automaton)?;
                    while it.next()? && terms.len() < SLOT_TERMS_LIMIT {
                        if let Some(meta) = it.meta() {
                            terms.push(field.postings(meta, requested)?);
                        }
                    }
                }
                PhraseSlot::Fuzzy { term, max_edits } => {
                    let mut it = field.iterator()?;
                    while it.next()? && terms.len() < SLOT_TERMS_LIMIT {
                        if within_edit_distance(it.term(), term, *max_edits) {
                            if let Some(meta) = it.meta() {
                                terms.push(field.postings(meta, requested)?);
                            }
                        }
                    }
                }
            }
            if terms.is_empty() {
                return Ok(Box::new(EmptyIterator::new()));
            }
            slot_iters.push(SlotIterator::new(terms));
        }
        Ok(Box::new(PhraseIterator {
            slots: slot_iters,
            slop: self.slop,
            mask: Arc::clone(segment.mask()),
            score_fn: self.score_fn.as_ref(),
            value: doc_limits::INVALID,
            phrase_freq: 0,
        }))
    }
}

/// Union of a slot's term postings with per-document position access.
struct SlotIterator {
    subs: Vec<PostingsIterator>,
    value: DocId,
}

impl SlotIterator {
    fn new(subs: Vec<PostingsIterator>) -> Self {
        Self {
            subs,
            value: doc_limits::INVALID,
        }
    }

    fn settle(&mut self) -> DocId {
        self.value = self
            .subs
            .iter()
            .map(|s| s.value())
            .min()
            .unwrap_or(doc_limits::EOF);
        self.value
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        for sub in &mut self.subs {
            if sub.value() < target {
                sub.seek(target);
            }
        }
        self.settle()
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        if self.value == doc_limits::INVALID {
            for sub in &mut self.subs {
                sub.next();
            }
        } else {
            let current = self.value;
            for sub in &mut self.subs {
                if sub.value() == current {
                    sub.next();
                }
            }
        }
        !doc_limits::eof(self.settle())
    }

    /// Sorted positions of every matching term at the current document.
    fn positions(&mut self) -> Result<Vec<u32>> {
        let current = self.value;
        let mut out = Vec::new();
        for sub in &mut self.subs {
            if sub.value() != current {
                continue;
            }
            let reader = sub.positions()?;
            while reader.remaining() > 0 {
                reader.next()?;
                out.push(reader.pos());
            }
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }
}

/// Doc-level conjunction of slots plus position verification.
struct PhraseIterator<'s> {
    slots: Vec<SlotIterator>,
    slop: u32,
    mask: Arc<DocMask>,
    score_fn: Option<&'s ScoreFunction>,
    value: DocId,
    phrase_freq: u32,
}

impl PhraseIterator<'_> {
    /// Count phrase occurrences in the current candidate document.
    fn phrase_matches(&mut self) -> Result<u32> {
        let mut per_slot = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            per_slot.push(slot.positions()?);
        }
        if self.slop == 0 {
            // exact: position p matches when slot i holds p + i
            let mut count = 0u32;
            for &p in &per_slot[0] {
                if per_slot
                    .iter()
                    .enumerate()
                    .skip(1)
                    .all(|(i, ps)| ps.binary_search(&(p + i as u32)).is_ok())
                {
                    count += 1;
                }
            }
            Ok(count)
        } else {
            // ordered with slop: strictly increasing positions whose spread
            // stays within slop extra distance
            let mut count = 0u32;
            for &start in &per_slot[0] {
                let mut prev = start;
                let mut ok = true;
                for ps in per_slot.iter().skip(1) {
                    match ps.iter().find(|&&p| p > prev) {
                        Some(&p) => prev = p,
                        None => {
                            ok = false;
                            break;
                        }
                    }
                }
                let span = prev - start;
                if ok && span <= self.slots.len() as u32 - 1 + self.slop {
                    count += 1;
                }
            }
            Ok(count)
        }
    }

    /// Align every slot on one document at or after `target`.
    fn converge(&mut self, target: DocId) -> DocId {
        let mut candidate = self.slots[0].seek(target);
        'outer: loop {
            if doc_limits::eof(candidate) {
                return doc_limits::EOF;
            }
            for i in 1..self.slots.len() {
                let at = self.slots[i].seek(candidate);
                if at != candidate {
                    if doc_limits::eof(at) {
                        return doc_limits::EOF;
                    }
                    candidate = self.slots[0].seek(at);
                    continue 'outer;
                }
            }
            return candidate;
        }
    }

    fn advance(&mut self, mut target: DocId) -> bool {
        loop {
            let candidate = self.converge(target);
            if doc_limits::eof(candidate) {
                self.value = doc_limits::EOF;
                return false;
            }
            if !self.mask.contains(&candidate) {
                match self.phrase_matches() {
                    Ok(n) if n > 0 => {
                        self.phrase_freq = n;
                        self.value = candidate;
                        return true;
                    }
                    _ => {}
                }
            }
            target = candidate + 1;
        }
    }
}

impl DocIterator for PhraseIterator<'_> {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        let target = if self.value == doc_limits::INVALID {
            doc_limits::MIN
        } else {
            self.value + 1
        };
        self.advance(target)
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        self.advance(target);
        self.value
    }

    fn cost(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.subs.iter().map(|p| p.cost()).sum::<u64>())
            .min()
            .unwrap_or(0)
    }

    fn score(&mut self) -> f32 {
        match self.score_fn {
            Some(f) => f.score(self.phrase_freq, None),
            None => 0.0,
        }
    }
}
