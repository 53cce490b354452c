//! Single-term filter.

use std::sync::Arc;

use tessera_core::{DocIterator, EmptyIterator, IndexFeatures, Result};
use tessera_index::SegmentReader;

use crate::filter::{Filter, PrepareContext, PreparedFilter};
use crate::iter_utils::ScoredPostings;
use crate::score::{FieldStats, ScoreFunction, Scorer, TermStats};

/// Matches documents containing `term` in `field`.
pub struct TermFilter {
    pub field: String,
    pub term: Vec<u8>,
    pub boost: f32,
}

impl TermFilter {
    pub fn new(field: impl Into<String>, term: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            term: term.into(),
            boost: 1.0,
        }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// Collect index-wide field statistics for `field`.
pub(crate) fn collect_field_stats(
    ctx: &PrepareContext<'_>,
    field: &str,
) -> FieldStats {
    let mut stats = FieldStats::default();
    for segment in ctx.reader.segments() {
        stats.total_docs += u64::from(segment.live_docs_count());
        if let Some(reader) = segment.field(field) {
            let terms = reader.terms();
            stats.docs_with_field += u64::from(terms.docs_count);
            stats.sum_doc_freq += terms.sum_doc_freq;
            stats.sum_total_freq += terms.sum_total_freq;
        }
    }
    stats
}

impl Filter for TermFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        let field_stats = collect_field_stats(ctx, &self.field);
        let mut term_stats = TermStats::default();
        for segment in ctx.reader.segments() {
            if let Some(reader) = segment.field(&self.field) {
                if let Some(meta) = reader.seek_exact(&self.term)? {
                    term_stats.merge(&TermStats {
                        docs_count: u64::from(meta.docs_count),
                        total_freq: meta.total_freq,
                    });
                }
            }
        }
        Ok(Box::new(PreparedTerm {
            field: self.field.clone(),
            term: self.term.clone(),
            scorer: ctx.scorer.clone(),
            field_stats,
            term_stats,
            boost: self.boost * ctx.boost,
        }))
    }
}

struct PreparedTerm {
    field: String,
    term: Vec<u8>,
    scorer: Option<Arc<dyn Scorer>>,
    field_stats: FieldStats,
    term_stats: TermStats,
    boost: f32,
}

impl PreparedTerm {
    fn score_function(&self) -> Option<ScoreFunction> {
        self.scorer
            .as_ref()
            .map(|s| s.prepare(&self.field_stats, &self.term_stats, self.boost))
    }
}

impl PreparedFilter for PreparedTerm {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        let Some(field) = segment.field(&self.field) else {
            return Ok(Box::new(EmptyIterator::new()));
        };
        let Some(cookie) = field.seek_exact(&self.term)? else {
            return Ok(Box::new(EmptyIterator::new()));
        };
        let requested = if self.scorer.is_some() && field.features().freq() {
            IndexFeatures::FREQ
        } else {
            IndexFeatures::NONE
        };
        let postings = field.postings(cookie, requested)?;
        let norms = match &self.scorer {
            Some(scorer) if scorer.needs_norms() => segment.norms(&self.field)?,
            _ => None,
        };
        Ok(Box::new(ScoredPostings::new(
            postings,
            Arc::clone(segment.mask()),
            self.score_function(),
            norms,
        )))
    }
}
