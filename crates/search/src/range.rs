//! Multi-term drivers: range, prefix, and wildcard filters.
//!
//! Each driver enumerates the matching terms of a field, collects up to
//! `scored_terms_limit` exemplars for statistics, and executes as a
//! bit-union of every matching term's documents.

use std::ops::Bound;
use std::sync::Arc;

use tessera_core::bitset::DocBitSet;
use tessera_core::{DocIterator, EmptyIterator, IndexFeatures, Result};
use tessera_formats::postings::TermMeta;
use tessera_formats::term_dict::SeekResult;
use tessera_index::SegmentReader;

use crate::automaton::{PrefixAutomaton, WildcardAutomaton};
use crate::disjunction::Disjunction;
use crate::filter::{Filter, PrepareContext, PreparedFilter};
use crate::iter_utils::{BitSetIterator, ScoredPostings};
use crate::score::{FieldStats, ScoreFunction, Scorer, TermStats};
use crate::term_query::collect_field_stats;

/// Default number of exemplar terms whose statistics feed the score.
pub const DEFAULT_SCORED_TERMS_LIMIT: usize = 128;

/// Matches documents containing any term of `field` within the bounds.
pub struct RangeFilter {
    pub field: String,
    pub min: Bound<Vec<u8>>,
    pub max: Bound<Vec<u8>>,
    pub scored_terms_limit: usize,
    pub boost: f32,
}

impl RangeFilter {
    pub fn new(field: impl Into<String>, min: Bound<Vec<u8>>, max: Bound<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            min,
            max,
            scored_terms_limit: DEFAULT_SCORED_TERMS_LIMIT,
            boost: 1.0,
        }
    }

}

/// Shared multi-term execution state.
struct PreparedMultiTerm {
    field: String,
    collect: CollectTerms,
    scorer: Option<Arc<dyn Scorer>>,
    field_stats: FieldStats,
    term_stats: TermStats,
    scored_terms_limit: usize,
    boost: f32,
}

/// How a prepared multi-term filter enumerates terms per segment.
enum CollectTerms {
    Range {
        min: Bound<Vec<u8>>,
        max: Bound<Vec<u8>>,
    },
    Prefix(Vec<u8>),
    Wildcard(Vec<u8>),
}

impl CollectTerms {
    fn cookies(&self, segment: &SegmentReader, field: &str) -> Result<Vec<TermMeta>> {
        let Some(reader) = segment.field(field) else {
            return Ok(Vec::new());
        };
        let mut cookies = Vec::new();
        match self {
            CollectTerms::Range { min, max } => {
                let mut terms = reader.iterator()?;
                let positioned = match min {
                    Bound::Unbounded => terms.next()?,
                    Bound::Included(b) => terms.seek_ge(b)? != SeekResult::End,
                    Bound::Excluded(b) => match terms.seek_ge(b)? {
                        SeekResult::End => false,
                        SeekResult::Found => terms.next()?,
                        SeekResult::NotFound => true,
                    },
                };
                if !positioned {
                    return Ok(Vec::new());
                }
                loop {
                    let above = match max {
                        Bound::Unbounded => false,
                        Bound::Included(b) => terms.term() > b.as_slice(),
                        Bound::Excluded(b) => terms.term() >= b.as_slice(),
                    };
                    if above {
                        break;
                    }
                    if let Some(meta) = terms.meta() {
                        cookies.push(meta);
                    }
                    if !terms.next()? {
                        break;
                    }
                }
            }
            CollectTerms::Prefix(prefix) => {
                let mut it = reader.intersect(PrefixAutomaton::new(prefix.clone()))?;
                while it.next()? {
                    if let Some(meta) = it.meta() {
                        cookies.push(meta);
                    }
                }
            }
            CollectTerms::Wildcard(pattern) => {
                let automaton = WildcardAutomaton::new(pattern).ok_or_else(|| {
                    tessera_core::Error::IllegalArgument(
                        "wildcard pattern too long".to_string(),
                    )
                })?;
                let mut it = reader.intersect(automaton)?;
                while it.next()? {
                    if let Some(meta) = it.meta() {
                        cookies.push(meta);
                    }
                }
            }
        }
        Ok(cookies)
    }
}

impl PreparedMultiTerm {
    fn prepare(
        ctx: &PrepareContext<'_>,
        field: String,
        collect: CollectTerms,
        scored_terms_limit: usize,
        boost: f32,
    ) -> Result<Box<dyn PreparedFilter>> {
        let field_stats = collect_field_stats(ctx, &field);
        let mut term_stats = TermStats::default();
        let mut collected = 0usize;
        'outer: for segment in ctx.reader.segments() {
            for cookie in collect.cookies(segment, &field)? {
                if collected >= scored_terms_limit {
                    break 'outer;
                }
                collected += 1;
                term_stats.merge(&TermStats {
                    docs_count: u64::from(cookie.docs_count),
                    total_freq: cookie.total_freq,
                });
            }
        }
        Ok(Box::new(PreparedMultiTerm {
            field,
            collect,
            scorer: ctx.scorer.clone(),
            field_stats,
            term_stats,
            scored_terms_limit,
            boost: boost * ctx.boost,
        }))
    }

    fn score_function(&self) -> Option<ScoreFunction> {
        self.scorer
            .as_ref()
            .map(|s| s.prepare(&self.field_stats, &self.term_stats, self.boost))
    }
}

impl PreparedFilter for PreparedMultiTerm {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        let cookies = self.collect.cookies(segment, &self.field)?;
        if cookies.is_empty() {
            return Ok(Box::new(EmptyIterator::new()));
        }
        let field = segment
            .field(&self.field)
            .expect("cookies imply the field exists");

        let Some(scorer) = &self.scorer else {
            // unscored: one multi-term bit union
            let mut set = DocBitSet::with_max_doc(segment.docs_count());
            field.bit_union(&cookies, &mut set)?;
            return Ok(Box::new(BitSetIterator::new(
                set,
                Arc::clone(segment.mask()),
                0.0,
            )));
        };

        // scored: exemplar terms become scored legs of a disjunction; the
        // tail beyond the limit contributes matches with the aggregate
        // score only
        let limit = self.scored_terms_limit.max(1);
        let mut legs: Vec<Box<dyn DocIterator + 's>> = Vec::new();
        let requested = if field.features().freq() {
            IndexFeatures::FREQ
        } else {
            IndexFeatures::NONE
        };
        for cookie in cookies.iter().take(limit) {
            let term_stats = TermStats {
                docs_count: u64::from(cookie.docs_count),
                total_freq: cookie.total_freq,
            };
            let score_fn = scorer.prepare(&self.field_stats, &term_stats, self.boost);
            let norms = if scorer.needs_norms() {
                segment.norms(&self.field)?
            } else {
                None
            };
            legs.push(Box::new(ScoredPostings::new(
                field.postings(*cookie, requested)?,
                Arc::clone(segment.mask()),
                Some(score_fn),
                norms,
            )));
        }
        if cookies.len() > limit {
            tracing::debug!(
                field = %self.field,
                terms = cookies.len(),
                scored = limit,
                "multi-term query exceeds the scored-terms limit; tail terms match unscored"
            );
            let mut set = DocBitSet::with_max_doc(segment.docs_count());
            field.bit_union(&cookies[limit..], &mut set)?;
            let score = self
                .score_function()
                .map(|f| f.score(1, None))
                .unwrap_or(0.0);
            legs.push(Box::new(BitSetIterator::new(
                set,
                Arc::clone(segment.mask()),
                score,
            )));
        }
        Ok(Box::new(Disjunction::new(legs)))
    }
}

impl Filter for RangeFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        PreparedMultiTerm::prepare(
            ctx,
            self.field.clone(),
            CollectTerms::Range {
                min: self.min.clone(),
                max: self.max.clone(),
            },
            self.scored_terms_limit,
            self.boost,
        )
    }
}

/// Matches documents containing any term with the given prefix.
pub struct PrefixFilter {
    pub field: String,
    pub prefix: Vec<u8>,
    pub scored_terms_limit: usize,
    pub boost: f32,
}

impl PrefixFilter {
    pub fn new(field: impl Into<String>, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            prefix: prefix.into(),
            scored_terms_limit: DEFAULT_SCORED_TERMS_LIMIT,
            boost: 1.0,
        }
    }
}

impl Filter for PrefixFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        PreparedMultiTerm::prepare(
            ctx,
            self.field.clone(),
            CollectTerms::Prefix(self.prefix.clone()),
            self.scored_terms_limit,
            self.boost,
        )
    }
}

/// Matches documents containing any term accepted by a glob pattern.
pub struct WildcardFilter {
    pub field: String,
    pub pattern: Vec<u8>,
    pub scored_terms_limit: usize,
    pub boost: f32,
}

impl WildcardFilter {
    pub fn new(field: impl Into<String>, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            field: field.into(),
            pattern: pattern.into(),
            scored_terms_limit: DEFAULT_SCORED_TERMS_LIMIT,
            boost: 1.0,
        }
    }
}

impl Filter for WildcardFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        PreparedMultiTerm::prepare(
            ctx,
            self.field.clone(),
            CollectTerms::Wildcard(self.pattern.clone()),
            self.scored_terms_limit,
            self.boost,
        )
    }
}
