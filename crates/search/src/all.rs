//! Degenerate drivers: match-all and column-existence.

use std::sync::Arc;

use tessera_core::{DocIterator, EmptyIterator, Result};
use tessera_formats::columnstore::ColumnHint;
use tessera_index::SegmentReader;

use crate::filter::{Filter, PrepareContext, PreparedFilter};
use crate::iter_utils::{AllIterator, ColumnDocsIterator};

/// Matches every live document; propagates only the boost as score.
pub struct AllFilter {
    pub boost: f32,
}

impl AllFilter {
    pub fn new() -> Self {
        Self { boost: 1.0 }
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

impl Default for AllFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for AllFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        Ok(Box::new(PreparedAll {
            score: self.boost * ctx.boost,
        }))
    }
}

struct PreparedAll {
    score: f32,
}

impl PreparedFilter for PreparedAll {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        Ok(Box::new(AllIterator::new(
            segment.docs_count(),
            Arc::clone(segment.mask()),
            self.score,
        )))
    }
}

/// Matches every live document holding a value in the named column.
pub struct ColumnExistenceFilter {
    pub column: String,
    pub boost: f32,
}

impl ColumnExistenceFilter {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            boost: 1.0,
        }
    }
}

impl Filter for ColumnExistenceFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        Ok(Box::new(PreparedColumnExistence {
            column: self.column.clone(),
            score: self.boost * ctx.boost,
        }))
    }
}

struct PreparedColumnExistence {
    column: String,
    score: f32,
}

impl PreparedFilter for PreparedColumnExistence {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        match segment.column_by_name(&self.column, ColumnHint::MASK)? {
            Some(it) => Ok(Box::new(ColumnDocsIterator::new(
                it,
                Arc::clone(segment.mask()),
                self.score,
            ))),
            None => Ok(Box::new(EmptyIterator::new())),
        }
    }
}
