//! Boolean composition of filters.

use tessera_core::{DocIterator, EmptyIterator, Result};
use tessera_index::SegmentReader;

use crate::conjunction::Conjunction;
use crate::disjunction::Disjunction;
use crate::filter::{Filter, PrepareContext, PreparedFilter};
use crate::min_match::{MinMatchIterator, MinMatchMode};

/// Intersection of sub-filters.
pub struct AndFilter {
    pub subs: Vec<Box<dyn Filter>>,
}

impl AndFilter {
    pub fn new(subs: Vec<Box<dyn Filter>>) -> Self {
        Self { subs }
    }
}

impl Filter for AndFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        let subs = self
            .subs
            .iter()
            .map(|f| f.prepare(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(PreparedAnd { subs }))
    }
}

struct PreparedAnd {
    subs: Vec<Box<dyn PreparedFilter>>,
}

impl PreparedFilter for PreparedAnd {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        if self.subs.is_empty() {
            return Ok(Box::new(EmptyIterator::new()));
        }
        let legs = self
            .subs
            .iter()
            .map(|f| f.execute(segment))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(Conjunction::new(legs)))
    }
}

/// Union of sub-filters, optionally requiring `min_match` of them.
pub struct OrFilter {
    pub subs: Vec<Box<dyn Filter>>,
    pub min_match: u32,
    pub mode: MinMatchMode,
}

impl OrFilter {
    pub fn new(subs: Vec<Box<dyn Filter>>) -> Self {
        Self {
            subs,
            min_match: 1,
            mode: MinMatchMode::Exact,
        }
    }

    pub fn with_min_match(mut self, min_match: u32, mode: MinMatchMode) -> Self {
        self.min_match = min_match.max(1);
        self.mode = mode;
        self
    }
}

impl Filter for OrFilter {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>> {
        let subs = self
            .subs
            .iter()
            .map(|f| f.prepare(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(PreparedOr {
            subs,
            min_match: self.min_match,
            mode: self.mode,
        }))
    }
}

struct PreparedOr {
    subs: Vec<Box<dyn PreparedFilter>>,
    min_match: u32,
    mode: MinMatchMode,
}

impl PreparedFilter for PreparedOr {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>> {
        if self.subs.is_empty() {
            return Ok(Box::new(EmptyIterator::new()));
        }
        let legs = self
            .subs
            .iter()
            .map(|f| f.execute(segment))
            .collect::<Result<Vec<_>>>()?;
        if self.min_match > 1 {
            Ok(Box::new(MinMatchIterator::new(
                legs,
                self.min_match,
                self.mode,
            )))
        } else {
            Ok(Box::new(Disjunction::new(legs)))
        }
    }
}
