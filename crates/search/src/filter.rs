//! The filter contract: prepare once against the index, execute per
//! segment.

use std::sync::Arc;

use tessera_core::{DocIterator, Result};
use tessera_index::{DirectoryReader, DocFilter, SegmentReader};

use crate::score::Scorer;

/// Context handed to [`Filter::prepare`].
pub struct PrepareContext<'a> {
    pub reader: &'a DirectoryReader,
    pub scorer: Option<Arc<dyn Scorer>>,
    pub boost: f32,
}

impl<'a> PrepareContext<'a> {
    pub fn new(reader: &'a DirectoryReader) -> Self {
        Self {
            reader,
            scorer: None,
            boost: 1.0,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// A query node; prepare collects statistics and compiles score functions.
pub trait Filter: Send + Sync {
    fn prepare(&self, ctx: &PrepareContext<'_>) -> Result<Box<dyn PreparedFilter>>;
}

/// A prepared query, executable against any segment of the reader it was
/// prepared with.
pub trait PreparedFilter: Send + Sync {
    fn execute<'s>(&'s self, segment: &'s SegmentReader) -> Result<Box<dyn DocIterator + 's>>;
}

/// Adapter: any prepared filter doubles as a deletion predicate.
pub struct FilterDeleter {
    prepared: Box<dyn PreparedFilter>,
}

impl FilterDeleter {
    /// Prepare `filter` for deletion use; scores are irrelevant there.
    pub fn new(filter: &dyn Filter, reader: &DirectoryReader) -> Result<Self> {
        let ctx = PrepareContext::new(reader);
        Ok(Self {
            prepared: filter.prepare(&ctx)?,
        })
    }

    pub fn from_prepared(prepared: Box<dyn PreparedFilter>) -> Self {
        Self { prepared }
    }
}

impl DocFilter for FilterDeleter {
    fn matching<'a>(&'a self, reader: &'a SegmentReader) -> Result<Box<dyn DocIterator + 'a>> {
        self.prepared.execute(reader)
    }
}
