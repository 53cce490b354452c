//! Index facade: configuration plus writer/reader construction.
//!
//! All configuration is explicit and threaded through the call chain;
//! there are no process-wide registries.

use std::cmp::Ordering;
use std::sync::Arc;

use tessera_core::Result;
use tessera_directory::{Cipher, Directory};
use tessera_formats::columnstore::MemoryAccountant;

use crate::cleaner;
use crate::index_reader::DirectoryReader;
use crate::index_writer::IndexWriter;
use crate::refs::RefTracker;
use crate::segment_reader::SegmentReaderOptions;

/// Ordering of documents in a sorted index.
pub struct SortSpec {
    /// Compares two sort-column payloads.
    pub comparator: Box<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>,
}

impl SortSpec {
    pub fn new(
        comparator: impl Fn(&[u8], &[u8]) -> Ordering + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            comparator: Box::new(comparator),
        })
    }

    /// Byte-wise ascending order.
    pub fn bytes() -> Arc<Self> {
        Self::new(|a, b| a.cmp(b))
    }
}

/// Index-wide configuration, fixed at open time.
#[derive(Clone)]
pub struct IndexOptions {
    pub cipher: Option<Arc<dyn Cipher>>,
    /// Columnstore buffering budget; `None` admits everything.
    pub accountant: Option<MemoryAccountant>,
    /// Document order; `None` keeps insertion order.
    pub sort: Option<Arc<SortSpec>>,
    /// A segment context is force-flushed at this many documents.
    pub segment_docs_max: u32,
    /// A segment context is force-flushed at this buffered byte size.
    pub segment_memory_max: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            cipher: None,
            accountant: None,
            sort: None,
            segment_docs_max: 1 << 16,
            segment_memory_max: 256 << 20,
        }
    }
}

impl IndexOptions {
    pub(crate) fn reader_options(&self) -> SegmentReaderOptions {
        SegmentReaderOptions {
            cipher: self.cipher.clone(),
            accountant: self.accountant.clone(),
        }
    }
}

/// Handle to one index in one directory.
///
/// Readers and writers constructed here share a file-reference tracker, so
/// [`Index::cleanup`] never removes a file an open reader still uses.
pub struct Index {
    dir: Arc<dyn Directory>,
    refs: Arc<RefTracker>,
    options: IndexOptions,
}

impl Index {
    pub fn open(dir: Arc<dyn Directory>, options: IndexOptions) -> Result<Self> {
        Ok(Self {
            dir,
            refs: RefTracker::new(),
            options,
        })
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.dir
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Construct the single writer; fails with `LockObtainFailed` when
    /// another writer holds the index.
    pub fn writer(&self) -> Result<IndexWriter> {
        IndexWriter::open(
            Arc::clone(&self.dir),
            Arc::clone(&self.refs),
            self.options.clone(),
        )
    }

    /// Open a point-in-time reader over the last committed state.
    pub fn reader(&self) -> Result<DirectoryReader> {
        DirectoryReader::open(
            Arc::clone(&self.dir),
            Arc::clone(&self.refs),
            &self.options,
        )
    }

    /// Delete every file no meta references and no reader holds.
    pub fn cleanup(&self) -> Result<Vec<String>> {
        cleaner::cleanup(&*self.dir, &self.refs)
    }
}
