//! Cache of segment readers keyed by `(name, version)`.
//!
//! Deletion evaluation and consolidation remap open the same segments
//! repeatedly; the cache reuses readers and drops every stale version of a
//! segment when a newer one is inserted or the segment disappears.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tessera_core::Result;
use tessera_directory::Directory;

use crate::meta::SegmentMeta;
use crate::segment_reader::{SegmentReader, SegmentReaderOptions};

#[derive(Default)]
pub struct ReaderCache {
    readers: Mutex<FxHashMap<(String, u64), Arc<SegmentReader>>>,
}

impl ReaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (or open) a reader for the exact `(name, version)` of `meta`.
    pub fn get(
        &self,
        dir: &Arc<dyn Directory>,
        meta: &SegmentMeta,
        opts: &SegmentReaderOptions,
    ) -> Result<Arc<SegmentReader>> {
        let key = (meta.name.clone(), meta.version);
        if let Some(reader) = self.readers.lock().get(&key) {
            return Ok(Arc::clone(reader));
        }
        let reader = Arc::new(SegmentReader::open(Arc::clone(dir), meta.clone(), opts)?);
        self.readers.lock().insert(key, Arc::clone(&reader));
        Ok(reader)
    }

    /// Drop cached readers whose segment is gone or superseded.
    ///
    /// `live` lists the `(name, version)` pairs that remain valid.
    pub fn purge(&self, live: &[(String, u64)]) {
        let mut readers = self.readers.lock();
        readers.retain(|key, _| live.iter().any(|l| l == key));
    }

    pub fn len(&self) -> usize {
        self.readers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
