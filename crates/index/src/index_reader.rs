//! Point-in-time reader over the last committed index state.

use std::sync::Arc;

use tessera_core::{Error, Result};
use tessera_directory::Directory;

use crate::index::IndexOptions;
use crate::meta::{IndexMeta, SegmentMeta};
use crate::refs::{FileRef, RefTracker};
use crate::segment_reader::SegmentReader;

/// A consistent view over every segment of one committed generation.
///
/// The reader pins its files in the shared reference tracker; cleanup
/// cannot remove them while the reader lives.
pub struct DirectoryReader {
    meta: IndexMeta,
    segments: Vec<Arc<SegmentReader>>,
    _refs: Vec<FileRef>,
}

impl DirectoryReader {
    pub fn open(
        dir: Arc<dyn Directory>,
        refs: Arc<RefTracker>,
        options: &IndexOptions,
    ) -> Result<Self> {
        let Some(meta) = IndexMeta::read_last_committed(&*dir)? else {
            return Ok(Self {
                meta: IndexMeta::default(),
                segments: Vec::new(),
                _refs: Vec::new(),
            });
        };

        let mut file_refs = vec![refs.retain(&IndexMeta::committed_file(meta.generation))];
        let mut segments = Vec::with_capacity(meta.segments.len());
        let reader_options = options.reader_options();
        for (name, version) in &meta.segments {
            let segment_meta = SegmentMeta::read(&*dir, name, *version)?;
            file_refs.push(refs.retain(&segment_meta.meta_file()));
            file_refs.extend(refs.retain_all(segment_meta.files.iter().map(String::as_str)));
            segments.push(Arc::new(SegmentReader::open(
                Arc::clone(&dir),
                segment_meta,
                &reader_options,
            )?));
        }
        Ok(Self {
            meta,
            segments,
            _refs: file_refs,
        })
    }

    /// Generation this reader observes; 0 before the first commit.
    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn payload(&self) -> &[u8] {
        &self.meta.payload
    }

    pub fn segments_count(&self) -> usize {
        self.segments.len()
    }

    /// Sub-reader `i`, in committed order.
    pub fn segment(&self, i: usize) -> Result<&Arc<SegmentReader>> {
        self.segments.get(i).ok_or_else(|| {
            Error::OutOfRange(format!(
                "segment {i} of a reader with {} segments",
                self.segments.len()
            ))
        })
    }

    pub fn segments(&self) -> &[Arc<SegmentReader>] {
        &self.segments
    }

    /// Total documents across segments, masked ones included.
    pub fn docs_count(&self) -> u64 {
        self.segments.iter().map(|s| u64::from(s.docs_count())).sum()
    }

    pub fn live_docs_count(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| u64::from(s.live_docs_count()))
            .sum()
    }
}
