//! The segmented index lifecycle: segment reading and writing, merging,
//! and the transactional index writer.
//!
//! An index is a set of immutable segments referenced by a versioned
//! `index_meta`. Writers buffer documents into reusable segment contexts,
//! seal them on flush, and publish them through a two-phase commit. A
//! reference tracker plus an explicit cleaner reclaim files no committed
//! meta and no open reader points at.

pub mod cleaner;
pub mod index;
pub mod index_reader;
pub mod index_writer;
pub mod merge_writer;
pub mod meta;
pub mod reader_cache;
pub mod refs;
pub mod segment_reader;
pub mod segment_writer;
pub mod sort_column;
pub mod token;

pub use index::{Index, IndexOptions, SortSpec};
pub use index_reader::DirectoryReader;
pub use index_writer::{
    ConsolidateAll, ConsolidationPolicy, DocBatch, DocFilter, IndexWriter, WRITE_LOCK,
};
pub use merge_writer::{DocMap, MergeResult, MergeWriter};
pub use meta::{IndexMeta, SegmentMeta};
pub use segment_reader::{FieldReader, SegmentReader, SegmentReaderOptions};
pub use segment_writer::{Document, FieldOpts, SegmentWriter};
pub use token::{FailingTokenStream, Token, TokenStream, VecTokenStream};

/// File name suffixes emitted for a segment, in the order they are written.
pub mod extensions {
    pub const SEGMENT_META: &str = "sm";
    pub const COLUMNSTORE_DATA: &str = "cs";
    pub const COLUMNSTORE_INDEX: &str = "csi";
    pub const TERM_INDEX: &str = "ti";
    pub const TERM_META: &str = "tm";
    pub const DOCS: &str = "doc";
    pub const POSITIONS: &str = "pos";
    pub const PAYLOADS: &str = "pay";
    pub const FIELD_META: &str = "fm";
    pub const FIELD_FEATURES: &str = "f2";
    pub const SORT_COLUMN: &str = "2pk";
    pub const DOC_MASK: &str = "doc_mask";
}

/// `<segment>.<ext>` or, for versioned files, `<segment>.<version>.<ext>`.
pub(crate) fn segment_file(segment: &str, ext: &str) -> String {
    format!("{segment}.{ext}")
}

pub(crate) fn versioned_file(segment: &str, version: u64, ext: &str) -> String {
    format!("{segment}.{version}.{ext}")
}
