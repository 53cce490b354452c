//! On-disk formats: sparse bitmaps, skip lists, postings, the term
//! dictionary, the columnstore, field metadata, and document masks.
//!
//! Everything here encodes to and decodes from the stream traits in
//! `tessera-directory`; no format talks to the file system directly.

pub mod columnstore;
pub mod doc_mask;
pub mod field_meta;
pub mod postings;
pub mod skip_list;
pub mod sparse_bitmap;
pub mod term_dict;

pub use field_meta::{FeatureKind, FieldMeta};
pub use postings::TermMeta;
