//! Core types shared by every tessera crate.
//!
//! This crate carries no I/O: it defines document/field identifier spaces,
//! the unified error taxonomy, and the low-level integer codecs (variable
//! ints, zigzag, 64-value bit-packing) that the on-disk formats are built
//! from.

pub mod bitpack;
pub mod bitset;
pub mod encoding;
pub mod error;
pub mod iterator;
pub mod types;

pub use error::{Error, Result};
pub use iterator::{DocIterator, EmptyIterator};
pub use types::{doc_limits, field_limits, DocId, FieldId, IndexFeatures};
