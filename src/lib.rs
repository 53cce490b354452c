//! Tessera: an embeddable full-text search and analytics engine built
//! around immutable, append-only segments grouped into a versioned index.
//!
//! The crates compose bottom-up:
//!
//! - [`core`]: identifier spaces, errors, integer codecs;
//! - [`directory`]: named byte-stream I/O, header/footer protocol,
//!   encryption seam;
//! - [`formats`]: sparse bitmaps, skip lists, postings, the term
//!   dictionary, and the columnstore;
//! - [`index`]: segment readers/writers, merging, and the transactional
//!   index writer;
//! - [`search`]: scorers and the query-iterator compositions.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tessera::directory::MemoryDirectory;
//! use tessera::index::{FieldOpts, Index, IndexOptions, VecTokenStream};
//!
//! fn main() -> tessera::Result<()> {
//!     let index = Index::open(Arc::new(MemoryDirectory::new()), IndexOptions::default())?;
//!     let writer = index.writer()?;
//!     let mut batch = writer.documents();
//!     batch.insert(|doc| {
//!         let mut body = VecTokenStream::from_text("hello segmented world");
//!         doc.index("body", FieldOpts::text(), &mut body)?;
//!         doc.store("raw", b"payload")
//!     })?;
//!     drop(batch);
//!     writer.commit()?;
//!     Ok(())
//! }
//! ```

pub use tessera_core as core;
pub use tessera_directory as directory;
pub use tessera_formats as formats;
pub use tessera_index as index;
pub use tessera_search as search;

pub use tessera_core::{DocId, DocIterator, Error, Result};
