//! Term dictionary: prefix-compressed term blocks with a per-field index.
//!
//! Terms of a field form a byte-ordered tree of blocks. A block holds up to
//! [`MAX_BLOCK_TERMS`] entries; entries are classified as a plain term, a
//! pointer to a sub-block of terms sharing a longer prefix, or a term that
//! is itself the prefix of a sub-block. The `tm` stream holds the blocks,
//! the `ti` stream the per-field table: statistics, min/max term, and the
//! root block pointer.

mod reader;
mod writer;

pub use reader::{FieldTerms, IntersectIterator, SeekResult, TermDict, TermIterator};
pub use writer::TermDictWriter;

use tessera_core::{Error, Result};
use tessera_directory::{IndexInput, IndexOutput};

use crate::postings::TermMeta;

/// Maximum number of terms grouped into one block.
pub const MAX_BLOCK_TERMS: usize = 36;

pub(crate) const TM_FORMAT: &str = "tessera_term_blocks";
pub(crate) const TI_FORMAT: &str = "tessera_term_index";
pub(crate) const FORMAT_VERSION: u32 = 0;

/// Entry classifier within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    LeafTerm = 0,
    SubBlock = 1,
    TermWithSubs = 2,
}

impl EntryKind {
    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EntryKind::LeafTerm),
            1 => Ok(EntryKind::SubBlock),
            2 => Ok(EntryKind::TermWithSubs),
            other => Err(Error::Index(format!("unknown term entry kind {other}"))),
        }
    }
}

/// A state-transition matcher intersected with the dictionary.
///
/// States are caller-defined integers; `None` transitions mark dead ends,
/// which prune whole sub-blocks during intersection.
pub trait Automaton {
    /// Initial state.
    fn start(&self) -> u32;

    /// Transition on one byte; `None` when no match can ever follow.
    fn accept(&self, state: u32, byte: u8) -> Option<u32>;

    /// True when `state` accepts the input consumed so far.
    fn is_match(&self, state: u32) -> bool;
}

pub(crate) fn write_term_meta(out: &mut dyn IndexOutput, meta: &TermMeta) -> Result<()> {
    out.write_vint(meta.docs_count)?;
    out.write_vlong(meta.total_freq)?;
    out.write_vlong(meta.doc_start)?;
    out.write_vlong(meta.skip_start)?;
    out.write_vlong(meta.pos_start)?;
    out.write_vlong(meta.pay_start)
}

pub(crate) fn read_term_meta(input: &mut dyn IndexInput) -> Result<TermMeta> {
    Ok(TermMeta {
        docs_count: input.read_vint()?,
        total_freq: input.read_vlong()?,
        doc_start: input.read_vlong()?,
        skip_start: input.read_vlong()?,
        pos_start: input.read_vlong()?,
        pay_start: input.read_vlong()?,
    })
}
