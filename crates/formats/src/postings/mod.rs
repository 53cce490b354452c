//! Posting lists: per-term document streams with optional frequencies,
//! positions, offsets, and payloads.
//!
//! # Stream layout (per term)
//!
//! The `doc` stream holds blocks of [`BLOCK_SIZE`] documents:
//!
//! ```text
//! ┌───────────────┬─────────────────┬────────────────┬───────────────┐
//! │ doc bits (1)  │ packed deltas   │ freq bits (1)  │ packed freqs  │
//! └───────────────┴─────────────────┴────────────────┴───────────────┘
//! ```
//!
//! followed by a variable-int tail for the last partial block, followed by
//! the serialized skip levels (terms above one block). The `pos` stream
//! carries per-document position deltas; the `pay` stream carries offsets
//! and payloads, interleaved per position.

mod reader;
mod writer;

pub use reader::{PositionReader, PostingsIterator, Wanderator};
pub use writer::PostingsWriter;

/// Documents per posting block.
pub const BLOCK_SIZE: u32 = 128;

/// Level-0 skip interval; one record per block.
pub const SKIP_0: u32 = BLOCK_SIZE;

/// Skip fan-out per level.
pub const SKIP_N: u32 = 8;

/// Dictionary-resident handle to one term's postings.
///
/// Cloning a `TermMeta` yields a reusable cookie that replays the term's
/// postings at any later point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TermMeta {
    /// Documents containing the term.
    pub docs_count: u32,
    /// Sum of term frequencies over those documents.
    pub total_freq: u64,
    /// Start of the term's blocks in the `doc` stream.
    pub doc_start: u64,
    /// Start of the serialized skip levels; zero when the term fits in one
    /// block.
    pub skip_start: u64,
    /// Start in the `pos` stream; meaningful only with positions.
    pub pos_start: u64,
    /// Start in the `pay` stream; meaningful only with offsets/payloads.
    pub pay_start: u64,
}

#[cfg(test)]
mod tests;
