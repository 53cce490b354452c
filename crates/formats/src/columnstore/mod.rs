//! Two-layer columnstore: a sparse bitmap index over document ids plus
//! per-block value storage.
//!
//! Each column is sealed into one of four physical layouts:
//!
//! | Type | Chosen when | Storage |
//! |---|---|---|
//! | `Mask` | every value is empty | bitmap only |
//! | `DenseFixed` | fixed-length values, contiguous ids, consolidation | one contiguous region |
//! | `Fixed` | fixed-length values | one data offset per 65 K block |
//! | `Sparse` | anything else | per block `{addr, avg, bits, deltas, last_size}` |
//!
//! Value offsets in a sparse block are reconstructed as `avg * i` plus a
//! bit-packed zigzag delta; blocks with uniform lengths pack to nothing.

mod reader;
mod writer;

pub use reader::{Column, ColumnIterator, ColumnstoreReader, MemoryAccountant, ReaderOptions};
pub use writer::{ColumnOpts, ColumnWriter, ColumnstoreWriter};

use tessera_core::{Error, Result};

/// Values per column block.
pub const BLOCK_SIZE: u32 = 65_536;

pub(crate) const CS_FORMAT: &str = "tessera_columnstore_data";
pub(crate) const CSI_FORMAT: &str = "tessera_columnstore_index";
pub(crate) const FORMAT_VERSION: u32 = 0;

/// Physical column layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Mask = 0,
    Sparse = 1,
    Fixed = 2,
    DenseFixed = 3,
}

impl ColumnType {
    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ColumnType::Mask),
            1 => Ok(ColumnType::Sparse),
            2 => Ok(ColumnType::Fixed),
            3 => Ok(ColumnType::DenseFixed),
            other => Err(Error::Index(format!("invalid column type {other}"))),
        }
    }
}

/// Column property bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnProps(pub u8);

impl ColumnProps {
    pub const ENCRYPTED: u8 = 1;
    pub const NO_NAME: u8 = 1 << 1;
    pub const TRACK_PREV_DOC: u8 = 1 << 2;

    pub fn encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn no_name(self) -> bool {
        self.0 & Self::NO_NAME != 0
    }

    pub fn track_prev_doc(self) -> bool {
        self.0 & Self::TRACK_PREV_DOC != 0
    }
}

/// Iterator construction hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnHint(pub u8);

impl ColumnHint {
    pub const NORMAL: Self = Self(0);
    /// Existence checks only; payload decoding is bypassed.
    pub const MASK: Self = Self(1);
    /// The iterator maintains the immediately preceding document id.
    pub const PREV_DOC: Self = Self(1 << 1);
    /// Merge-time access; buffered sequential reads are preferred.
    pub const CONSOLIDATION: Self = Self(1 << 2);

    pub fn mask(self) -> bool {
        self.0 & Self::MASK.0 != 0
    }

    pub fn prev_doc(self) -> bool {
        self.0 & Self::PREV_DOC.0 != 0
    }

    pub fn consolidation(self) -> bool {
        self.0 & Self::CONSOLIDATION.0 != 0
    }
}

impl std::ops::BitOr for ColumnHint {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests;
