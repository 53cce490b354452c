//! Identifier spaces and index feature flags.

/// Document identifier, unique within a segment.
pub type DocId = u32;

/// Field identifier; column identifiers share the same space.
pub type FieldId = u64;

/// Sentinels and bounds for the [`DocId`] space.
///
/// Valid ids are contiguous starting at [`doc_limits::MIN`]. `INVALID` is
/// never assigned to a document; `EOF` is the terminal value reported by
/// exhausted iterators.
pub mod doc_limits {
    use super::DocId;

    /// Never a valid document.
    pub const INVALID: DocId = 0;

    /// First valid document id in a segment.
    pub const MIN: DocId = 1;

    /// Terminal iterator value.
    pub const EOF: DocId = DocId::MAX;

    /// True for ids that may refer to an actual document.
    #[inline]
    pub const fn valid(doc: DocId) -> bool {
        doc != INVALID && doc != EOF
    }

    #[inline]
    pub const fn eof(doc: DocId) -> bool {
        doc == EOF
    }
}

/// Sentinels for the [`FieldId`] space.
pub mod field_limits {
    use super::FieldId;

    pub const INVALID: FieldId = FieldId::MAX;

    #[inline]
    pub const fn valid(id: FieldId) -> bool {
        id != INVALID
    }
}

/// Per-field index features.
///
/// Features form an implication chain: positions require frequencies,
/// offsets and payloads require positions. [`IndexFeatures::check`] rejects
/// combinations that violate the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexFeatures(u8);

impl IndexFeatures {
    pub const NONE: Self = Self(0);
    pub const FREQ: Self = Self(1);
    pub const POS: Self = Self(1 << 1);
    pub const OFFS: Self = Self(1 << 2);
    pub const PAY: Self = Self(1 << 3);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits < (1 << 4) {
            Some(Self(bits))
        } else {
            None
        }
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn freq(self) -> bool {
        self.contains(Self::FREQ)
    }

    #[inline]
    pub const fn position(self) -> bool {
        self.contains(Self::POS)
    }

    #[inline]
    pub const fn offset(self) -> bool {
        self.contains(Self::OFFS)
    }

    #[inline]
    pub const fn payload(self) -> bool {
        self.contains(Self::PAY)
    }

    /// Validate the feature implication chain.
    pub fn check(self) -> crate::Result<Self> {
        let ok = (!self.position() || self.freq())
            && (!self.offset() || self.position())
            && (!self.payload() || self.position());
        if ok {
            Ok(self)
        } else {
            Err(crate::Error::IllegalArgument(format!(
                "inconsistent index features: {:#06b}",
                self.0
            )))
        }
    }
}

impl std::ops::BitOr for IndexFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_limits() {
        assert!(!doc_limits::valid(doc_limits::INVALID));
        assert!(!doc_limits::valid(doc_limits::EOF));
        assert!(doc_limits::valid(doc_limits::MIN));
        assert!(doc_limits::eof(doc_limits::EOF));
        assert_eq!(doc_limits::MIN, 1);
    }

    #[test]
    fn test_feature_implications() {
        assert!(IndexFeatures::NONE.check().is_ok());
        assert!(IndexFeatures::FREQ.check().is_ok());
        assert!((IndexFeatures::FREQ | IndexFeatures::POS).check().is_ok());
        // positions without frequencies
        assert!(IndexFeatures::POS.check().is_err());
        // offsets without positions
        assert!((IndexFeatures::FREQ | IndexFeatures::OFFS).check().is_err());
        // payloads without positions
        assert!(IndexFeatures::PAY.check().is_err());
        let full = IndexFeatures::FREQ | IndexFeatures::POS | IndexFeatures::OFFS | IndexFeatures::PAY;
        assert!(full.check().is_ok());
        assert!(full.freq() && full.position() && full.offset() && full.payload());
    }

    #[test]
    fn test_feature_bits_roundtrip() {
        let f = IndexFeatures::FREQ | IndexFeatures::POS;
        assert_eq!(IndexFeatures::from_bits(f.bits()), Some(f));
        assert_eq!(IndexFeatures::from_bits(0xF0), None);
    }
}
