//! Document masks: the set of logically deleted ids in a segment.
//!
//! Masked ids stay on disk; readers filter them out. Every change writes a
//! new mask file under the segment's next version.

use std::collections::BTreeSet;

use tessera_core::{DocId, Error, Result};
use tessera_directory::{format_utils, IndexInput, IndexOutput};

const FORMAT: &str = "tessera_doc_mask";
const FORMAT_VERSION: u32 = 0;

/// Deleted ids of one segment, ordered for serialization.
pub type DocMask = BTreeSet<DocId>;

/// Serialize `mask` as ascending deltas.
pub fn write_doc_mask(out: &mut dyn IndexOutput, mask: &DocMask) -> Result<()> {
    format_utils::write_header(out, FORMAT, FORMAT_VERSION)?;
    out.write_vint(mask.len() as u32)?;
    let mut last = 0u32;
    for &doc in mask {
        out.write_vint(doc - last)?;
        last = doc;
    }
    format_utils::write_footer(out)
}

/// Read a mask, recomputing the checksum before trusting it.
pub fn read_doc_mask(input: &mut dyn IndexInput) -> Result<DocMask> {
    format_utils::check_footer(&mut *input.dup()?)?;
    input.seek(0)?;
    format_utils::check_header(input, FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
    let count = input.read_vint()?;
    let mut mask = DocMask::new();
    let mut last = 0u32;
    for _ in 0..count {
        last += input.read_vint()?;
        if !mask.insert(last) {
            return Err(Error::Index(format!("duplicate masked doc {last}")));
        }
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_directory::{BufferOutput, SliceInput};

    #[test]
    fn test_roundtrip() {
        let mask: DocMask = [5u32, 9, 1, 100_000].into_iter().collect();
        let mut out = BufferOutput::new();
        write_doc_mask(&mut out, &mask).unwrap();
        let mut input = SliceInput::new(Arc::new(out.into_bytes()));
        assert_eq!(read_doc_mask(&mut input).unwrap(), mask);
    }

    #[test]
    fn test_empty_mask() {
        let mut out = BufferOutput::new();
        write_doc_mask(&mut out, &DocMask::new()).unwrap();
        let mut input = SliceInput::new(Arc::new(out.into_bytes()));
        assert!(read_doc_mask(&mut input).unwrap().is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let mask: DocMask = (1u32..50).collect();
        let mut out = BufferOutput::new();
        write_doc_mask(&mut out, &mask).unwrap();
        let mut bytes = out.into_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        let mut input = SliceInput::new(Arc::new(bytes));
        assert!(read_doc_mask(&mut input).is_err());
    }
}
