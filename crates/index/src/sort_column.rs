//! The primary-key sort column (`2pk` file).
//!
//! Sorted indices persist every document's sort key in document order.
//! Access is sequential; the merge writer streams the keys through its
//! min-heap and never needs point lookups.

use tessera_core::{DocId, Result};
use tessera_directory::{format_utils, IndexInput, IndexOutput};

const FORMAT: &str = "tessera_sort_column";
const FORMAT_VERSION: u32 = 0;

/// Write one key per document, in document order.
pub fn write_sort_column<'a>(
    out: &mut dyn IndexOutput,
    values: impl ExactSizeIterator<Item = &'a [u8]>,
) -> Result<()> {
    format_utils::write_header(out, FORMAT, FORMAT_VERSION)?;
    out.write_vint(values.len() as u32)?;
    for value in values {
        out.write_vbytes(value)?;
    }
    format_utils::write_footer(out)
}

/// Sequential reader over a segment's sort keys.
pub struct SortColumnReader {
    input: Box<dyn IndexInput>,
    docs_count: u32,
    at: u32,
    value: Vec<u8>,
}

impl SortColumnReader {
    pub fn open(mut input: Box<dyn IndexInput>) -> Result<Self> {
        format_utils::check_footer(&mut *input)?;
        input.seek(0)?;
        format_utils::check_header(&mut *input, FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        let docs_count = input.read_vint()?;
        Ok(Self {
            input,
            docs_count,
            at: 0,
            value: Vec::new(),
        })
    }

    pub fn docs_count(&self) -> u32 {
        self.docs_count
    }

    /// Advance to the next document's key; returns its id.
    pub fn next(&mut self) -> Result<Option<DocId>> {
        if self.at >= self.docs_count {
            return Ok(None);
        }
        self.at += 1;
        let len = self.input.read_vlong()? as usize;
        self.value.resize(len, 0);
        self.input.read_bytes(&mut self.value)?;
        Ok(Some(self.at))
    }

    /// Key of the current document.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_directory::{BufferOutput, SliceInput};

    #[test]
    fn test_roundtrip() {
        let values: Vec<Vec<u8>> = vec![b"bb".to_vec(), b"a".to_vec(), b"ccc".to_vec()];
        let mut out = BufferOutput::new();
        write_sort_column(&mut out, values.iter().map(|v| v.as_slice())).unwrap();
        let input = Box::new(SliceInput::new(Arc::new(out.into_bytes())));
        let mut reader = SortColumnReader::open(input).unwrap();
        assert_eq!(reader.docs_count(), 3);
        assert_eq!(reader.next().unwrap(), Some(1));
        assert_eq!(reader.value(), b"bb");
        assert_eq!(reader.next().unwrap(), Some(2));
        assert_eq!(reader.value(), b"a");
        assert_eq!(reader.next().unwrap(), Some(3));
        assert_eq!(reader.value(), b"ccc");
        assert_eq!(reader.next().unwrap(), None);
    }
}
