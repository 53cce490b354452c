//! Columnstore serialization.

use std::sync::Arc;

use tessera_core::encoding::{vu64_len, zigzag_encode};
use tessera_core::types::doc_limits;
use tessera_core::{bitpack, DocId, Error, Result};
use tessera_directory::{format_utils, Cipher, IndexOutput};

use crate::sparse_bitmap::SparseBitmapWriter;

use super::{ColumnProps, ColumnType, BLOCK_SIZE, CSI_FORMAT, CS_FORMAT, FORMAT_VERSION};

/// Per-column configuration.
#[derive(Debug, Clone, Default)]
pub struct ColumnOpts {
    /// Column name; anonymous columns set none and are addressed by id.
    pub name: Option<String>,
    /// Ask readers to maintain the preceding document id.
    pub track_prev_doc: bool,
}

/// Accumulates one column's documents and values.
pub struct ColumnWriter {
    id: u64,
    opts: ColumnOpts,
    docs: SparseBitmapWriter,
    data: Vec<u8>,
    /// Start of each value within `data`.
    offsets: Vec<u64>,
    /// Set between `prepare` and the next `prepare`/seal.
    pending: bool,
}

impl ColumnWriter {
    fn new(id: u64, opts: ColumnOpts) -> Self {
        Self {
            id,
            opts,
            docs: SparseBitmapWriter::new(),
            data: Vec::new(),
            offsets: Vec::new(),
            pending: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Begin the value for `key`; keys must be strictly ascending.
    pub fn prepare(&mut self, key: DocId) -> Result<()> {
        if !doc_limits::valid(key) {
            return Err(Error::IllegalArgument(format!("invalid column key {key}")));
        }
        if let Some(&last) = self.docs.docs().last() {
            if key <= last {
                return Err(Error::IllegalArgument(format!(
                    "column key {key} out of order (last {last})"
                )));
            }
        }
        self.docs.push(key);
        self.offsets.push(self.data.len() as u64);
        self.pending = true;
        Ok(())
    }

    /// Append payload bytes for the prepared document.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.pending {
            return Err(Error::IllegalState("no value prepared".to_string()));
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Roll back the pending value; a following `prepare` reuses the slot.
    pub fn reset(&mut self) {
        if self.pending {
            self.pending = false;
            let start = self.offsets.pop().unwrap_or(0);
            self.data.truncate(start as usize);
            self.docs.pop();
        }
    }

    pub fn docs_count(&self) -> u32 {
        self.docs.len() as u32
    }

    fn value_len(&self, i: usize) -> u64 {
        let end = self
            .offsets
            .get(i + 1)
            .copied()
            .unwrap_or(self.data.len() as u64);
        end - self.offsets[i]
    }

    fn fixed_len(&self) -> Option<u64> {
        if self.offsets.is_empty() {
            return None;
        }
        let len = self.value_len(0);
        (1..self.offsets.len())
            .all(|i| self.value_len(i) == len)
            .then_some(len)
    }

    fn contiguous(&self) -> bool {
        let docs = self.docs.docs();
        docs.windows(2).all(|w| w[1] == w[0] + 1)
    }
}

/// Builds every column of a segment and seals them in one pass.
pub struct ColumnstoreWriter {
    columns: Vec<ColumnWriter>,
    cipher: Option<Arc<dyn Cipher>>,
    consolidation: bool,
}

impl ColumnstoreWriter {
    /// `consolidation` marks merge-time writing, enabling the dense-fixed
    /// layout for contiguous columns.
    pub fn new(consolidation: bool, cipher: Option<Arc<dyn Cipher>>) -> Self {
        Self {
            columns: Vec::new(),
            cipher,
            consolidation,
        }
    }

    /// Register a column; the returned id is its ordinal.
    pub fn push_column(&mut self, opts: ColumnOpts) -> u64 {
        let id = self.columns.len() as u64;
        self.columns.push(ColumnWriter::new(id, opts));
        id
    }

    pub fn column_mut(&mut self, id: u64) -> Result<&mut ColumnWriter> {
        self.columns
            .get_mut(id as usize)
            .ok_or_else(|| Error::OutOfRange(format!("no column {id}")))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns_count(&self) -> usize {
        self.columns.len()
    }

    /// Approximate heap footprint of buffered values.
    pub fn memory_used(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.data.len() + c.offsets.len() * 8 + c.docs.len() * 4)
            .sum()
    }

    /// Renumber every column's documents through `map` and reorder values
    /// accordingly. Used when a sorted index permutes documents at flush.
    pub fn remap(&mut self, map: &dyn Fn(DocId) -> DocId) {
        for column in &mut self.columns {
            column.pending = false;
            let mut entries: Vec<(DocId, u64, u64)> = column
                .docs
                .docs()
                .iter()
                .enumerate()
                .map(|(i, &doc)| (map(doc), column.offsets[i], column.value_len(i)))
                .collect();
            entries.sort_unstable_by_key(|&(doc, _, _)| doc);

            let mut docs = SparseBitmapWriter::new();
            let mut data = Vec::with_capacity(column.data.len());
            let mut offsets = Vec::with_capacity(entries.len());
            for (doc, start, len) in entries {
                docs.push(doc);
                offsets.push(data.len() as u64);
                data.extend_from_slice(&column.data[start as usize..(start + len) as usize]);
            }
            column.docs = docs;
            column.data = data;
            column.offsets = offsets;
        }
    }

    /// Seal every column. `segment_docs` is the total document count of
    /// the segment; a column covering every document skips its bitmap.
    pub fn finish<O: IndexOutput>(
        mut self,
        data_out: &mut O,
        index_out: &mut O,
        segment_docs: u32,
    ) -> Result<()> {
        format_utils::write_header(data_out, CS_FORMAT, FORMAT_VERSION)?;
        data_out.write_byte(u8::from(self.cipher.is_some()))?;
        format_utils::write_header(index_out, CSI_FORMAT, FORMAT_VERSION)?;
        index_out.write_byte(u8::from(self.cipher.is_some()))?;
        index_out.write_vint(self.columns.len() as u32)?;

        for column in &mut self.columns {
            column.pending = false;
            write_column(
                column,
                data_out,
                index_out,
                segment_docs,
                self.consolidation,
                self.cipher.as_deref(),
            )?;
        }
        format_utils::write_footer(data_out)?;
        format_utils::write_footer(index_out)?;
        Ok(())
    }
}

fn choose_type(column: &ColumnWriter, consolidation: bool) -> (ColumnType, u64) {
    if column.offsets.is_empty() {
        return (ColumnType::Mask, 0);
    }
    match column.fixed_len() {
        Some(0) => (ColumnType::Mask, 0),
        Some(len) => {
            if consolidation && column.contiguous() {
                (ColumnType::DenseFixed, len)
            } else {
                (ColumnType::Fixed, len)
            }
        }
        None => (ColumnType::Sparse, 0),
    }
}

fn write_column<O: IndexOutput>(
    column: &ColumnWriter,
    data_out: &mut O,
    index_out: &mut O,
    segment_docs: u32,
    consolidation: bool,
    cipher: Option<&dyn Cipher>,
) -> Result<()> {
    let (column_type, fixed_len) = choose_type(column, consolidation);
    let docs_count = column.docs_count();
    let region_start = data_out.position();

    // value regions
    let mut block_addrs = Vec::new();
    let mut sparse_blocks = Vec::new();
    match column_type {
        ColumnType::Mask => {}
        ColumnType::DenseFixed | ColumnType::Fixed => {
            let block_values = BLOCK_SIZE as usize;
            for (block_start, chunk) in column
                .offsets
                .chunks(block_values)
                .enumerate()
                .map(|(b, c)| (b * block_values, c))
            {
                block_addrs.push(data_out.position());
                write_values(column, data_out, block_start, chunk.len(), cipher)?;
            }
        }
        ColumnType::Sparse => {
            let block_values = BLOCK_SIZE as usize;
            let mut scratch = Vec::new();
            let mut packed = Vec::new();
            for (block_start, chunk_len) in (0..column.offsets.len())
                .step_by(block_values)
                .map(|s| (s, block_values.min(column.offsets.len() - s)))
            {
                let addr = data_out.position();
                write_values(column, data_out, block_start, chunk_len, cipher)?;

                // offsets relative to the block's first value
                let base = column.offsets[block_start];
                scratch.clear();
                for j in 0..chunk_len {
                    scratch.push(column.offsets[block_start + j] - base);
                }
                let avg = if chunk_len > 1 {
                    scratch[chunk_len - 1] / (chunk_len as u64 - 1)
                } else {
                    0
                };
                let mut max_delta = 0u64;
                let deltas: Vec<u64> = scratch
                    .iter()
                    .enumerate()
                    .map(|(j, &o)| {
                        let d = zigzag_encode(o as i64 - (avg * j as u64) as i64);
                        max_delta = max_delta.max(d);
                        d
                    })
                    .collect();
                let bits = if deltas.iter().all(|&d| d == 0) {
                    bitpack::ALL_EQUAL
                } else {
                    bitpack::bits_required(max_delta)
                };
                packed.clear();
                bitpack::pack(&deltas, bits, &mut packed);
                let last_size = column.value_len(block_start + chunk_len - 1);
                sparse_blocks.push((addr, avg, bits, last_size, std::mem::take(&mut packed)));
            }
        }
    }

    // bitmap: only when the column covers a strict subset of the segment
    // and the layout does not imply the id range
    let needs_bitmap = docs_count > 0
        && docs_count < segment_docs
        && column_type != ColumnType::DenseFixed;
    let bitmap = if needs_bitmap {
        Some(column.docs.finish(data_out)?)
    } else {
        None
    };
    let region_len = data_out.position() - region_start;

    // index record
    let mut props = ColumnProps::default().0;
    if cipher.is_some() {
        props |= ColumnProps::ENCRYPTED;
    }
    if column.opts.name.is_none() {
        props |= ColumnProps::NO_NAME;
    }
    if column.opts.track_prev_doc {
        props |= ColumnProps::TRACK_PREV_DOC;
    }
    index_out.write_vlong(column.id)?;
    index_out.write_byte(column_type as u8)?;
    index_out.write_byte(props)?;
    if let Some(name) = &column.opts.name {
        let mut bytes = name.as_bytes().to_vec();
        if let Some(cipher) = cipher {
            let offset = index_out.position() + vu64_len(bytes.len() as u64) as u64;
            cipher.encrypt(offset, &mut bytes)?;
        }
        index_out.write_vbytes(&bytes)?;
    }
    index_out.write_vstr("none")?; // compression codec
    let min_doc = column.docs.docs().first().copied().unwrap_or(0);
    index_out.write_vlong(u64::from(min_doc))?;
    index_out.write_vlong(u64::from(docs_count))?;
    index_out.write_vlong(region_start)?;
    index_out.write_vlong(region_len)?;
    match &bitmap {
        Some(meta) => {
            index_out.write_byte(1)?;
            index_out.write_vlong(meta.blocks_offset)?;
            index_out.write_vlong(meta.index_offset)?;
        }
        None => index_out.write_byte(0)?,
    }
    match column_type {
        ColumnType::Mask => {}
        ColumnType::DenseFixed => {
            index_out.write_vlong(block_addrs[0])?;
            index_out.write_vlong(fixed_len)?;
        }
        ColumnType::Fixed => {
            index_out.write_vlong(fixed_len)?;
            index_out.write_vint(block_addrs.len() as u32)?;
            for addr in &block_addrs {
                index_out.write_vlong(*addr)?;
            }
        }
        ColumnType::Sparse => {
            index_out.write_vint(sparse_blocks.len() as u32)?;
            for (addr, avg, bits, last_size, packed) in &sparse_blocks {
                index_out.write_vlong(*addr)?;
                index_out.write_vlong(*avg)?;
                index_out.write_byte(*bits)?;
                index_out.write_vlong(*last_size)?;
                index_out.write_vbytes(packed)?;
            }
        }
    }
    Ok(())
}

/// Write `count` values beginning at ordinal `from`, encrypting each value
/// keyed by its absolute output offset.
fn write_values<O: IndexOutput>(
    column: &ColumnWriter,
    data_out: &mut O,
    from: usize,
    count: usize,
    cipher: Option<&dyn Cipher>,
) -> Result<()> {
    let start = column.offsets[from] as usize;
    let end = column.offsets[from + count - 1] as usize + column.value_len(from + count - 1) as usize;
    match cipher {
        None => data_out.write_bytes(&column.data[start..end]),
        Some(cipher) => {
            let mut buf = column.data[start..end].to_vec();
            let mut value_offset = data_out.position();
            let mut cursor = 0usize;
            for j in from..from + count {
                let len = column.value_len(j) as usize;
                cipher.encrypt(value_offset, &mut buf[cursor..cursor + len])?;
                value_offset += len as u64;
                cursor += len;
            }
            data_out.write_bytes(&buf)
        }
    }
}
