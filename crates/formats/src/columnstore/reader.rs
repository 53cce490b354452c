//! Columnstore access.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_core::encoding::zigzag_decode;
use tessera_core::types::doc_limits;
use tessera_core::{bitpack, DocId, Error, Result};
use tessera_directory::{
    format_utils, Cipher, Directory, IndexInput, IoAdvice, OffsetInput, SliceInput,
};

use crate::sparse_bitmap::{SparseBitmap, SparseBitmapMeta, SparseBitmapVersion};

use super::{ColumnHint, ColumnProps, ColumnType, BLOCK_SIZE, CSI_FORMAT, CS_FORMAT, FORMAT_VERSION};

/// Callback deciding whether `bytes` more of buffering is acceptable.
pub type MemoryAccountant = Arc<dyn Fn(usize) -> bool + Send + Sync>;

/// Options for opening a columnstore.
#[derive(Default, Clone)]
pub struct ReaderOptions {
    pub cipher: Option<Arc<dyn Cipher>>,
    /// Consulted before any column is buffered in memory; denial downgrades
    /// to on-disk access.
    pub accountant: Option<MemoryAccountant>,
}

#[derive(Debug, Clone)]
struct SparseBlock {
    addr: u64,
    avg: u64,
    bits: u8,
    last_size: u64,
    packed: Vec<u8>,
}

enum Layout {
    Mask,
    DenseFixed { data_base: u64, len: u64 },
    Fixed { len: u64, addrs: Vec<u64> },
    Sparse { blocks: Vec<SparseBlock> },
}

/// One sealed column.
pub struct Column {
    id: u64,
    name: Option<String>,
    props: ColumnProps,
    column_type: ColumnType,
    min_doc: DocId,
    docs_count: u32,
    region_start: u64,
    region_len: u64,
    bitmap: Option<SparseBitmap>,
    layout: Layout,
    /// Region bytes buffered by warmup.
    warmed: Option<Arc<Vec<u8>>>,
}

impl Column {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn docs_count(&self) -> u32 {
        self.docs_count
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn props(&self) -> ColumnProps {
        self.props
    }
}

/// Reader over a segment's columns.
pub struct ColumnstoreReader {
    dir: Arc<dyn Directory>,
    data_name: String,
    columns: Vec<Column>,
    by_name: FxHashMap<String, usize>,
    by_id: FxHashMap<u64, usize>,
    cipher: Option<Arc<dyn Cipher>>,
    accountant: Option<MemoryAccountant>,
}

impl ColumnstoreReader {
    /// Open the `data_name`/`index_name` pair in `dir`.
    pub fn open(
        dir: Arc<dyn Directory>,
        data_name: &str,
        index_name: &str,
        opts: ReaderOptions,
    ) -> Result<Self> {
        let mut index_in = dir.open(index_name, IoAdvice::ReadOnce)?;
        format_utils::check_footer(&mut *index_in)?;
        index_in.seek(0)?;
        format_utils::check_header(&mut *index_in, CSI_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        let encrypted_store = index_in.read_byte()? != 0;
        if encrypted_store && opts.cipher.is_none() {
            return Err(Error::Index(
                "columnstore is encrypted but no cipher was provided".to_string(),
            ));
        }

        let mut data_in = dir.open(data_name, IoAdvice::Random)?;
        format_utils::check_header(&mut *data_in, CS_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        if (data_in.read_byte()? != 0) != encrypted_store {
            return Err(Error::Index(
                "columnstore data and index disagree on encryption".to_string(),
            ));
        }

        let count = index_in.read_vint()? as usize;
        let mut columns = Vec::with_capacity(count);
        let mut by_name = FxHashMap::default();
        let mut by_id = FxHashMap::default();
        for slot in 0..count {
            let column = read_column(
                &mut *index_in,
                &mut *data_in,
                opts.cipher.as_deref(),
            )?;
            if let Some(name) = &column.name {
                by_name.insert(name.clone(), slot);
            }
            by_id.insert(column.id, slot);
            columns.push(column);
        }
        Ok(Self {
            dir,
            data_name: data_name.to_string(),
            columns,
            by_name,
            by_id,
            cipher: opts.cipher,
            accountant: opts.accountant,
        })
    }

    pub fn columns_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, id: u64) -> Option<&Column> {
        self.by_id.get(&id).map(|&slot| &self.columns[slot])
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.by_name.get(name).map(|&slot| &self.columns[slot])
    }

    /// Copy the named columns' regions into memory.
    ///
    /// Buffering is submitted to the accountant; denial logs a warning and
    /// leaves the column on disk. Never fails for capacity reasons.
    pub fn warmup(&mut self, ids: &[u64]) -> Result<()> {
        for &id in ids {
            let Some(&slot) = self.by_id.get(&id) else {
                continue;
            };
            if self.columns[slot].warmed.is_some() {
                continue;
            }
            let len = self.columns[slot].region_len as usize;
            if let Some(accountant) = &self.accountant {
                if !accountant(len) {
                    tracing::warn!(
                        column = id,
                        bytes = len,
                        "column buffering denied; falling back to on-disk access"
                    );
                    continue;
                }
            }
            let mut input = self.dir.open(&self.data_name, IoAdvice::Sequential)?;
            input.seek(self.columns[slot].region_start)?;
            let mut buf = vec![0u8; len];
            input.read_bytes(&mut buf)?;
            self.columns[slot].warmed = Some(Arc::new(buf));
        }
        Ok(())
    }

    /// Build an iterator over `column` with the given access hint.
    pub fn iterator(&self, id: u64, hint: ColumnHint) -> Result<ColumnIterator<'_>> {
        let column = self
            .column(id)
            .ok_or_else(|| Error::OutOfRange(format!("no column {id}")))?;
        if column.props.encrypted() && self.cipher.is_none() {
            return Err(Error::Index(format!(
                "column {id} is encrypted but no cipher was provided"
            )));
        }
        if hint.prev_doc() && column.bitmap.is_some() && !column.props.track_prev_doc() {
            return Err(Error::NotSupported(format!(
                "column {id} was not written with previous-document tracking"
            )));
        }

        let input: Box<dyn IndexInput> = match &column.warmed {
            Some(buf) => Box::new(OffsetInput::new(Arc::clone(buf), column.region_start)),
            None => {
                let advice = if hint.consolidation() {
                    IoAdvice::Sequential
                } else {
                    IoAdvice::Random
                };
                self.dir.open(&self.data_name, advice)?
            }
        };
        let docs = match &column.bitmap {
            Some(bitmap) => {
                let bitmap_input: Box<dyn IndexInput> = match &column.warmed {
                    Some(buf) => {
                        Box::new(OffsetInput::new(Arc::clone(buf), column.region_start))
                    }
                    None => self.dir.open(&self.data_name, IoAdvice::Random)?,
                };
                DocCursor::Bitmap(bitmap.iterator(bitmap_input))
            }
            None => DocCursor::Range {
                min: column.min_doc,
                count: column.docs_count,
                ordinal: None,
                exhausted: column.docs_count == 0,
            },
        };
        Ok(ColumnIterator {
            column,
            docs,
            input,
            cipher: if column.props.encrypted() {
                self.cipher.clone()
            } else {
                None
            },
            hint,
            payload: Vec::new(),
            payload_valid: false,
        })
    }
}

fn read_column(
    index_in: &mut dyn IndexInput,
    data_in: &mut dyn IndexInput,
    cipher: Option<&dyn Cipher>,
) -> Result<Column> {
    let id = index_in.read_vlong()?;
    let column_type = ColumnType::from_u8(index_in.read_byte()?)?;
    let props = ColumnProps(index_in.read_byte()?);
    if props.encrypted() && cipher.is_none() {
        return Err(Error::Index(format!(
            "column {id} is encrypted but no cipher was provided"
        )));
    }
    let name = if props.no_name() {
        None
    } else {
        let len_pos = index_in.position();
        let mut bytes = index_in.read_vbytes()?;
        if let Some(cipher) = cipher {
            let offset = len_pos + tessera_core::encoding::vu64_len(bytes.len() as u64) as u64;
            cipher.decrypt(offset, &mut bytes)?;
        }
        Some(
            String::from_utf8(bytes)
                .map_err(|_| Error::Index(format!("column {id} name is not utf-8")))?,
        )
    };
    let compression = index_in.read_vstr()?;
    if compression != "none" {
        return Err(Error::Index(format!(
            "unknown compression codec '{compression}' for column {id}"
        )));
    }
    let min_doc = index_in.read_vlong()? as DocId;
    let docs_count = index_in.read_vlong()? as u32;
    if docs_count == 0 && column_type != ColumnType::Mask {
        return Err(Error::Index(format!(
            "column {id} has no documents but type {column_type:?}"
        )));
    }
    let region_start = index_in.read_vlong()?;
    let region_len = index_in.read_vlong()?;
    let bitmap = if index_in.read_byte()? != 0 {
        let blocks_offset = index_in.read_vlong()?;
        let index_offset = index_in.read_vlong()?;
        let version = if props.track_prev_doc() {
            SparseBitmapVersion::TrackPrev
        } else {
            SparseBitmapVersion::Plain
        };
        Some(SparseBitmap::open(
            data_in,
            SparseBitmapMeta {
                blocks_offset,
                index_offset,
                docs_count,
            },
            version,
        )?)
    } else {
        None
    };
    let layout = match column_type {
        ColumnType::Mask => Layout::Mask,
        ColumnType::DenseFixed => Layout::DenseFixed {
            data_base: index_in.read_vlong()?,
            len: index_in.read_vlong()?,
        },
        ColumnType::Fixed => {
            let len = index_in.read_vlong()?;
            let blocks = index_in.read_vint()? as usize;
            let mut addrs = Vec::with_capacity(blocks);
            for _ in 0..blocks {
                addrs.push(index_in.read_vlong()?);
            }
            Layout::Fixed { len, addrs }
        }
        ColumnType::Sparse => {
            let blocks = index_in.read_vint()? as usize;
            let mut out = Vec::with_capacity(blocks);
            for _ in 0..blocks {
                out.push(SparseBlock {
                    addr: index_in.read_vlong()?,
                    avg: index_in.read_vlong()?,
                    bits: index_in.read_byte()?,
                    last_size: index_in.read_vlong()?,
                    packed: index_in.read_vbytes()?,
                });
            }
            Layout::Sparse { blocks: out }
        }
    };
    Ok(Column {
        id,
        name,
        props,
        column_type,
        min_doc,
        docs_count,
        region_start,
        region_len,
        bitmap,
        layout,
        warmed: None,
    })
}

enum DocCursor<'a> {
    Bitmap(crate::sparse_bitmap::SparseBitmapIterator<'a>),
    /// Contiguous ids `min..min + count`.
    Range {
        min: DocId,
        count: u32,
        ordinal: Option<u32>,
        exhausted: bool,
    },
}

/// Iterator over one column's documents and payloads.
pub struct ColumnIterator<'a> {
    column: &'a Column,
    docs: DocCursor<'a>,
    input: Box<dyn IndexInput>,
    cipher: Option<Arc<dyn Cipher>>,
    hint: ColumnHint,
    payload: Vec<u8>,
    payload_valid: bool,
}

impl<'a> ColumnIterator<'a> {
    pub fn value(&self) -> DocId {
        match &self.docs {
            DocCursor::Bitmap(it) => it.value(),
            DocCursor::Range {
                min,
                ordinal,
                exhausted,
                ..
            } => {
                if *exhausted {
                    doc_limits::EOF
                } else {
                    match ordinal {
                        Some(o) => *min + *o,
                        None => doc_limits::INVALID,
                    }
                }
            }
        }
    }

    /// Rank of the current document within the column.
    fn ordinal(&self) -> u32 {
        match &self.docs {
            DocCursor::Bitmap(it) => it.index(),
            DocCursor::Range { ordinal, .. } => ordinal.unwrap_or(0),
        }
    }

    /// Id immediately preceding the current one; requires the
    /// [`ColumnHint::PREV_DOC`] hint on a track-prev column.
    pub fn prev_value(&self) -> DocId {
        match &self.docs {
            DocCursor::Bitmap(it) => it.prev_value(),
            DocCursor::Range { min, ordinal, .. } => match ordinal {
                Some(0) | None => doc_limits::INVALID,
                Some(o) => min + o - 1,
            },
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        self.payload_valid = false;
        match &mut self.docs {
            DocCursor::Bitmap(it) => it.next(),
            DocCursor::Range {
                count,
                ordinal,
                exhausted,
                ..
            } => {
                if *exhausted {
                    return Ok(false);
                }
                let next = ordinal.map_or(0, |o| o + 1);
                if next >= *count {
                    *exhausted = true;
                    Ok(false)
                } else {
                    *ordinal = Some(next);
                    Ok(true)
                }
            }
        }
    }

    /// Position at the first document `>= target`.
    pub fn seek(&mut self, target: DocId) -> Result<DocId> {
        self.payload_valid = false;
        match &mut self.docs {
            DocCursor::Bitmap(it) => it.seek(target),
            DocCursor::Range {
                min,
                count,
                ordinal,
                exhausted,
            } => {
                if *exhausted {
                    return Ok(doc_limits::EOF);
                }
                if let Some(o) = ordinal {
                    if target <= *min + *o {
                        return Ok(*min + *o);
                    }
                }
                let o = target.saturating_sub(*min);
                if o >= *count {
                    *exhausted = true;
                    return Ok(doc_limits::EOF);
                }
                *ordinal = Some(o);
                Ok(*min + o)
            }
        }
    }

    /// Payload of the current document.
    ///
    /// Under the [`ColumnHint::MASK`] hint payload decoding is bypassed and
    /// the empty slice is returned.
    pub fn payload(&mut self) -> Result<&[u8]> {
        if self.hint.mask() || matches!(self.column.layout, Layout::Mask) {
            return Ok(&[]);
        }
        let doc = self.value();
        if !doc_limits::valid(doc) {
            return Err(Error::IllegalState(format!(
                "payload requested at position {doc}"
            )));
        }
        if self.payload_valid {
            return Ok(&self.payload);
        }
        let ordinal = self.ordinal() as u64;
        let (start, end) = match &self.column.layout {
            Layout::Mask => unreachable!("handled above"),
            Layout::DenseFixed { data_base, len } => {
                let start = data_base + ordinal * len;
                (start, start + len)
            }
            Layout::Fixed { len, addrs } => {
                let block = (ordinal / u64::from(BLOCK_SIZE)) as usize;
                let within = ordinal % u64::from(BLOCK_SIZE);
                let addr = *addrs.get(block).ok_or_else(|| {
                    Error::Index(format!("fixed column block {block} out of range"))
                })?;
                let start = addr + within * len;
                (start, start + len)
            }
            Layout::Sparse { blocks } => {
                let block_idx = (ordinal / u64::from(BLOCK_SIZE)) as usize;
                let within = (ordinal % u64::from(BLOCK_SIZE)) as usize;
                let block = blocks.get(block_idx).ok_or_else(|| {
                    Error::Index(format!("sparse column block {block_idx} out of range"))
                })?;
                let count = (u64::from(self.column.docs_count)
                    - block_idx as u64 * u64::from(BLOCK_SIZE))
                .min(u64::from(BLOCK_SIZE)) as usize;
                let start = sparse_offset(block, within);
                let end = if within + 1 < count {
                    sparse_offset(block, within + 1)
                } else {
                    sparse_offset(block, count - 1) + block.last_size
                };
                (block.addr + start, block.addr + end)
            }
        };
        let len = (end - start) as usize;
        self.payload.resize(len, 0);
        self.input.seek(start)?;
        self.input.read_bytes(&mut self.payload)?;
        if let Some(cipher) = &self.cipher {
            cipher.decrypt(start, &mut self.payload)?;
        }
        self.payload_valid = true;
        Ok(&self.payload)
    }
}

fn sparse_offset(block: &SparseBlock, i: usize) -> u64 {
    let delta = zigzag_decode(bitpack::fastpack_at(&block.packed, i, block.bits));
    ((block.avg * i as u64) as i64 + delta) as u64
}
