//! Block-structured document-id set.
//!
//! Ids are chunked into 64 K blocks keyed by the high 16 bits. Each
//! non-empty block is stored in one of three layouts chosen by
//! cardinality:
//!
//! - all-set (65 536 ids): no payload, the range is implied;
//! - dense (more than [`DENSE_THRESHOLD`] ids): an 8 KiB bitmap;
//! - sparse: a sorted list of 16-bit in-block offsets.
//!
//! A trailing block table maps block number to `{cardinality, rank base,
//! payload offset}` and gives the iterator O(log n) seeks. The iterator
//! additionally tracks the rank (`index`) of the current id; the
//! [`TrackPrev`](SparseBitmapVersion::TrackPrev) version also maintains the
//! immediately preceding id.

use tessera_core::types::doc_limits;
use tessera_core::{DocId, Error, Result};
use tessera_directory::{IndexInput, IndexOutput};

/// Ids per block.
pub const BLOCK_DOCS: u32 = 65_536;

/// Blocks above this cardinality switch from the sparse to the dense layout.
pub const DENSE_THRESHOLD: u32 = 4096;

const DENSE_WORDS: usize = (BLOCK_DOCS as usize) / 64;

/// Bitmap feature versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SparseBitmapVersion {
    #[default]
    Plain,
    /// The iterator maintains the id immediately preceding the current one.
    TrackPrev,
}

/// Offsets produced by [`SparseBitmapWriter::finish`].
#[derive(Debug, Clone, Copy)]
pub struct SparseBitmapMeta {
    /// Absolute offset of the first block payload.
    pub blocks_offset: u64,
    /// Absolute offset of the block table.
    pub index_offset: u64,
    /// Total number of ids.
    pub docs_count: u32,
}

/// Accumulates an ascending id set and serializes it.
#[derive(Default)]
pub struct SparseBitmapWriter {
    docs: Vec<DocId>,
}

impl SparseBitmapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an id; ids must be strictly ascending and valid.
    pub fn push(&mut self, doc: DocId) {
        debug_assert!(doc_limits::valid(doc));
        debug_assert!(self.docs.last().map_or(true, |&last| doc > last));
        self.docs.push(doc);
    }

    /// Roll back the most recent `push`.
    pub fn pop(&mut self) -> Option<DocId> {
        self.docs.pop()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[DocId] {
        &self.docs
    }

    /// Serialize blocks followed by the block table.
    pub fn finish(&self, out: &mut dyn IndexOutput) -> Result<SparseBitmapMeta> {
        let blocks_offset = out.position();
        let mut table: Vec<(u32, u32, u32, u64)> = Vec::new(); // block, cardinality, rank base, offset

        let mut i = 0usize;
        while i < self.docs.len() {
            let block = self.docs[i] >> 16;
            let mut end = i;
            while end < self.docs.len() && (self.docs[end] >> 16) == block {
                end += 1;
            }
            let cardinality = (end - i) as u32;
            table.push((block, cardinality, i as u32, out.position()));

            if cardinality == BLOCK_DOCS {
                // all-set: implied range
            } else if cardinality > DENSE_THRESHOLD {
                let mut words = [0u64; DENSE_WORDS];
                for &doc in &self.docs[i..end] {
                    let bit = (doc & 0xFFFF) as usize;
                    words[bit / 64] |= 1u64 << (bit % 64);
                }
                for word in words {
                    out.write_u64(word)?;
                }
            } else {
                for &doc in &self.docs[i..end] {
                    out.write_u16((doc & 0xFFFF) as u16)?;
                }
            }
            i = end;
        }

        let index_offset = out.position();
        out.write_vint(table.len() as u32)?;
        for (block, cardinality, rank_base, offset) in &table {
            out.write_vint(*block)?;
            out.write_vint(*cardinality)?;
            out.write_vint(*rank_base)?;
            out.write_vlong(offset - blocks_offset)?;
        }

        Ok(SparseBitmapMeta {
            blocks_offset,
            index_offset,
            docs_count: self.docs.len() as u32,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct BlockEntry {
    block: u32,
    cardinality: u32,
    rank_base: u32,
    /// Absolute payload offset.
    offset: u64,
}

impl BlockEntry {
    #[inline]
    fn base_doc(&self) -> DocId {
        self.block << 16
    }

    #[inline]
    fn layout(&self) -> BlockLayout {
        if self.cardinality == BLOCK_DOCS {
            BlockLayout::AllSet
        } else if self.cardinality > DENSE_THRESHOLD {
            BlockLayout::Dense
        } else {
            BlockLayout::Sparse
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockLayout {
    AllSet,
    Dense,
    Sparse,
}

/// Decoded block table shared by iterators over one bitmap.
pub struct SparseBitmap {
    entries: Vec<BlockEntry>,
    docs_count: u32,
    version: SparseBitmapVersion,
}

impl SparseBitmap {
    /// Read the block table; `input` may be positioned anywhere.
    pub fn open(
        input: &mut dyn IndexInput,
        meta: SparseBitmapMeta,
        version: SparseBitmapVersion,
    ) -> Result<Self> {
        input.seek(meta.index_offset)?;
        let count = input.read_vint()? as usize;
        let mut entries = Vec::with_capacity(count);
        let mut total = 0u64;
        for _ in 0..count {
            let block = input.read_vint()?;
            let cardinality = input.read_vint()?;
            if cardinality == 0 || cardinality > BLOCK_DOCS {
                return Err(Error::Index(format!(
                    "invalid bitmap block cardinality {cardinality}"
                )));
            }
            let rank_base = input.read_vint()?;
            let offset = meta.blocks_offset + input.read_vlong()?;
            total += u64::from(cardinality);
            entries.push(BlockEntry {
                block,
                cardinality,
                rank_base,
                offset,
            });
        }
        if total != u64::from(meta.docs_count) {
            return Err(Error::Index(format!(
                "bitmap cardinality {total} disagrees with docs_count {}",
                meta.docs_count
            )));
        }
        Ok(Self {
            entries,
            docs_count: meta.docs_count,
            version,
        })
    }

    pub fn docs_count(&self) -> u32 {
        self.docs_count
    }

    /// Build an iterator reading payloads through `input`.
    pub fn iterator(&self, input: Box<dyn IndexInput>) -> SparseBitmapIterator<'_> {
        SparseBitmapIterator {
            bitmap: self,
            input,
            block_idx: usize::MAX,
            words: Vec::new(),
            offsets: Vec::new(),
            in_block_pos: 0,
            value: doc_limits::INVALID,
            index: 0,
            prev: doc_limits::INVALID,
        }
    }
}

/// Iterator over a [`SparseBitmap`].
pub struct SparseBitmapIterator<'a> {
    bitmap: &'a SparseBitmap,
    input: Box<dyn IndexInput>,
    /// Index into the block table; `usize::MAX` before the first block.
    block_idx: usize,
    /// Dense payload of the current block.
    words: Vec<u64>,
    /// Sparse payload of the current block.
    offsets: Vec<u16>,
    /// Position within the current block: bit number (dense/all-set) or
    /// list index (sparse) of the current id.
    in_block_pos: u32,
    value: DocId,
    index: u32,
    prev: DocId,
}

impl<'a> SparseBitmapIterator<'a> {
    /// Current id; `INVALID` before iteration, `EOF` after exhaustion.
    pub fn value(&self) -> DocId {
        self.value
    }

    /// Rank of the current id: ids strictly before it in the set.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Id immediately preceding the current one; `INVALID` when none.
    ///
    /// Maintained only for [`SparseBitmapVersion::TrackPrev`].
    pub fn prev_value(&self) -> DocId {
        debug_assert_eq!(self.bitmap.version, SparseBitmapVersion::TrackPrev);
        self.prev
    }

    fn load_block(&mut self, idx: usize) -> Result<()> {
        self.block_idx = idx;
        let entry = self.bitmap.entries[idx];
        match entry.layout() {
            BlockLayout::AllSet => {}
            BlockLayout::Dense => {
                self.input.seek(entry.offset)?;
                self.words.clear();
                self.words.reserve(DENSE_WORDS);
                for _ in 0..DENSE_WORDS {
                    self.words.push(self.input.read_u64()?);
                }
            }
            BlockLayout::Sparse => {
                self.input.seek(entry.offset)?;
                self.offsets.clear();
                self.offsets.reserve(entry.cardinality as usize);
                for _ in 0..entry.cardinality {
                    self.offsets.push(self.input.read_u16()?);
                }
            }
        }
        Ok(())
    }

    /// Last id of block `idx` (decodes the payload if necessary).
    fn block_last(&mut self, idx: usize) -> Result<DocId> {
        let entry = self.bitmap.entries[idx];
        match entry.layout() {
            BlockLayout::AllSet => Ok(entry.base_doc() + BLOCK_DOCS - 1),
            BlockLayout::Sparse => {
                self.input
                    .seek(entry.offset + 2 * u64::from(entry.cardinality - 1))?;
                Ok(entry.base_doc() + u32::from(self.input.read_u16()?))
            }
            BlockLayout::Dense => {
                // scan words from the top for the highest set bit
                for w in (0..DENSE_WORDS).rev() {
                    self.input.seek(entry.offset + 8 * w as u64)?;
                    let word = self.input.read_u64()?;
                    if word != 0 {
                        let bit = 63 - word.leading_zeros();
                        return Ok(entry.base_doc() + w as u32 * 64 + bit);
                    }
                }
                Err(Error::Index("empty dense bitmap block".to_string()))
            }
        }
    }

    fn track_prev(&mut self) -> bool {
        self.bitmap.version == SparseBitmapVersion::TrackPrev
    }

    /// First id `>= lower` within the current block, if any.
    fn position_in_block(&mut self, lower: DocId) -> Result<Option<()>> {
        let entry = self.bitmap.entries[self.block_idx];
        let base = entry.base_doc();
        let from_bit = lower.saturating_sub(base).min(BLOCK_DOCS);
        match entry.layout() {
            BlockLayout::AllSet => {
                if from_bit >= BLOCK_DOCS {
                    return Ok(None);
                }
                self.in_block_pos = from_bit;
                self.value = base + from_bit;
                self.index = entry.rank_base + from_bit;
                if self.track_prev() {
                    self.prev = if from_bit > 0 {
                        base + from_bit - 1
                    } else {
                        self.prev_block_last()?
                    };
                }
                Ok(Some(()))
            }
            BlockLayout::Dense => {
                let mut word_idx = (from_bit / 64) as usize;
                if word_idx >= DENSE_WORDS {
                    return Ok(None);
                }
                let mut word = self.words[word_idx] & (!0u64 << (from_bit % 64));
                while word == 0 {
                    word_idx += 1;
                    if word_idx >= DENSE_WORDS {
                        return Ok(None);
                    }
                    word = self.words[word_idx];
                }
                let bit = word_idx as u32 * 64 + word.trailing_zeros();
                self.in_block_pos = bit;
                self.value = base + bit;
                self.index = entry.rank_base + self.dense_rank(bit);
                if self.track_prev() {
                    self.prev = match self.dense_prev(bit) {
                        Some(p) => base + p,
                        None => self.prev_block_last()?,
                    };
                }
                Ok(Some(()))
            }
            BlockLayout::Sparse => {
                let pos = self
                    .offsets
                    .partition_point(|&o| u32::from(o) < from_bit.min(u32::from(u16::MAX)))
                    as u32;
                // from_bit may exceed u16::MAX only when lower is past the block
                if from_bit > u32::from(u16::MAX) || pos >= entry.cardinality {
                    return Ok(None);
                }
                self.in_block_pos = pos;
                self.value = base + u32::from(self.offsets[pos as usize]);
                self.index = entry.rank_base + pos;
                if self.track_prev() {
                    self.prev = if pos > 0 {
                        base + u32::from(self.offsets[pos as usize - 1])
                    } else {
                        self.prev_block_last()?
                    };
                }
                Ok(Some(()))
            }
        }
    }

    /// Count of set bits strictly below `bit` in the loaded dense block.
    fn dense_rank(&self, bit: u32) -> u32 {
        let word_idx = (bit / 64) as usize;
        let mut rank: u32 = self.words[..word_idx].iter().map(|w| w.count_ones()).sum();
        if bit % 64 != 0 {
            rank += (self.words[word_idx] & ((1u64 << (bit % 64)) - 1)).count_ones();
        }
        rank
    }

    /// Highest set bit strictly below `bit` in the loaded dense block.
    fn dense_prev(&self, bit: u32) -> Option<u32> {
        let word_idx = (bit / 64) as usize;
        let masked = if bit % 64 == 0 {
            0
        } else {
            self.words[word_idx] & ((1u64 << (bit % 64)) - 1)
        };
        if masked != 0 {
            return Some(word_idx as u32 * 64 + 63 - masked.leading_zeros());
        }
        for w in (0..word_idx).rev() {
            if self.words[w] != 0 {
                return Some(w as u32 * 64 + 63 - self.words[w].leading_zeros());
            }
        }
        None
    }

    fn prev_block_last(&mut self) -> Result<DocId> {
        if self.block_idx == 0 {
            return Ok(doc_limits::INVALID);
        }
        self.block_last(self.block_idx - 1)
    }

    /// Advance to the next id; `false` at end.
    pub fn next(&mut self) -> Result<bool> {
        if doc_limits::eof(self.value) {
            return Ok(false);
        }
        let lower = if self.block_idx == usize::MAX {
            doc_limits::MIN
        } else {
            self.value + 1
        };
        self.advance_to(lower)
    }

    /// Position at the first id `>= target`; returns the id or `EOF`.
    pub fn seek(&mut self, target: DocId) -> Result<DocId> {
        if doc_limits::eof(self.value) || target <= self.value {
            return Ok(self.value);
        }
        self.advance_to(target)?;
        Ok(self.value)
    }

    fn advance_to(&mut self, lower: DocId) -> Result<bool> {
        let entries = &self.bitmap.entries;
        let target_block = lower >> 16;

        let mut idx = if self.block_idx == usize::MAX {
            entries.partition_point(|e| e.block < target_block)
        } else if entries[self.block_idx].block >= target_block {
            self.block_idx
        } else {
            self.block_idx + entries[self.block_idx..].partition_point(|e| e.block < target_block)
        };

        loop {
            if idx >= entries.len() {
                let last = self.value;
                self.value = doc_limits::EOF;
                if self.track_prev() && doc_limits::valid(last) {
                    self.prev = last;
                }
                return Ok(false);
            }
            if idx != self.block_idx {
                self.load_block(idx)?;
            }
            let effective_lower = lower.max(entries[idx].base_doc());
            if self.position_in_block(effective_lower)?.is_some() {
                return Ok(true);
            }
            idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_directory::{BufferOutput, SliceInput};

    fn build(docs: &[DocId], version: SparseBitmapVersion) -> (Arc<Vec<u8>>, SparseBitmapMeta, SparseBitmap) {
        let mut writer = SparseBitmapWriter::new();
        for &d in docs {
            writer.push(d);
        }
        let mut out = BufferOutput::new();
        let meta = writer.finish(&mut out).unwrap();
        let data = Arc::new(out.into_bytes());
        let mut input = SliceInput::new(Arc::clone(&data));
        let bitmap = SparseBitmap::open(&mut input, meta, version).unwrap();
        (data, meta, bitmap)
    }

    fn iter<'a>(data: &Arc<Vec<u8>>, bitmap: &'a SparseBitmap) -> SparseBitmapIterator<'a> {
        bitmap.iterator(Box::new(SliceInput::new(Arc::clone(data))))
    }

    #[test]
    fn test_forward_iteration_sparse() {
        let docs = [2u32, 4, 8, 9];
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::Plain);
        let mut it = iter(&data, &bitmap);
        let mut seen = Vec::new();
        while it.next().unwrap() {
            seen.push(it.value());
        }
        assert_eq!(seen, docs);
        assert_eq!(it.value(), doc_limits::EOF);
        assert!(!it.next().unwrap());
    }

    #[test]
    fn test_seek_semantics() {
        let docs = [2u32, 4, 8, 9];
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::Plain);
        let mut it = iter(&data, &bitmap);
        assert_eq!(it.seek(1).unwrap(), 2);
        // seek at or before current is a no-op
        assert_eq!(it.seek(2).unwrap(), 2);
        assert_eq!(it.seek(6).unwrap(), 8);
        assert_eq!(it.seek(10).unwrap(), doc_limits::EOF);
        assert_eq!(it.seek(3).unwrap(), doc_limits::EOF);
    }

    #[test]
    fn test_rank_tracking() {
        let docs = [5u32, 100, 70_000, 70_001, 200_000];
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::Plain);
        let mut it = iter(&data, &bitmap);
        for (rank, &doc) in docs.iter().enumerate() {
            assert!(it.next().unwrap());
            assert_eq!(it.value(), doc);
            assert_eq!(it.index(), rank as u32, "rank of {doc}");
        }

        let mut it = iter(&data, &bitmap);
        assert_eq!(it.seek(70_001).unwrap(), 70_001);
        assert_eq!(it.index(), 3);
    }

    #[test]
    fn test_dense_block_layout() {
        // one block with > DENSE_THRESHOLD ids
        let docs: Vec<DocId> = (1..=5000).map(|i| i * 2).collect();
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::Plain);
        let mut it = iter(&data, &bitmap);
        assert_eq!(it.seek(4001).unwrap(), 4002);
        assert_eq!(it.index(), 2000);
        assert!(it.next().unwrap());
        assert_eq!(it.value(), 4004);
    }

    #[test]
    fn test_all_set_block_layout() {
        let docs: Vec<DocId> = (0..BLOCK_DOCS).map(|i| (1 << 16) + i).collect();
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::Plain);
        assert_eq!(bitmap.docs_count(), BLOCK_DOCS);
        let mut it = iter(&data, &bitmap);
        assert_eq!(it.seek(1).unwrap(), 1 << 16);
        assert_eq!(it.seek((1 << 16) + 777).unwrap(), (1 << 16) + 777);
        assert_eq!(it.index(), 777);
        assert_eq!(it.seek(1 << 17).unwrap(), doc_limits::EOF);
    }

    #[test]
    fn test_prev_tracking_within_and_across_blocks() {
        let docs = [3u32, 9, (1 << 16) + 5, (1 << 16) + 6];
        let (data, _, bitmap) = build(&docs, SparseBitmapVersion::TrackPrev);
        let mut it = iter(&data, &bitmap);

        assert!(it.next().unwrap());
        assert_eq!(it.prev_value(), doc_limits::INVALID);
        assert!(it.next().unwrap());
        assert_eq!(it.prev_value(), 3);

        // seek across a block boundary: prev is the last id of the
        // preceding block
        let mut it = iter(&data, &bitmap);
        assert_eq!(it.seek((1 << 16) + 5).unwrap(), (1 << 16) + 5);
        assert_eq!(it.prev_value(), 9);
        assert!(it.next().unwrap());
        assert_eq!(it.prev_value(), (1 << 16) + 5);
    }

    #[test]
    fn test_writer_pop() {
        let mut writer = SparseBitmapWriter::new();
        writer.push(1);
        writer.push(5);
        assert_eq!(writer.pop(), Some(5));
        writer.push(3);
        assert_eq!(writer.docs(), &[1, 3]);
    }

    #[test]
    fn test_empty_bitmap() {
        let (data, _, bitmap) = build(&[], SparseBitmapVersion::Plain);
        assert_eq!(bitmap.docs_count(), 0);
        let mut it = iter(&data, &bitmap);
        assert!(!it.next().unwrap());
        assert_eq!(it.value(), doc_limits::EOF);
    }
}
