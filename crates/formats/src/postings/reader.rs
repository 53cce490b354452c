//! Posting-list iteration.

use tessera_core::types::doc_limits;
use tessera_core::{bitpack, DocId, DocIterator, Error, IndexFeatures, Result};
use tessera_directory::{IndexInput, SliceInput};

use crate::skip_list::{SkipObserver, SkipReader};

use super::{TermMeta, BLOCK_SIZE, SKIP_0, SKIP_N};

/// Index value meaning "block decoded but no document visited yet".
const UNPOSITIONED: usize = usize::MAX;

#[derive(Debug, Clone, Copy, Default)]
struct SkipState {
    doc: DocId,
    doc_ptr: u64,
    pos_ptr: u64,
    pay_ptr: u64,
    max_freq: u32,
}

struct PostingsSkipObserver {
    has_pos: bool,
    has_pay: bool,
    has_freq: bool,
    staged: SkipState,
    levels: Vec<SkipState>,
}

impl PostingsSkipObserver {
    fn new(features: IndexFeatures, levels: usize) -> Self {
        Self {
            has_pos: features.position(),
            has_pay: features.offset() || features.payload(),
            has_freq: features.freq(),
            staged: SkipState::default(),
            levels: vec![SkipState::default(); levels.max(1)],
        }
    }

    fn read_record(&self, prev: &SkipState, input: &mut SliceInput) -> Result<SkipState> {
        let doc = prev.doc + input.read_vint()?;
        let doc_ptr = prev.doc_ptr + input.read_vlong()?;
        let pos_ptr = if self.has_pos {
            prev.pos_ptr + input.read_vlong()?
        } else {
            0
        };
        let pay_ptr = if self.has_pay {
            prev.pay_ptr + input.read_vlong()?
        } else {
            0
        };
        let max_freq = if self.has_freq { input.read_vint()? } else { 0 };
        Ok(SkipState {
            doc,
            doc_ptr,
            pos_ptr,
            pay_ptr,
            max_freq,
        })
    }

    fn bottom(&self) -> SkipState {
        self.levels[0]
    }
}

impl SkipObserver for PostingsSkipObserver {
    fn read(&mut self, level: usize, input: &mut SliceInput) -> Result<DocId> {
        let prev = self.levels[level];
        self.staged = self.read_record(&prev, input)?;
        Ok(self.staged.doc)
    }

    fn accept(&mut self, level: usize) {
        self.levels[level] = self.staged;
    }

    fn copy(&mut self, from: usize, to: usize) {
        self.levels[to] = self.levels[from];
    }
}

/// Lazily decodes the positions of the current document.
///
/// At most `freq` positions may be consumed per document; entries of
/// documents that were passed over are discarded on demand, never decoded
/// eagerly.
pub struct PositionReader {
    pos_in: SliceInput,
    pay_in: Option<SliceInput>,
    has_offs: bool,
    has_pay: bool,

    pending_skip: u64,
    remaining: u32,
    pos: u32,
    offs_start: u32,
    offs_end: u32,
    payload: Vec<u8>,
}

impl PositionReader {
    fn new(pos_in: SliceInput, pay_in: Option<SliceInput>, features: IndexFeatures) -> Self {
        Self {
            pos_in,
            pay_in,
            has_offs: features.offset(),
            has_pay: features.payload(),
            pending_skip: 0,
            remaining: 0,
            pos: 0,
            offs_start: 0,
            offs_end: 0,
            payload: Vec::new(),
        }
    }

    /// Enter a document with `freq` positions; unconsumed positions of the
    /// previous document become pending skips.
    fn begin_doc(&mut self, freq: u32) {
        self.pending_skip += u64::from(self.remaining);
        self.remaining = freq;
        self.pos = 0;
        self.offs_start = 0;
        self.offs_end = 0;
    }

    /// Account for `count` positions of documents passed without a visit.
    fn skip_positions(&mut self, count: u64) {
        self.pending_skip += count;
    }

    /// Hard reposition after a skip-list jump.
    fn jump(&mut self, pos_pos: u64, pay_pos: u64) -> Result<()> {
        self.pos_in.seek(pos_pos)?;
        if let Some(pay) = self.pay_in.as_mut() {
            pay.seek(pay_pos)?;
        }
        self.pending_skip = 0;
        self.remaining = 0;
        Ok(())
    }

    fn discard_one(&mut self) -> Result<()> {
        self.pos_in.read_vint()?;
        if let Some(pay) = self.pay_in.as_mut() {
            if self.has_offs {
                pay.read_vint()?;
                pay.read_vint()?;
            }
            if self.has_pay {
                let len = pay.read_vlong()?;
                pay.seek(pay.position() + len)?;
            }
        }
        Ok(())
    }

    /// Decode the next position of the current document.
    ///
    /// Returns `false` once `freq` positions have been consumed; asking
    /// again is a programmer error flagged in debug builds.
    pub fn next(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            debug_assert!(false, "read past the document's frequency");
            return Ok(false);
        }
        while self.pending_skip > 0 {
            self.discard_one()?;
            self.pending_skip -= 1;
        }
        self.pos += self.pos_in.read_vint()?;
        if let Some(pay) = self.pay_in.as_mut() {
            if self.has_offs {
                self.offs_start += pay.read_vint()?;
                self.offs_end = self.offs_start + pay.read_vint()?;
            }
            if self.has_pay {
                let len = pay.read_vlong()? as usize;
                self.payload.resize(len, 0);
                pay.read_bytes(&mut self.payload)?;
            }
        }
        self.remaining -= 1;
        Ok(true)
    }

    /// Positions left for the current document.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn pos(&self) -> u32 {
        self.pos
    }

    /// Offset range of the current position, when offsets are indexed.
    pub fn offsets(&self) -> Option<(u32, u32)> {
        self.has_offs.then_some((self.offs_start, self.offs_end))
    }

    /// Payload of the current position, when payloads are indexed.
    pub fn payload(&self) -> Option<&[u8]> {
        self.has_pay.then_some(self.payload.as_slice())
    }
}

/// Iterator over one term's postings.
pub struct PostingsIterator {
    features: IndexFeatures,
    decode_freq: bool,
    meta: TermMeta,
    doc_in: SliceInput,

    docs: Vec<DocId>,
    freqs: Vec<u64>,
    scratch: Vec<u64>,
    packed: Vec<u8>,
    block_len: usize,
    idx: usize,
    /// Documents decoded (or skipped over) from the stream so far.
    read_docs: u64,
    /// Last document preceding the current block.
    block_base: DocId,
    value: DocId,

    skip: Option<SkipReader<PostingsSkipObserver>>,
    skip_failed: bool,

    positions: Option<PositionReader>,
}

impl PostingsIterator {
    /// Open an iterator over the term described by `meta`.
    ///
    /// `requested` selects which attributes the caller will consume and
    /// must be a subset of the field's indexed `features`.
    pub fn open(
        meta: TermMeta,
        features: IndexFeatures,
        requested: IndexFeatures,
        doc_data: &SliceInput,
        pos_data: Option<&SliceInput>,
        pay_data: Option<&SliceInput>,
    ) -> Result<Self> {
        if !features.contains(requested) {
            return Err(Error::NotSupported(format!(
                "requested features {:#06b} exceed indexed {:#06b}",
                requested.bits(),
                features.bits()
            )));
        }
        let mut doc_in = doc_data.dup_typed();
        doc_in.seek(meta.doc_start)?;

        let positions = if requested.position() {
            let pos_data = pos_data.ok_or_else(|| {
                Error::IllegalArgument("positions requested but no pos stream".to_string())
            })?;
            let mut pos_in = pos_data.dup_typed();
            pos_in.seek(meta.pos_start)?;
            let pay_in = if features.offset() || features.payload() {
                let pay_data = pay_data.ok_or_else(|| {
                    Error::IllegalArgument(
                        "offsets/payloads indexed but no pay stream".to_string(),
                    )
                })?;
                let mut pay_in = pay_data.dup_typed();
                pay_in.seek(meta.pay_start)?;
                Some(pay_in)
            } else {
                None
            };
            Some(PositionReader::new(pos_in, pay_in, features))
        } else {
            None
        };

        Ok(Self {
            features,
            decode_freq: requested.freq() || requested.position(),
            meta,
            doc_in,
            docs: Vec::with_capacity(BLOCK_SIZE as usize),
            freqs: Vec::with_capacity(BLOCK_SIZE as usize),
            scratch: Vec::with_capacity(BLOCK_SIZE as usize),
            packed: Vec::new(),
            block_len: 0,
            idx: UNPOSITIONED,
            read_docs: 0,
            block_base: 0,
            value: doc_limits::INVALID,
            skip: None,
            skip_failed: false,
            positions,
        })
    }

    /// Term frequency of the current document; 1 when frequencies are not
    /// decoded.
    pub fn freq(&self) -> u32 {
        if self.decode_freq && self.idx != UNPOSITIONED && self.idx < self.block_len {
            self.freqs[self.idx] as u32
        } else {
            1
        }
    }

    pub fn docs_count(&self) -> u32 {
        self.meta.docs_count
    }

    /// Position access for the current document.
    pub fn positions(&mut self) -> Result<&mut PositionReader> {
        self.positions
            .as_mut()
            .ok_or_else(|| Error::NotSupported("positions were not requested".to_string()))
    }

    fn refill(&mut self) -> Result<bool> {
        let remaining = u64::from(self.meta.docs_count) - self.read_docs;
        if remaining == 0 {
            return Ok(false);
        }
        if self.block_len > 0 {
            self.block_base = self.docs[self.block_len - 1];
        }
        let n = remaining.min(u64::from(BLOCK_SIZE)) as usize;
        if n == BLOCK_SIZE as usize {
            let bits = self.doc_in.read_byte()?;
            self.read_packed(bits, n)?;
            self.docs.clear();
            let mut doc = self.block_base;
            for &delta in &self.scratch {
                doc += delta as DocId;
                self.docs.push(doc);
            }
            if self.features.freq() {
                let fbits = self.doc_in.read_byte()?;
                if self.decode_freq {
                    self.read_packed(fbits, n)?;
                    std::mem::swap(&mut self.freqs, &mut self.scratch);
                } else {
                    let skip = bitpack::packed_len(n, fbits) as u64;
                    self.doc_in.seek(self.doc_in.position() + skip)?;
                }
            }
        } else {
            self.docs.clear();
            self.freqs.clear();
            let mut doc = self.block_base;
            for _ in 0..n {
                doc += self.doc_in.read_vlong()? as DocId;
                self.docs.push(doc);
                if self.features.freq() {
                    let f = self.doc_in.read_vlong()?;
                    if self.decode_freq {
                        self.freqs.push(f);
                    }
                }
            }
        }
        self.block_len = n;
        self.idx = UNPOSITIONED;
        self.read_docs += n as u64;
        Ok(true)
    }

    fn read_packed(&mut self, bits: u8, n: usize) -> Result<()> {
        let len = bitpack::packed_len(n, bits);
        self.packed.resize(len, 0);
        self.doc_in.read_bytes(&mut self.packed)?;
        bitpack::unpack(&self.packed, bits, n, &mut self.scratch);
        Ok(())
    }

    /// Move onto `idx` within the decoded block, accounting for skipped
    /// documents' positions.
    fn move_to(&mut self, idx: usize) {
        debug_assert!(idx < self.block_len);
        if self.positions.is_some() {
            let from = if self.idx == UNPOSITIONED {
                0
            } else {
                self.idx + 1
            };
            let skipped: u64 = self.freqs[from..idx].iter().sum();
            let freq = self.freqs[idx] as u32;
            let positions = self.positions.as_mut().expect("present");
            positions.skip_positions(skipped);
            positions.begin_doc(freq);
        }
        self.idx = idx;
        self.value = self.docs[idx];
    }

    /// Account for positions of unvisited documents when leaving a block.
    fn drain_block_positions(&mut self) {
        if self.positions.is_some() && self.block_len > 0 {
            let from = if self.idx == UNPOSITIONED {
                0
            } else {
                self.idx + 1
            };
            let skipped: u64 = self.freqs[from..self.block_len].iter().sum();
            self.positions
                .as_mut()
                .expect("present")
                .skip_positions(skipped);
        }
    }

    fn try_skip(&mut self, target: DocId) -> Result<()> {
        if self.meta.skip_start == 0 || self.skip_failed {
            return Ok(());
        }
        if self.skip.is_none() {
            let mut framed = self
                .doc_in
                .slice_of(self.meta.skip_start, self.doc_in.length() - self.meta.skip_start)?;
            let observer = PostingsSkipObserver::new(self.features, 16);
            match SkipReader::open(
                &mut framed,
                SKIP_0,
                SKIP_N,
                u64::from(self.meta.docs_count),
                observer,
            ) {
                Ok(reader) => self.skip = Some(reader),
                Err(e) => {
                    self.skip_failed = true;
                    return Err(e);
                }
            }
        }
        let skipper = self.skip.as_mut().expect("just installed");
        let skipped = skipper.seek(target)?;
        if skipped > self.read_docs {
            let state = skipper.observer().bottom();
            self.doc_in.seek(self.meta.doc_start + state.doc_ptr)?;
            self.read_docs = skipped;
            self.block_base = state.doc;
            self.block_len = 0;
            self.idx = UNPOSITIONED;
            if let Some(positions) = self.positions.as_mut() {
                positions.jump(
                    self.meta.pos_start + state.pos_ptr,
                    self.meta.pay_start + state.pay_ptr,
                )?;
            }
        }
        Ok(())
    }

    fn seek_impl(&mut self, target: DocId) -> Result<DocId> {
        self.try_skip(target)?;
        loop {
            if self.block_len > 0 && self.docs[self.block_len - 1] >= target {
                let start = if self.idx == UNPOSITIONED {
                    0
                } else {
                    self.idx + 1
                };
                let at = start + self.docs[start..self.block_len].partition_point(|&d| d < target);
                debug_assert!(at < self.block_len);
                self.move_to(at);
                return Ok(self.value);
            }
            self.drain_block_positions();
            self.block_len = 0;
            self.idx = UNPOSITIONED;
            if !self.refill()? {
                self.value = doc_limits::EOF;
                return Ok(self.value);
            }
        }
    }
}

impl DocIterator for PostingsIterator {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        loop {
            let next_idx = if self.idx == UNPOSITIONED {
                0
            } else {
                self.idx + 1
            };
            if next_idx < self.block_len {
                self.move_to(next_idx);
                return true;
            }
            match self.refill() {
                Ok(true) => {}
                _ => {
                    self.value = doc_limits::EOF;
                    return false;
                }
            }
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        match self.seek_impl(target) {
            Ok(doc) => doc,
            Err(_) => {
                self.value = doc_limits::EOF;
                self.value
            }
        }
    }

    fn cost(&self) -> u64 {
        u64::from(self.meta.docs_count)
    }
}

/// Block-max variant of [`PostingsIterator`].
///
/// The contract is identical to the basic iterator, with one addition:
/// after [`Wanderator::set_min_competitive_freq`], `seek` may skip whole
/// blocks whose maximum term frequency is below the threshold, even when
/// they contain the target. The mapping from scores to frequencies is the
/// caller's; this iterator only compares frequencies.
pub struct Wanderator {
    it: PostingsIterator,
    /// Sequential cursor over the level-0 skip records.
    records: Option<SliceInput>,
    record_state: SkipState,
    /// Number of records consumed; record `k` describes block `k`.
    records_read: u64,
    threshold: u32,
}

impl Wanderator {
    pub fn open(
        meta: TermMeta,
        features: IndexFeatures,
        requested: IndexFeatures,
        doc_data: &SliceInput,
    ) -> Result<Self> {
        if requested.position() {
            return Err(Error::NotSupported(
                "wanderator does not surface positions".to_string(),
            ));
        }
        let it = PostingsIterator::open(meta, features, requested, doc_data, None, None)?;
        let records = if meta.skip_start != 0 {
            let mut framed = doc_data.dup_typed();
            framed.seek(meta.skip_start)?;
            // level framing stores levels top-down; the last is level 0
            let num_levels = framed.read_vint()? as usize;
            let mut slice = None;
            for level in 0..num_levels {
                let len = framed.read_vlong()?;
                let start = framed.position();
                if level + 1 == num_levels {
                    slice = Some(framed.slice_of(start, len)?);
                }
                framed.seek(start + len)?;
            }
            slice
        } else {
            None
        };
        Ok(Self {
            it,
            records,
            record_state: SkipState::default(),
            records_read: 0,
            threshold: 0,
        })
    }

    /// Set the minimum block-max frequency a block must carry to be worth
    /// decoding.
    pub fn set_min_competitive_freq(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    pub fn freq(&self) -> u32 {
        self.it.freq()
    }

    /// Maximum frequency within the last record consumed; `u32::MAX` when
    /// positioned in the tail (which carries no record).
    pub fn block_max_freq(&self) -> u32 {
        let full_blocks = u64::from(self.it.meta.docs_count) / u64::from(BLOCK_SIZE);
        let block_idx = (self.it.read_docs.saturating_sub(1)) / u64::from(BLOCK_SIZE);
        if block_idx >= full_blocks {
            u32::MAX
        } else {
            self.record_state.max_freq
        }
    }

    fn read_record(&mut self) -> Result<SkipState> {
        let records = self
            .records
            .as_mut()
            .ok_or_else(|| Error::IllegalState("no skip records".to_string()))?;
        let parser = PostingsSkipObserver::new(self.it.features, 1);
        let state = parser.read_record(&self.record_state, records)?;
        self.record_state = state;
        self.records_read += 1;
        Ok(state)
    }

    /// Decode the next block, skipping ahead over blocks that cannot
    /// contain a competitive match at or after `target`.
    fn next_block(&mut self, target: DocId) -> Result<bool> {
        let full_blocks = u64::from(self.it.meta.docs_count) / u64::from(BLOCK_SIZE);
        loop {
            if self.it.read_docs >= u64::from(self.it.meta.docs_count) {
                return Ok(false);
            }
            let block_idx = self.it.read_docs / u64::from(BLOCK_SIZE);
            let aligned = self.it.read_docs % u64::from(BLOCK_SIZE) == 0;
            if aligned && self.records.is_some() && block_idx < full_blocks {
                // catch up with blocks decoded without an explicit skip
                while self.records_read < block_idx {
                    self.read_record()?;
                }
                if self.records_read == block_idx {
                    let record = self.read_record()?;
                    if record.doc < target || record.max_freq < self.threshold {
                        self.it
                            .doc_in
                            .seek(self.it.meta.doc_start + record.doc_ptr)?;
                        self.it.read_docs = (block_idx + 1) * u64::from(BLOCK_SIZE);
                        self.it.block_base = record.doc;
                        self.it.block_len = 0;
                        self.it.idx = UNPOSITIONED;
                        continue;
                    }
                }
            }
            return self.it.refill();
        }
    }

    fn seek_impl(&mut self, target: DocId) -> Result<DocId> {
        loop {
            if self.it.block_len > 0 {
                let start = if self.it.idx == UNPOSITIONED {
                    0
                } else {
                    self.it.idx + 1
                };
                let at = start
                    + self.it.docs[start..self.it.block_len].partition_point(|&d| d < target);
                if at < self.it.block_len {
                    self.it.move_to(at);
                    return Ok(self.it.value);
                }
                self.it.block_len = 0;
                self.it.idx = UNPOSITIONED;
            }
            if !self.next_block(target)? {
                self.it.value = doc_limits::EOF;
                return Ok(self.it.value);
            }
        }
    }
}

impl DocIterator for Wanderator {
    fn value(&self) -> DocId {
        self.it.value()
    }

    fn next(&mut self) -> bool {
        self.it.next()
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.it.value) || target <= self.it.value {
            return self.it.value;
        }
        match self.seek_impl(target) {
            Ok(doc) => doc,
            Err(_) => {
                self.it.value = doc_limits::EOF;
                self.it.value
            }
        }
    }

    fn cost(&self) -> u64 {
        self.it.cost()
    }
}
