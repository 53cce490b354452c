//! Posting-list serialization.

use tessera_core::types::doc_limits;
use tessera_core::{bitpack, DocId, Error, IndexFeatures, Result};
use tessera_directory::IndexOutput;

use crate::skip_list::SkipWriter;

use super::{TermMeta, BLOCK_SIZE, SKIP_0, SKIP_N};

#[derive(Debug, Clone, Copy, Default)]
struct SkipLevelState {
    doc: DocId,
    doc_ptr: u64,
    pos_ptr: u64,
    pay_ptr: u64,
}

/// Streams one field's terms into the `doc`/`pos`/`pay` outputs.
///
/// Terms must be written in dictionary order; within a term, documents in
/// ascending order; within a document, positions in ascending order.
pub struct PostingsWriter<O: IndexOutput> {
    features: IndexFeatures,
    doc_out: O,
    pos_out: Option<O>,
    pay_out: Option<O>,

    skip: SkipWriter,
    skip_levels: Vec<SkipLevelState>,

    // per-term state
    term_open: bool,
    meta: TermMeta,
    last_doc: DocId,
    pending_docs: Vec<u64>,
    pending_freqs: Vec<u64>,
    packed: Vec<u8>,

    // per-document state
    current_freq: u32,
    positions_written: u32,
    last_pos: u32,
    last_offs_start: u32,
}

impl<O: IndexOutput> PostingsWriter<O> {
    pub fn new(
        features: IndexFeatures,
        doc_out: O,
        pos_out: Option<O>,
        pay_out: Option<O>,
    ) -> Result<Self> {
        let features = features.check()?;
        if features.position() && pos_out.is_none() {
            return Err(Error::IllegalArgument(
                "positions enabled but no pos output".to_string(),
            ));
        }
        if (features.offset() || features.payload()) && pay_out.is_none() {
            return Err(Error::IllegalArgument(
                "offsets/payloads enabled but no pay output".to_string(),
            ));
        }
        Ok(Self {
            features,
            doc_out,
            pos_out,
            pay_out,
            skip: SkipWriter::new(SKIP_0, SKIP_N),
            skip_levels: Vec::new(),
            term_open: false,
            meta: TermMeta::default(),
            last_doc: 0,
            pending_docs: Vec::with_capacity(BLOCK_SIZE as usize),
            pending_freqs: Vec::with_capacity(BLOCK_SIZE as usize),
            packed: Vec::new(),
            current_freq: 0,
            positions_written: 0,
            last_pos: 0,
            last_offs_start: 0,
        })
    }

    pub fn features(&self) -> IndexFeatures {
        self.features
    }

    /// Open a new term. `expected_docs` sizes the skip structure when the
    /// caller knows the posting length upfront.
    pub fn begin_term(&mut self, expected_docs: Option<u64>) -> Result<()> {
        if self.term_open {
            return Err(Error::IllegalState("term already open".to_string()));
        }
        self.term_open = true;
        self.meta = TermMeta {
            doc_start: self.doc_out.position(),
            pos_start: self.pos_out.as_ref().map_or(0, |o| o.position()),
            pay_start: self.pay_out.as_ref().map_or(0, |o| o.position()),
            ..TermMeta::default()
        };
        self.last_doc = 0;
        self.pending_docs.clear();
        self.pending_freqs.clear();
        self.skip
            .prepare(expected_docs.unwrap_or(u64::from(DocId::MAX)));
        self.skip_levels.clear();
        Ok(())
    }

    /// Append a document. `freq` is ignored unless frequencies are indexed.
    pub fn write_doc(&mut self, doc: DocId, freq: u32) -> Result<()> {
        debug_assert!(self.term_open);
        if !doc_limits::valid(doc) || doc <= self.last_doc {
            return Err(Error::IllegalArgument(format!(
                "doc {doc} out of order (last {})",
                self.last_doc
            )));
        }
        debug_assert!(
            !self.features.position() || self.positions_written == self.current_freq,
            "previous document is missing positions"
        );
        if self.pending_docs.len() == BLOCK_SIZE as usize {
            self.flush_block()?;
        }
        self.pending_docs.push(u64::from(doc - self.last_doc));
        if self.features.freq() {
            self.pending_freqs.push(u64::from(freq));
            self.meta.total_freq += u64::from(freq);
        }
        self.last_doc = doc;
        self.meta.docs_count += 1;
        self.current_freq = freq;
        self.positions_written = 0;
        self.last_pos = 0;
        self.last_offs_start = 0;
        Ok(())
    }

    /// Append one position of the current document, with optional offsets
    /// and payload. Must be called exactly `freq` times per document when
    /// positions are indexed.
    pub fn write_position(
        &mut self,
        pos: u32,
        offsets: Option<(u32, u32)>,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        debug_assert!(self.term_open);
        if !self.features.position() {
            return Err(Error::IllegalState(
                "positions are not indexed for this field".to_string(),
            ));
        }
        if self.positions_written >= self.current_freq {
            return Err(Error::IllegalState(format!(
                "more positions than the frequency {}",
                self.current_freq
            )));
        }
        if self.positions_written > 0 && pos <= self.last_pos {
            return Err(Error::IllegalArgument(format!(
                "position {pos} out of order (last {})",
                self.last_pos
            )));
        }
        let pos_out = self.pos_out.as_mut().ok_or_else(|| {
            Error::IllegalState("positions enabled but no pos output".to_string())
        })?;
        pos_out.write_vint(pos - self.last_pos)?;
        self.last_pos = pos;

        if self.features.offset() {
            let (start, end) = offsets.ok_or_else(|| {
                Error::IllegalArgument("offsets are indexed but missing".to_string())
            })?;
            if end < start {
                return Err(Error::IllegalArgument(format!(
                    "invalid offset range [{start}, {end})"
                )));
            }
            let pay_out = self.pay_out.as_mut().expect("checked in new");
            pay_out.write_vint(start - self.last_offs_start)?;
            pay_out.write_vint(end - start)?;
            self.last_offs_start = start;
        }
        if self.features.payload() {
            let pay_out = self.pay_out.as_mut().expect("checked in new");
            pay_out.write_vbytes(payload.unwrap_or(&[]))?;
        }
        self.positions_written += 1;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        debug_assert_eq!(self.pending_docs.len(), BLOCK_SIZE as usize);
        let max_delta = self.pending_docs.iter().copied().max().unwrap_or(0);
        let bits = bitpack::bits_required(max_delta).max(1);
        self.doc_out.write_byte(bits)?;
        self.packed.clear();
        bitpack::pack(&self.pending_docs, bits, &mut self.packed);
        self.doc_out.write_bytes(&self.packed)?;

        let mut block_max_freq = 0u32;
        if self.features.freq() {
            let max_freq = self.pending_freqs.iter().copied().max().unwrap_or(0);
            block_max_freq = max_freq as u32;
            let fbits = bitpack::bits_required(max_freq).max(1);
            self.doc_out.write_byte(fbits)?;
            self.packed.clear();
            bitpack::pack(&self.pending_freqs, fbits, &mut self.packed);
            self.doc_out.write_bytes(&self.packed)?;
        }
        self.pending_docs.clear();
        self.pending_freqs.clear();

        // skip record: this block's last doc and the stream positions at
        // which the next block begins
        let doc = self.last_doc;
        let doc_ptr = self.doc_out.position() - self.meta.doc_start;
        let pos_ptr = self
            .pos_out
            .as_ref()
            .map_or(0, |o| o.position() - self.meta.pos_start);
        let pay_ptr = self
            .pay_out
            .as_ref()
            .map_or(0, |o| o.position() - self.meta.pay_start);
        let has_freq = self.features.freq();
        let has_pos = self.features.position();
        let has_pay = self.features.offset() || self.features.payload();

        while self.skip_levels.len() < 16 {
            self.skip_levels.push(SkipLevelState::default());
        }
        let levels = &mut self.skip_levels;
        self.skip.skip(u64::from(self.meta.docs_count), |level, out| {
            let state = &mut levels[level];
            out.write_vint(doc - state.doc)?;
            out.write_vlong(doc_ptr - state.doc_ptr)?;
            if has_pos {
                out.write_vlong(pos_ptr - state.pos_ptr)?;
            }
            if has_pay {
                out.write_vlong(pay_ptr - state.pay_ptr)?;
            }
            if has_freq {
                out.write_vint(block_max_freq)?;
            }
            *state = SkipLevelState {
                doc,
                doc_ptr,
                pos_ptr,
                pay_ptr,
            };
            Ok(())
        })
    }

    /// Seal the current term and return its dictionary entry.
    pub fn end_term(&mut self) -> Result<TermMeta> {
        if !self.term_open {
            return Err(Error::IllegalState("no term open".to_string()));
        }
        debug_assert!(
            !self.features.position() || self.positions_written == self.current_freq,
            "last document is missing positions"
        );
        // a trailing full block is packed like any other
        if self.pending_docs.len() == BLOCK_SIZE as usize {
            self.flush_block()?;
        }
        // tail: the final partial block as plain vints
        for i in 0..self.pending_docs.len() {
            self.doc_out.write_vlong(self.pending_docs[i])?;
            if self.features.freq() {
                self.doc_out.write_vlong(self.pending_freqs[i])?;
            }
        }
        self.pending_docs.clear();
        self.pending_freqs.clear();

        if self.skip.has_records() {
            self.meta.skip_start = self.doc_out.position();
            self.skip.flush(&mut self.doc_out)?;
        }
        self.term_open = false;
        self.current_freq = 0;
        self.positions_written = 0;
        Ok(self.meta)
    }

    /// Flush the underlying outputs; footers are the caller's concern.
    pub fn flush(&mut self) -> Result<()> {
        self.doc_out.flush()?;
        if let Some(out) = self.pos_out.as_mut() {
            out.flush()?;
        }
        if let Some(out) = self.pay_out.as_mut() {
            out.flush()?;
        }
        Ok(())
    }

    /// Hand back the stream outputs for footer writing.
    pub fn into_outputs(self) -> (O, Option<O>, Option<O>) {
        (self.doc_out, self.pos_out, self.pay_out)
    }
}
