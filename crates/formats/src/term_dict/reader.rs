//! Term dictionary access.

use rustc_hash::FxHashMap;
use tessera_core::{Error, FieldId, IndexFeatures, Result};
use tessera_directory::{format_utils, IndexInput, SliceInput};

use crate::postings::TermMeta;

use super::{read_term_meta, Automaton, EntryKind, FORMAT_VERSION, TI_FORMAT, TM_FORMAT};

/// Outcome of a [`TermIterator::seek_ge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekResult {
    /// Positioned exactly at the requested term.
    Found,
    /// Positioned at the smallest term greater than the request.
    NotFound,
    /// Every term is smaller than the request; the iterator is exhausted.
    End,
}

/// Per-field statistics and the root block pointer.
#[derive(Debug, Clone)]
pub struct FieldTerms {
    pub field_id: FieldId,
    pub features: IndexFeatures,
    pub terms_count: u64,
    /// Documents that contain the field at all.
    pub docs_count: u32,
    /// Sum of per-term document frequencies.
    pub sum_doc_freq: u64,
    /// Sum of per-term total frequencies.
    pub sum_total_freq: u64,
    pub min_term: Vec<u8>,
    pub max_term: Vec<u8>,
    root_offset: u64,
}

impl FieldTerms {
    pub fn min(&self) -> &[u8] {
        &self.min_term
    }

    pub fn max(&self) -> &[u8] {
        &self.max_term
    }

    pub fn size(&self) -> u64 {
        self.terms_count
    }
}

#[derive(Debug, Clone)]
struct Entry {
    kind: EntryKind,
    key: Vec<u8>,
    meta: Option<TermMeta>,
    child: Option<u64>,
}

fn read_block(tm: &SliceInput, offset: u64) -> Result<Vec<Entry>> {
    let mut input = tm.dup_typed();
    input.seek(offset)?;
    let count = input.read_vint()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = EntryKind::from_u8(input.read_byte()?)?;
        let key = input.read_vbytes()?;
        let (meta, child) = match kind {
            EntryKind::LeafTerm => (Some(read_term_meta(&mut input)?), None),
            EntryKind::SubBlock => (None, Some(input.read_vlong()?)),
            EntryKind::TermWithSubs => (
                Some(read_term_meta(&mut input)?),
                Some(input.read_vlong()?),
            ),
        };
        entries.push(Entry {
            kind,
            key,
            meta,
            child,
        });
    }
    Ok(entries)
}

/// The dictionary of every indexed field in a segment.
pub struct TermDict {
    fields: FxHashMap<FieldId, FieldTerms>,
    ordered: Vec<FieldId>,
    tm: SliceInput,
}

impl TermDict {
    /// Open from the `ti`/`tm` streams, validating headers and footers.
    pub fn open(mut ti: SliceInput, mut tm: SliceInput) -> Result<Self> {
        format_utils::check_footer(&mut ti.dup_typed())?;
        ti.seek(0)?;
        format_utils::check_header(&mut ti, TI_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        format_utils::check_header(&mut tm, TM_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;

        let count = ti.read_vint()? as usize;
        let mut fields = FxHashMap::default();
        let mut ordered = Vec::with_capacity(count);
        for _ in 0..count {
            let field_id = ti.read_vlong()?;
            let features = IndexFeatures::from_bits(ti.read_byte()?)
                .ok_or_else(|| Error::Index("invalid index features".to_string()))?;
            let terms_count = ti.read_vlong()?;
            let docs_count = ti.read_vint()?;
            let sum_doc_freq = ti.read_vlong()?;
            let sum_total_freq = ti.read_vlong()?;
            let min_term = ti.read_vbytes()?;
            let max_term = ti.read_vbytes()?;
            let root_offset = ti.read_vlong()?;
            ordered.push(field_id);
            fields.insert(
                field_id,
                FieldTerms {
                    field_id,
                    features,
                    terms_count,
                    docs_count,
                    sum_doc_freq,
                    sum_total_freq,
                    min_term,
                    max_term,
                    root_offset,
                },
            );
        }
        Ok(Self {
            fields,
            ordered,
            tm,
        })
    }

    pub fn field(&self, field_id: FieldId) -> Option<&FieldTerms> {
        self.fields.get(&field_id)
    }

    /// Field ids in their on-disk (ascending) order.
    pub fn field_ids(&self) -> &[FieldId] {
        &self.ordered
    }

    /// Sequential iterator over a field's terms.
    pub fn iterator(&self, field_id: FieldId) -> Result<TermIterator<'_>> {
        let field = self
            .fields
            .get(&field_id)
            .ok_or_else(|| Error::IllegalArgument(format!("unknown field {field_id}")))?;
        Ok(TermIterator::new(self, field))
    }

    /// Point lookup without iterator state.
    pub fn seek_exact(&self, field_id: FieldId, term: &[u8]) -> Result<Option<TermMeta>> {
        let field = self
            .fields
            .get(&field_id)
            .ok_or_else(|| Error::IllegalArgument(format!("unknown field {field_id}")))?;
        if field.terms_count == 0 {
            return Ok(None);
        }
        let mut offset = field.root_offset;
        let mut prefix_len = 0usize;
        loop {
            let entries = read_block(&self.tm, offset)?;
            let rem = &term[prefix_len.min(term.len())..];
            let mut descended = false;
            for entry in &entries {
                match entry.kind {
                    EntryKind::LeafTerm => {
                        if entry.key.as_slice() == rem {
                            return Ok(entry.meta);
                        }
                    }
                    EntryKind::SubBlock | EntryKind::TermWithSubs => {
                        if entry.key.as_slice() == rem {
                            return Ok(entry.meta); // None for SubBlock
                        }
                        if rem.starts_with(&entry.key) {
                            prefix_len += entry.key.len();
                            offset = entry.child.expect("sub entries carry children");
                            descended = true;
                            break;
                        }
                    }
                }
            }
            if !descended {
                return Ok(None);
            }
        }
    }

    /// Iterator over the terms accepted by `automaton`.
    pub fn intersect<'a, A: Automaton>(
        &'a self,
        field_id: FieldId,
        automaton: A,
    ) -> Result<IntersectIterator<'a, A>> {
        let field = self
            .fields
            .get(&field_id)
            .ok_or_else(|| Error::IllegalArgument(format!("unknown field {field_id}")))?;
        Ok(IntersectIterator::new(self, field, automaton))
    }
}

struct Frame {
    entries: Vec<Entry>,
    /// Index of the entry being visited; -1 before the first.
    idx: isize,
    prefix_len: usize,
    /// Automaton state for this frame's prefix (intersection only).
    state: u32,
}

/// Sequential (`Normal` mode) term iterator: `next`, `seek_ge`,
/// `seek_exact`, and metadata access for the current term.
pub struct TermIterator<'a> {
    dict: &'a TermDict,
    field: &'a FieldTerms,
    stack: Vec<Frame>,
    term: Vec<u8>,
    meta: Option<TermMeta>,
    /// Child block to enter before advancing past the current entry.
    pending_child: Option<(u64, usize)>,
    exhausted: bool,
}

impl<'a> TermIterator<'a> {
    fn new(dict: &'a TermDict, field: &'a FieldTerms) -> Self {
        Self {
            dict,
            field,
            stack: Vec::new(),
            term: Vec::new(),
            meta: None,
            pending_child: None,
            exhausted: field.terms_count == 0,
        }
    }

    /// Bytes of the current term.
    pub fn term(&self) -> &[u8] {
        &self.term
    }

    /// Metadata of the current term; a clone is a reusable postings cookie.
    pub fn meta(&self) -> Option<TermMeta> {
        self.meta
    }

    pub fn field(&self) -> &FieldTerms {
        self.field
    }

    fn push_root(&mut self) -> Result<()> {
        let entries = read_block(&self.dict.tm, self.field.root_offset)?;
        self.stack.push(Frame {
            entries,
            idx: -1,
            prefix_len: 0,
            state: 0,
        });
        Ok(())
    }

    fn push_child(&mut self, offset: u64, prefix_len: usize) -> Result<()> {
        let entries = read_block(&self.dict.tm, offset)?;
        self.stack.push(Frame {
            entries,
            idx: -1,
            prefix_len,
            state: 0,
        });
        Ok(())
    }

    /// Advance to the next term in byte order; `false` when exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if self.stack.is_empty() {
            self.push_root()?;
        }
        if let Some((child, prefix_len)) = self.pending_child.take() {
            self.push_child(child, prefix_len)?;
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.exhausted = true;
                self.meta = None;
                return Ok(false);
            };
            frame.idx += 1;
            if frame.idx as usize >= frame.entries.len() {
                self.stack.pop();
                continue;
            }
            let prefix_len = frame.prefix_len;
            let entry = frame.entries[frame.idx as usize].clone();
            self.term.truncate(prefix_len);
            self.term.extend_from_slice(&entry.key);
            match entry.kind {
                EntryKind::LeafTerm => {
                    self.meta = entry.meta;
                    return Ok(true);
                }
                EntryKind::SubBlock => {
                    let child_prefix = self.term.len();
                    self.push_child(entry.child.expect("sub block child"), child_prefix)?;
                }
                EntryKind::TermWithSubs => {
                    self.meta = entry.meta;
                    self.pending_child =
                        Some((entry.child.expect("term with subs child"), self.term.len()));
                    return Ok(true);
                }
            }
        }
    }

    /// Position at the smallest term `>= target`.
    pub fn seek_ge(&mut self, target: &[u8]) -> Result<SeekResult> {
        self.stack.clear();
        self.pending_child = None;
        self.term.clear();
        self.meta = None;
        self.exhausted = self.field.terms_count == 0;
        if self.exhausted {
            return Ok(SeekResult::End);
        }
        self.push_root()?;
        loop {
            let frame = self.stack.last_mut().expect("frame present");
            let prefix_len = frame.prefix_len;
            let rem: &[u8] = &target[prefix_len.min(target.len())..];

            let mut action: Option<(usize, bool)> = None; // (entry index, descend)
            for (i, entry) in frame.entries.iter().enumerate() {
                let key = entry.key.as_slice();
                if key < rem {
                    if rem.starts_with(key)
                        && !key.is_empty()
                        && matches!(entry.kind, EntryKind::SubBlock | EntryKind::TermWithSubs)
                    {
                        // proper prefix of the remainder: the target falls
                        // inside this sub-tree
                        action = Some((i, true));
                        break;
                    }
                    continue;
                }
                // key >= rem: first candidate
                action = Some((i, false));
                break;
            }

            match action {
                None => {
                    // every key below the remainder: the answer follows this
                    // block in the parent
                    let frame = self.stack.last_mut().expect("frame present");
                    frame.idx = frame.entries.len() as isize;
                    return if self.next()? {
                        Ok(SeekResult::NotFound)
                    } else {
                        Ok(SeekResult::End)
                    };
                }
                Some((i, true)) => {
                    let frame = self.stack.last_mut().expect("frame present");
                    frame.idx = i as isize;
                    let entry = frame.entries[i].clone();
                    self.term.truncate(prefix_len);
                    self.term.extend_from_slice(&entry.key);
                    let child_prefix = self.term.len();
                    self.push_child(entry.child.expect("sub child"), child_prefix)?;
                }
                Some((i, false)) => {
                    let frame = self.stack.last_mut().expect("frame present");
                    let entry = frame.entries[i].clone();
                    let key = entry.key.as_slice();
                    if key == rem {
                        match entry.kind {
                            EntryKind::LeafTerm | EntryKind::TermWithSubs => {
                                frame.idx = i as isize;
                                self.term.truncate(prefix_len);
                                self.term.extend_from_slice(key);
                                self.meta = entry.meta;
                                if entry.kind == EntryKind::TermWithSubs {
                                    self.pending_child = Some((
                                        entry.child.expect("term with subs child"),
                                        self.term.len(),
                                    ));
                                }
                                return Ok(SeekResult::Found);
                            }
                            EntryKind::SubBlock => {
                                // the exact term does not exist; the subtree
                                // minimum is the next term
                                frame.idx = i as isize - 1;
                                return if self.next()? {
                                    Ok(SeekResult::NotFound)
                                } else {
                                    Ok(SeekResult::End)
                                };
                            }
                        }
                    } else {
                        // key > rem: position just before and step once
                        frame.idx = i as isize - 1;
                        return if self.next()? {
                            Ok(SeekResult::NotFound)
                        } else {
                            Ok(SeekResult::End)
                        };
                    }
                }
            }
        }
    }

    /// Exact lookup; positions the iterator on success.
    pub fn seek_exact(&mut self, target: &[u8]) -> Result<bool> {
        Ok(matches!(self.seek_ge(target)?, SeekResult::Found))
    }
}

/// Terms accepted by an automaton, in byte order.
///
/// Sub-blocks whose common prefix drives the automaton into a dead state
/// are pruned without decoding.
pub struct IntersectIterator<'a, A: Automaton> {
    dict: &'a TermDict,
    field: &'a FieldTerms,
    automaton: A,
    stack: Vec<Frame>,
    term: Vec<u8>,
    meta: Option<TermMeta>,
    pending_child: Option<(u64, usize, u32)>,
    exhausted: bool,
    started: bool,
}

impl<'a, A: Automaton> IntersectIterator<'a, A> {
    fn new(dict: &'a TermDict, field: &'a FieldTerms, automaton: A) -> Self {
        Self {
            dict,
            field,
            exhausted: field.terms_count == 0,
            automaton,
            stack: Vec::new(),
            term: Vec::new(),
            meta: None,
            pending_child: None,
            started: false,
        }
    }

    pub fn term(&self) -> &[u8] {
        &self.term
    }

    pub fn meta(&self) -> Option<TermMeta> {
        self.meta
    }

    fn step_bytes(&self, mut state: u32, bytes: &[u8]) -> Option<u32> {
        for &b in bytes {
            state = self.automaton.accept(state, b)?;
        }
        Some(state)
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if !self.started {
            self.started = true;
            let entries = read_block(&self.dict.tm, self.field.root_offset)?;
            self.stack.push(Frame {
                entries,
                idx: -1,
                prefix_len: 0,
                state: self.automaton.start(),
            });
        }
        if let Some((child, prefix_len, state)) = self.pending_child.take() {
            let entries = read_block(&self.dict.tm, child)?;
            self.stack.push(Frame {
                entries,
                idx: -1,
                prefix_len,
                state,
            });
        }
        loop {
            let Some(frame) = self.stack.last_mut() else {
                self.exhausted = true;
                self.meta = None;
                return Ok(false);
            };
            frame.idx += 1;
            if frame.idx as usize >= frame.entries.len() {
                self.stack.pop();
                continue;
            }
            let prefix_len = frame.prefix_len;
            let base_state = frame.state;
            let entry = frame.entries[frame.idx as usize].clone();
            let Some(state) = self.step_bytes(base_state, &entry.key) else {
                continue; // dead: prune term or whole sub-block
            };
            self.term.truncate(prefix_len);
            self.term.extend_from_slice(&entry.key);
            match entry.kind {
                EntryKind::LeafTerm => {
                    if self.automaton.is_match(state) {
                        self.meta = entry.meta;
                        return Ok(true);
                    }
                }
                EntryKind::SubBlock => {
                    let entries = read_block(&self.dict.tm, entry.child.expect("child"))?;
                    let child_prefix = self.term.len();
                    self.stack.push(Frame {
                        entries,
                        idx: -1,
                        prefix_len: child_prefix,
                        state,
                    });
                }
                EntryKind::TermWithSubs => {
                    self.pending_child =
                        Some((entry.child.expect("child"), self.term.len(), state));
                    if self.automaton.is_match(state) {
                        self.meta = entry.meta;
                        return Ok(true);
                    }
                }
            }
        }
    }
}
