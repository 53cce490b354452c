//! In-memory segment construction.
//!
//! The writer keeps per-field inverted lists, the columnstore buffers, and
//! (for sorted indices) per-document sort keys. Documents are appended one
//! at a time; a failed document is masked and the writer stays usable.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tessera_core::types::doc_limits;
use tessera_core::{DocId, Error, FieldId, IndexFeatures, Result};
use tessera_directory::{format_utils, Cipher, Directory, IndexOutput};
use tessera_formats::columnstore::{ColumnOpts, ColumnstoreWriter};
use tessera_formats::doc_mask::{write_doc_mask, DocMask};
use tessera_formats::field_meta::{write_fields, FeatureKind, FieldMeta};
use tessera_formats::postings::PostingsWriter;
use tessera_formats::term_dict::TermDictWriter;

use crate::meta::SegmentMeta;
use crate::sort_column::write_sort_column;
use crate::token::TokenStream;
use crate::{extensions, segment_file, versioned_file, SortSpec};

/// Per-field indexing options, fixed at the field's first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOpts {
    pub features: IndexFeatures,
    /// Store field-length norms as a feature column.
    pub norms: bool,
}

impl FieldOpts {
    /// Document-only postings.
    pub fn docs_only() -> Self {
        Self {
            features: IndexFeatures::NONE,
            norms: false,
        }
    }

    /// Frequencies and positions; the usual text configuration.
    pub fn text() -> Self {
        Self {
            features: IndexFeatures::FREQ | IndexFeatures::POS,
            norms: false,
        }
    }

    pub fn with_features(features: IndexFeatures) -> Self {
        Self {
            features,
            norms: false,
        }
    }

    pub fn with_norms(mut self) -> Self {
        self.norms = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct PosEntry {
    pos: u32,
    start: u32,
    end: u32,
    payload: SmallVec<[u8; 8]>,
}

#[derive(Debug, Default)]
struct TermPostings {
    docs: Vec<DocId>,
    freqs: Vec<u32>,
    /// Flat position entries; per-document runs are delimited by `freqs`.
    positions: Vec<PosEntry>,
}

struct FieldData {
    id: FieldId,
    features: IndexFeatures,
    norms: bool,
    norm_column: Option<u64>,
    terms: BTreeMap<Vec<u8>, TermPostings>,
    docs_with_field: u32,
    // per-document scratch
    cur_doc: DocId,
    cur_pos: u32,
    cur_tokens: u32,
}

/// Builds one segment in memory and seals it on [`SegmentWriter::flush`].
pub struct SegmentWriter {
    cipher: Option<Arc<dyn Cipher>>,
    sort: Option<Arc<SortSpec>>,
    fields: FxHashMap<String, FieldData>,
    next_field_id: FieldId,
    columns: ColumnstoreWriter,
    stored_columns: FxHashMap<String, u64>,
    /// Next id to allocate; documents are `1..next_doc`.
    next_doc: DocId,
    doc_open: bool,
    masked: DocMask,
    /// Sort key per allocated document (`doc - 1` indexed).
    sort_values: Vec<Vec<u8>>,
    memory: usize,
}

impl SegmentWriter {
    pub fn new(cipher: Option<Arc<dyn Cipher>>, sort: Option<Arc<SortSpec>>) -> Self {
        Self {
            columns: ColumnstoreWriter::new(false, cipher.clone()),
            cipher,
            sort,
            fields: FxHashMap::default(),
            next_field_id: 0,
            stored_columns: FxHashMap::default(),
            next_doc: doc_limits::MIN,
            doc_open: false,
            masked: DocMask::new(),
            sort_values: Vec::new(),
            memory: 0,
        }
    }

    /// Documents appended so far, masked ones included.
    pub fn docs_count(&self) -> u32 {
        self.next_doc - doc_limits::MIN
    }

    pub fn live_docs_count(&self) -> u32 {
        self.docs_count() - self.masked.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.docs_count() == 0
    }

    /// Approximate heap footprint of buffered postings and columns.
    pub fn memory_used(&self) -> usize {
        self.memory + self.columns.memory_used()
    }

    /// Allocate the next document id.
    pub fn begin(&mut self) -> Result<DocId> {
        if self.doc_open {
            return Err(Error::IllegalState("document already open".to_string()));
        }
        if self.next_doc == doc_limits::EOF {
            return Err(Error::IllegalState("segment document space exhausted".to_string()));
        }
        self.doc_open = true;
        self.sort_values.push(Vec::new());
        let doc = self.next_doc;
        self.next_doc += 1;
        Ok(doc)
    }

    fn current_doc(&self) -> DocId {
        self.next_doc - 1
    }

    /// Tokenize `stream` into the named field of the open document.
    pub fn index(
        &mut self,
        name: &str,
        opts: FieldOpts,
        stream: &mut dyn TokenStream,
    ) -> Result<()> {
        if !self.doc_open {
            return Err(Error::IllegalState("no document open".to_string()));
        }
        let doc = self.current_doc();
        opts.features.check()?;
        if !self.fields.contains_key(name) {
            let id = self.next_field_id;
            self.next_field_id += 1;
            let norm_column = opts.norms.then(|| {
                self.columns.push_column(ColumnOpts::default())
            });
            self.fields.insert(
                name.to_string(),
                FieldData {
                    id,
                    features: opts.features,
                    norms: opts.norms,
                    norm_column,
                    terms: BTreeMap::new(),
                    docs_with_field: 0,
                    cur_doc: doc_limits::INVALID,
                    cur_pos: 0,
                    cur_tokens: 0,
                },
            );
            self.memory += name.len() + 64;
        }
        let memory = &mut self.memory;
        let field = self.fields.get_mut(name).expect("just inserted");
        if field.features != opts.features || field.norms != opts.norms {
            return Err(Error::IllegalArgument(format!(
                "field '{name}' redeclared with different options"
            )));
        }
        if field.cur_doc != doc {
            field.cur_doc = doc;
            field.cur_pos = 0;
            field.cur_tokens = 0;
            field.docs_with_field += 1;
        }

        let with_pos = field.features.position();
        let with_offs = field.features.offset();
        let with_pay = field.features.payload();
        while stream.advance()? {
            let token = stream.token();
            field.cur_tokens += 1;
            field.cur_pos += token.position_increment.max(1);
            let term_len = token.term.len();
            let entry = field.terms.entry(token.term.clone()).or_insert_with(|| {
                *memory += term_len + 48;
                TermPostings::default()
            });
            if entry.docs.last() == Some(&doc) {
                *entry.freqs.last_mut().expect("freqs parallel to docs") += 1;
            } else {
                entry.docs.push(doc);
                entry.freqs.push(1);
                *memory += 8;
            }
            if with_pos {
                if with_offs && token.offsets.is_none() {
                    return Err(Error::IllegalArgument(format!(
                        "field '{name}' indexes offsets but the analyzer provides none"
                    )));
                }
                let (start, end) = token.offsets.unwrap_or((0, 0));
                let payload: SmallVec<[u8; 8]> = if with_pay {
                    token.payload.clone().unwrap_or_default().into()
                } else {
                    SmallVec::new()
                };
                *memory += 16 + payload.len();
                entry.positions.push(PosEntry {
                    pos: field.cur_pos,
                    start,
                    end,
                    payload,
                });
            }
        }
        Ok(())
    }

    /// Store `payload` into the named column for the open document.
    pub fn store(&mut self, name: &str, payload: &[u8]) -> Result<()> {
        if !self.doc_open {
            return Err(Error::IllegalState("no document open".to_string()));
        }
        let doc = self.current_doc();
        let id = match self.stored_columns.get(name) {
            Some(&id) => id,
            None => {
                let id = self.columns.push_column(ColumnOpts {
                    name: Some(name.to_string()),
                    ..ColumnOpts::default()
                });
                self.stored_columns.insert(name.to_string(), id);
                id
            }
        };
        let column = self.columns.column_mut(id)?;
        column.prepare(doc)?;
        column.write_bytes(payload)
    }

    /// Record the open document's sort key; required for every document of
    /// a sorted index.
    pub fn store_sorted(&mut self, payload: &[u8]) -> Result<()> {
        if !self.doc_open {
            return Err(Error::IllegalState("no document open".to_string()));
        }
        if self.sort.is_none() {
            return Err(Error::IllegalState(
                "index is not sorted; no sort column exists".to_string(),
            ));
        }
        let slot = self
            .sort_values
            .last_mut()
            .expect("slot allocated by begin");
        slot.clear();
        slot.extend_from_slice(payload);
        Ok(())
    }

    /// Seal the open document, writing its feature columns.
    pub fn commit_doc(&mut self) -> Result<()> {
        if !self.doc_open {
            return Err(Error::IllegalState("no document open".to_string()));
        }
        let doc = self.current_doc();
        if self.sort.is_some()
            && self.sort_values.last().map_or(true, |v| v.is_empty())
        {
            self.rollback_doc();
            return Err(Error::IllegalState(
                "sorted index requires a sort key for every document".to_string(),
            ));
        }
        // norms for every field this document touched
        let mut norm_writes: SmallVec<[(u64, f32); 8]> = SmallVec::new();
        for field in self.fields.values() {
            if field.norms && field.cur_doc == doc && field.cur_tokens > 0 {
                let norm = 1.0 / (field.cur_tokens as f32).sqrt();
                norm_writes.push((field.norm_column.expect("norms have a column"), norm));
            }
        }
        for (column, norm) in norm_writes {
            let column = self.columns.column_mut(column)?;
            column.prepare(doc)?;
            column.write_bytes(&norm.to_le_bytes())?;
        }
        self.doc_open = false;
        Ok(())
    }

    /// Mask the open document and keep the writer usable.
    pub fn rollback_doc(&mut self) {
        if self.doc_open {
            self.doc_open = false;
            self.masked.insert(self.current_doc());
        }
    }

    /// Mask an already committed document of this in-memory segment.
    pub fn mask(&mut self, doc: DocId) {
        if doc_limits::valid(doc) && doc < self.next_doc {
            self.masked.insert(doc);
        }
    }

    pub fn masked(&self) -> &DocMask {
        &self.masked
    }

    /// Discard all buffered state; the writer can be reused.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.next_field_id = 0;
        self.columns = ColumnstoreWriter::new(false, self.cipher.clone());
        self.stored_columns.clear();
        self.next_doc = doc_limits::MIN;
        self.doc_open = false;
        self.masked.clear();
        self.sort_values.clear();
        self.memory = 0;
    }

    /// Serialize everything into the segment named by `meta`.
    ///
    /// On success `meta` describes the sealed segment and the returned map
    /// (sorted indices only) renumbers pre-flush ids to their on-disk
    /// order. The writer still holds its buffers and must be `reset`
    /// before reuse.
    pub fn flush(
        &mut self,
        dir: &dyn Directory,
        meta: &mut SegmentMeta,
    ) -> Result<Option<Vec<DocId>>> {
        if self.doc_open {
            return Err(Error::IllegalState("document still open".to_string()));
        }
        if self.is_empty() {
            return Err(Error::IllegalState("flushing an empty segment".to_string()));
        }
        let total = self.docs_count();
        let name = meta.name.clone();

        // sorted index: permute documents by their sort key
        let doc_map: Option<Vec<DocId>> = self.sort.as_ref().map(|sort| {
            let mut order: Vec<DocId> = (doc_limits::MIN..self.next_doc).collect();
            let values = &self.sort_values;
            order.sort_by(|&a, &b| {
                (sort.comparator)(
                    &values[(a - doc_limits::MIN) as usize],
                    &values[(b - doc_limits::MIN) as usize],
                )
                .then(a.cmp(&b))
            });
            let mut map = vec![doc_limits::INVALID; total as usize];
            for (new_idx, &old) in order.iter().enumerate() {
                map[(old - doc_limits::MIN) as usize] = doc_limits::MIN + new_idx as u32;
            }
            map
        });
        let remap = |doc: DocId| -> DocId {
            match &doc_map {
                Some(map) => map[(doc - doc_limits::MIN) as usize],
                None => doc,
            }
        };
        if doc_map.is_some() {
            self.columns.remap(&remap);
            let remapped: DocMask = self.masked.iter().map(|&d| remap(d)).collect();
            self.masked = remapped;
        }

        let mut files = Vec::new();

        // postings streams
        let needs_pos = self.fields.values().any(|f| f.features.position());
        let needs_pay = self
            .fields
            .values()
            .any(|f| f.features.offset() || f.features.payload());
        let mut doc_out = dir.create(&segment_file(&name, extensions::DOCS))?;
        format_utils::write_header(&mut *doc_out, "tessera_postings_docs", 0)?;
        files.push(segment_file(&name, extensions::DOCS));
        let mut pos_out = if needs_pos {
            let mut out = dir.create(&segment_file(&name, extensions::POSITIONS))?;
            format_utils::write_header(&mut *out, "tessera_postings_positions", 0)?;
            files.push(segment_file(&name, extensions::POSITIONS));
            Some(out)
        } else {
            None
        };
        let mut pay_out = if needs_pay {
            let mut out = dir.create(&segment_file(&name, extensions::PAYLOADS))?;
            format_utils::write_header(&mut *out, "tessera_postings_payloads", 0)?;
            files.push(segment_file(&name, extensions::PAYLOADS));
            Some(out)
        } else {
            None
        };

        let mut dict = TermDictWriter::new(
            dir.create(&segment_file(&name, extensions::TERM_META))?,
            dir.create(&segment_file(&name, extensions::TERM_INDEX))?,
        )?;
        files.push(segment_file(&name, extensions::TERM_META));
        files.push(segment_file(&name, extensions::TERM_INDEX));

        let mut fields: Vec<(&String, &FieldData)> = self.fields.iter().collect();
        fields.sort_by_key(|(_, f)| f.id);
        let mut field_metas = Vec::with_capacity(fields.len());
        for (field_name, field) in fields {
            dict.begin_field(field.id, field.features)?;
            let mut writer = PostingsWriter::new(
                field.features,
                doc_out,
                if field.features.position() {
                    pos_out.take()
                } else {
                    None
                },
                if field.features.offset() || field.features.payload() {
                    pay_out.take()
                } else {
                    None
                },
            )?;
            for (term, postings) in &field.terms {
                writer.begin_term(Some(postings.docs.len() as u64))?;
                write_term_postings(&mut writer, field.features, postings, &remap)?;
                let term_meta = writer.end_term()?;
                dict.push_term(term, term_meta)?;
            }
            let (d, p, pay) = writer.into_outputs();
            doc_out = d;
            if p.is_some() {
                pos_out = p;
            }
            if pay.is_some() {
                pay_out = pay;
            }
            dict.end_field(field.docs_with_field)?;

            let mut field_meta = FieldMeta::new(field_name.clone(), field.id, field.features);
            if let Some(column) = field.norm_column {
                field_meta.feature_map.push((FeatureKind::Norm, column));
            }
            field_metas.push(field_meta);
        }

        format_utils::write_footer(&mut *doc_out)?;
        doc_out.close()?;
        if let Some(mut out) = pos_out {
            format_utils::write_footer(&mut *out)?;
            out.close()?;
        }
        if let Some(mut out) = pay_out {
            format_utils::write_footer(&mut *out)?;
            out.close()?;
        }
        let (mut tm_out, mut ti_out) = dict.finish()?;
        tm_out.close()?;
        ti_out.close()?;

        // field metadata
        let mut fm_out = dir.create(&segment_file(&name, extensions::FIELD_META))?;
        let mut f2_out = dir.create(&segment_file(&name, extensions::FIELD_FEATURES))?;
        write_fields(&mut *fm_out, &mut *f2_out, &field_metas)?;
        fm_out.close()?;
        f2_out.close()?;
        files.push(segment_file(&name, extensions::FIELD_META));
        files.push(segment_file(&name, extensions::FIELD_FEATURES));

        // columnstore
        let column_store = !self.columns.is_empty();
        let mut sort_column_id = None;
        if column_store {
            let columns = std::mem::replace(
                &mut self.columns,
                ColumnstoreWriter::new(false, self.cipher.clone()),
            );
            let columns_count = columns.columns_count() as u64;
            let mut cs_out = dir.create(&segment_file(&name, extensions::COLUMNSTORE_DATA))?;
            let mut csi_out = dir.create(&segment_file(&name, extensions::COLUMNSTORE_INDEX))?;
            columns.finish(&mut cs_out, &mut csi_out, total)?;
            cs_out.close()?;
            csi_out.close()?;
            files.push(segment_file(&name, extensions::COLUMNSTORE_DATA));
            files.push(segment_file(&name, extensions::COLUMNSTORE_INDEX));
            if self.sort.is_some() {
                sort_column_id = Some(columns_count);
            }
        } else if self.sort.is_some() {
            sort_column_id = Some(0);
        }

        // sort column, in the permuted document order
        if self.sort.is_some() {
            let mut values: Vec<(DocId, &[u8])> = self
                .sort_values
                .iter()
                .enumerate()
                .map(|(i, v)| (remap(doc_limits::MIN + i as u32), v.as_slice()))
                .collect();
            values.sort_unstable_by_key(|&(doc, _)| doc);
            let mut out = dir.create(&segment_file(&name, extensions::SORT_COLUMN))?;
            write_sort_column(&mut *out, values.iter().map(|&(_, v)| v))?;
            out.close()?;
            files.push(segment_file(&name, extensions::SORT_COLUMN));
        }

        // mask
        meta.version = 0;
        if !self.masked.is_empty() {
            meta.version = 1;
            let mask_file = versioned_file(&name, meta.version, extensions::DOC_MASK);
            let mut out = dir.create(&mask_file)?;
            write_doc_mask(&mut *out, &self.masked)?;
            out.close()?;
            files.push(mask_file);
        }

        meta.docs_count = total;
        meta.live_docs_count = total - self.masked.len() as u32;
        meta.column_store = column_store;
        meta.sort_column = sort_column_id;
        meta.byte_size = files
            .iter()
            .map(|f| dir.length(f).unwrap_or(0))
            .sum();
        meta.files = files;
        Ok(doc_map)
    }
}

fn write_term_postings<O: IndexOutput>(
    writer: &mut PostingsWriter<O>,
    features: IndexFeatures,
    postings: &TermPostings,
    remap: &dyn Fn(DocId) -> DocId,
) -> Result<()> {
    let with_pos = features.position();
    // postings per document, renumbered; flat positions are sliced by freq
    let mut pos_cursor = 0usize;
    let mut per_doc: Vec<(DocId, u32, usize)> = Vec::with_capacity(postings.docs.len());
    for (i, &doc) in postings.docs.iter().enumerate() {
        let freq = postings.freqs[i];
        per_doc.push((remap(doc), freq, pos_cursor));
        if with_pos {
            pos_cursor += freq as usize;
        }
    }
    per_doc.sort_unstable_by_key(|&(doc, _, _)| doc);
    for (doc, freq, pos_start) in per_doc {
        writer.write_doc(doc, freq)?;
        if with_pos {
            for entry in &postings.positions[pos_start..pos_start + freq as usize] {
                writer.write_position(
                    entry.pos,
                    features.offset().then_some((entry.start, entry.end)),
                    features.payload().then_some(entry.payload.as_slice()),
                )?;
            }
        }
    }
    Ok(())
}

/// User-facing handle over one open document.
///
/// Dropping without [`Document::done`] rolls the document back.
pub struct Document<'a> {
    writer: &'a mut SegmentWriter,
    committed: bool,
}

impl<'a> Document<'a> {
    pub fn new(writer: &'a mut SegmentWriter) -> Result<(Self, DocId)> {
        let doc = writer.begin()?;
        Ok((
            Self {
                writer,
                committed: false,
            },
            doc,
        ))
    }

    pub fn index(
        &mut self,
        name: &str,
        opts: FieldOpts,
        stream: &mut dyn TokenStream,
    ) -> Result<()> {
        self.writer.index(name, opts, stream)
    }

    pub fn store(&mut self, name: &str, payload: &[u8]) -> Result<()> {
        self.writer.store(name, payload)
    }

    pub fn store_sorted(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.store_sorted(payload)
    }

    /// Commit the document.
    pub fn done(mut self) -> Result<()> {
        self.committed = true;
        self.writer.commit_doc()
    }
}

impl Drop for Document<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.writer.rollback_doc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::VecTokenStream;
    use tessera_directory::MemoryDirectory;

    fn add_doc(writer: &mut SegmentWriter, text: &str, stored: Option<&[u8]>) -> DocId {
        let doc = writer.begin().unwrap();
        let mut stream = VecTokenStream::from_text(text);
        writer.index("body", FieldOpts::text(), &mut stream).unwrap();
        if let Some(payload) = stored {
            writer.store("raw", payload).unwrap();
        }
        writer.commit_doc().unwrap();
        doc
    }

    #[test]
    fn test_doc_allocation_and_rollback() {
        let mut writer = SegmentWriter::new(None, None);
        assert_eq!(add_doc(&mut writer, "a b", None), 1);
        let doc = writer.begin().unwrap();
        assert_eq!(doc, 2);
        writer.rollback_doc();
        assert_eq!(add_doc(&mut writer, "c", None), 3);
        assert_eq!(writer.docs_count(), 3);
        assert_eq!(writer.live_docs_count(), 2);
        assert!(writer.masked().contains(&2));
    }

    #[test]
    fn test_flush_produces_expected_files() {
        let dir = MemoryDirectory::new();
        let mut writer = SegmentWriter::new(None, None);
        add_doc(&mut writer, "hello world hello", Some(b"payload"));
        add_doc(&mut writer, "another doc", None);

        let mut meta = SegmentMeta::new("seg_1");
        writer.flush(&dir, &mut meta).unwrap();
        assert_eq!(meta.docs_count, 2);
        assert_eq!(meta.live_docs_count, 2);
        assert!(meta.column_store);
        assert!(meta.byte_size > 0);
        for ext in ["doc", "pos", "ti", "tm", "fm", "f2", "cs", "csi"] {
            assert!(
                meta.files.iter().any(|f| f.ends_with(ext)),
                "missing {ext} in {:?}",
                meta.files
            );
        }
        for file in &meta.files {
            assert!(dir.exists(file).unwrap(), "missing file {file}");
        }
    }

    #[test]
    fn test_masked_doc_recorded_in_mask_file() {
        let dir = MemoryDirectory::new();
        let mut writer = SegmentWriter::new(None, None);
        add_doc(&mut writer, "kept", None);
        let _ = writer.begin().unwrap();
        let mut stream = VecTokenStream::from_text("doomed");
        writer.index("body", FieldOpts::text(), &mut stream).unwrap();
        writer.rollback_doc();

        let mut meta = SegmentMeta::new("seg_1");
        writer.flush(&dir, &mut meta).unwrap();
        assert_eq!(meta.docs_count, 2);
        assert_eq!(meta.live_docs_count, 1);
        assert_eq!(meta.version, 1);
        assert!(meta.mask_file().is_some());
    }

    #[test]
    fn test_field_redeclaration_rejected() {
        let mut writer = SegmentWriter::new(None, None);
        writer.begin().unwrap();
        let mut stream = VecTokenStream::from_text("x");
        writer.index("f", FieldOpts::text(), &mut stream).unwrap();
        let mut stream = VecTokenStream::from_text("y");
        assert!(writer
            .index("f", FieldOpts::docs_only(), &mut stream)
            .is_err());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut writer = SegmentWriter::new(None, None);
        add_doc(&mut writer, "some text", Some(b"v"));
        assert!(writer.memory_used() > 0);
        writer.reset();
        assert!(writer.is_empty());
        assert_eq!(writer.memory_used(), 0);
        assert_eq!(add_doc(&mut writer, "fresh", None), 1);
    }

    #[test]
    fn test_document_guard_rolls_back_on_drop() {
        let mut writer = SegmentWriter::new(None, None);
        {
            let (mut doc, id) = Document::new(&mut writer).unwrap();
            assert_eq!(id, 1);
            let mut stream = VecTokenStream::from_text("oops");
            doc.index("body", FieldOpts::text(), &mut stream).unwrap();
            // dropped without done()
        }
        assert_eq!(writer.docs_count(), 1);
        assert_eq!(writer.live_docs_count(), 0);
    }
}
