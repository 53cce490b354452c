//! Segment consolidation: combine several segment readers into one
//! replacement segment, dropping masked documents.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::Arc;

use tessera_core::bitset::DocBitSet;
use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator, Error, IndexFeatures, Result};
use tessera_directory::{format_utils, Cipher, Directory, IndexOutput};
use tessera_formats::columnstore::{ColumnHint, ColumnOpts, ColumnstoreWriter};
use tessera_formats::doc_mask::DocMask;
use tessera_formats::field_meta::{write_fields, FeatureKind, FieldMeta};
use tessera_formats::postings::PostingsWriter;
use tessera_formats::term_dict::TermDictWriter;

use crate::meta::SegmentMeta;
use crate::segment_reader::SegmentReader;
use crate::sort_column::{write_sort_column, SortColumnReader};
use crate::{extensions, segment_file, SortSpec};

/// Old-to-new document mapping for one merge input; `EOF` marks masked
/// documents. Index `old - 1` holds the mapping of `old`.
pub type DocMap = Vec<DocId>;

/// Output of a successful merge.
pub struct MergeResult {
    pub meta: SegmentMeta,
    /// One map per input, in input order.
    pub doc_maps: Vec<DocMap>,
}

/// Heap element of the sorted-merge ordering: one input's current sort
/// key. Ordered by `(comparator(key), input, doc)` so ties stay
/// deterministic; wrapped in [`Reverse`] to turn the max-heap around.
struct SortedLeg<'a> {
    key: Vec<u8>,
    input: usize,
    doc: DocId,
    spec: &'a SortSpec,
}

impl Ord for SortedLeg<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.spec.comparator)(&self.key, &other.key)
            .then(self.input.cmp(&other.input))
            .then(self.doc.cmp(&other.doc))
    }
}

impl PartialOrd for SortedLeg<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortedLeg<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortedLeg<'_> {}

/// Advance a sort column to its next unmasked document.
fn next_live_key(
    column: &mut SortColumnReader,
    mask: &DocMask,
) -> Result<Option<(DocId, Vec<u8>)>> {
    while let Some(doc) = column.next()? {
        if !mask.contains(&doc) {
            return Ok(Some((doc, column.value().to_vec())));
        }
    }
    Ok(None)
}

/// Combines input segments into the output segment `name`.
pub struct MergeWriter {
    readers: Vec<Arc<SegmentReader>>,
    sort: Option<Arc<SortSpec>>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl MergeWriter {
    pub fn new(
        readers: Vec<Arc<SegmentReader>>,
        sort: Option<Arc<SortSpec>>,
        cipher: Option<Arc<dyn Cipher>>,
    ) -> Self {
        Self {
            readers,
            sort,
            cipher,
        }
    }

    /// Run the merge. `progress` is polled between units of work; returning
    /// `false` aborts the merge and the output is discarded (`Ok(None)`).
    pub fn merge(
        &self,
        dir: &dyn Directory,
        name: &str,
        mut progress: Option<&mut dyn FnMut() -> bool>,
    ) -> Result<Option<MergeResult>> {
        if self.readers.is_empty() {
            return Err(Error::IllegalArgument("no segments to merge".to_string()));
        }
        let mut check = move || progress.as_mut().map_or(true, |p| p());

        let (doc_maps, total_docs, sort_keys) = self.build_doc_maps()?;
        if !check() {
            return Ok(None);
        }

        // merged field table: union of names; features are the common
        // denominator of every input carrying the field
        let mut field_names: BTreeSet<String> = BTreeSet::new();
        for reader in &self.readers {
            field_names.extend(reader.field_names().map(str::to_string));
        }
        struct MergedField {
            name: String,
            id: u64,
            features: IndexFeatures,
            norms: bool,
        }
        let mut fields = Vec::with_capacity(field_names.len());
        for (id, name) in field_names.iter().enumerate() {
            let mut features: Option<IndexFeatures> = None;
            let mut norms = true;
            for reader in &self.readers {
                if let Some(meta) = reader.field_meta(name) {
                    features = Some(match features {
                        None => meta.features,
                        Some(f) => IndexFeatures::from_bits(f.bits() & meta.features.bits())
                            .expect("intersection stays valid"),
                    });
                    norms &= meta.feature_column(FeatureKind::Norm).is_some();
                }
            }
            fields.push(MergedField {
                name: name.clone(),
                id: id as u64,
                features: features.unwrap_or(IndexFeatures::NONE),
                norms,
            });
        }

        let needs_pos = fields.iter().any(|f| f.features.position());
        let needs_pay = fields
            .iter()
            .any(|f| f.features.offset() || f.features.payload());

        let mut files = Vec::new();
        let mut doc_out = dir.create(&segment_file(name, extensions::DOCS))?;
        format_utils::write_header(&mut *doc_out, "tessera_postings_docs", 0)?;
        files.push(segment_file(name, extensions::DOCS));
        let mut pos_out = if needs_pos {
            let mut out = dir.create(&segment_file(name, extensions::POSITIONS))?;
            format_utils::write_header(&mut *out, "tessera_postings_positions", 0)?;
            files.push(segment_file(name, extensions::POSITIONS));
            Some(out)
        } else {
            None
        };
        let mut pay_out = if needs_pay {
            let mut out = dir.create(&segment_file(name, extensions::PAYLOADS))?;
            format_utils::write_header(&mut *out, "tessera_postings_payloads", 0)?;
            files.push(segment_file(name, extensions::PAYLOADS));
            Some(out)
        } else {
            None
        };
        let mut dict = TermDictWriter::new(
            dir.create(&segment_file(name, extensions::TERM_META))?,
            dir.create(&segment_file(name, extensions::TERM_INDEX))?,
        )?;
        files.push(segment_file(name, extensions::TERM_META));
        files.push(segment_file(name, extensions::TERM_INDEX));

        let mut columns = ColumnstoreWriter::new(true, self.cipher.clone());
        let mut field_metas = Vec::with_capacity(fields.len());

        for field in &fields {
            if !check() {
                return Ok(None);
            }
            dict.begin_field(field.id, field.features)?;
            let mut writer = PostingsWriter::new(
                field.features,
                doc_out,
                field.features.position().then(|| pos_out.take()).flatten(),
                (field.features.offset() || field.features.payload())
                    .then(|| pay_out.take())
                    .flatten(),
            )?;
            let docs_with_field =
                self.merge_field_terms(field.name.as_str(), field.features, &doc_maps, &mut writer, &mut dict, &mut check)?;
            let (d, p, pay) = writer.into_outputs();
            doc_out = d;
            if p.is_some() {
                pos_out = p;
            }
            if pay.is_some() {
                pay_out = pay;
            }
            let Some(docs_with_field) = docs_with_field else {
                return Ok(None); // aborted mid-field
            };
            dict.end_field(docs_with_field)?;

            let mut field_meta = FieldMeta::new(field.name.clone(), field.id, field.features);
            if field.norms {
                let column = columns.push_column(ColumnOpts::default());
                self.merge_feature_column(&field.name, column, &mut columns, &doc_maps)?;
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

        // named columns, by name
        let mut column_names: BTreeSet<String> = BTreeSet::new();
        for reader in &self.readers {
            if let Some(cs) = reader.columns() {
                for slot in 0..cs.columns_count() {
                    // ids are ordinals; enumerate via the id map
                    if let Some(column) = cs.column(slot as u64) {
                        if let Some(name) = column.name() {
                            column_names.insert(name.to_string());
                        }
                    }
                }
            }
        }
        for column_name in &column_names {
            if !check() {
                return Ok(None);
            }
            let id = columns.push_column(ColumnOpts {
                name: Some(column_name.clone()),
                ..ColumnOpts::default()
            });
            let mut values = Vec::new();
            for (input, reader) in self.readers.iter().enumerate() {
                let Some(mut it) = reader.column_by_name(column_name, ColumnHint::CONSOLIDATION)?
                else {
                    continue;
                };
                while it.next()? {
                    let new_doc = doc_maps[input][(it.value() - doc_limits::MIN) as usize];
                    if doc_limits::eof(new_doc) {
                        continue;
                    }
                    values.push((new_doc, it.payload()?.to_vec()));
                }
            }
            values.sort_unstable_by_key(|&(doc, _)| doc);
            let writer = columns.column_mut(id)?;
            for (doc, payload) in values {
                writer.prepare(doc)?;
                writer.write_bytes(&payload)?;
            }
        }

        let mut fm_out = dir.create(&segment_file(name, extensions::FIELD_META))?;
        let mut f2_out = dir.create(&segment_file(name, extensions::FIELD_FEATURES))?;
        write_fields(&mut *fm_out, &mut *f2_out, &field_metas)?;
        fm_out.close()?;
        f2_out.close()?;
        files.push(segment_file(name, extensions::FIELD_META));
        files.push(segment_file(name, extensions::FIELD_FEATURES));

        let column_store = !columns.is_empty();
        let mut sort_column_id = None;
        if column_store {
            let columns_count = columns.columns_count() as u64;
            let mut cs_out = dir.create(&segment_file(name, extensions::COLUMNSTORE_DATA))?;
            let mut csi_out = dir.create(&segment_file(name, extensions::COLUMNSTORE_INDEX))?;
            columns.finish(&mut cs_out, &mut csi_out, total_docs)?;
            cs_out.close()?;
            csi_out.close()?;
            files.push(segment_file(name, extensions::COLUMNSTORE_DATA));
            files.push(segment_file(name, extensions::COLUMNSTORE_INDEX));
            if self.sort.is_some() {
                sort_column_id = Some(columns_count);
            }
        } else if self.sort.is_some() {
            sort_column_id = Some(0);
        }

        if let Some(keys) = sort_keys {
            let mut out = dir.create(&segment_file(name, extensions::SORT_COLUMN))?;
            write_sort_column(&mut *out, keys.iter().map(|k| k.as_slice()))?;
            out.close()?;
            files.push(segment_file(name, extensions::SORT_COLUMN));
        }

        let mut meta = SegmentMeta::new(name);
        meta.docs_count = total_docs;
        meta.live_docs_count = total_docs;
        meta.column_store = column_store;
        meta.sort_column = sort_column_id;
        meta.byte_size = files.iter().map(|f| dir.length(f).unwrap_or(0)).sum();
        meta.files = files;
        Ok(Some(MergeResult { meta, doc_maps }))
    }

    /// Build per-input doc maps; returns the total output count and, for
    /// sorted merges, the output sort keys in new-document order.
    #[allow(clippy::type_complexity)]
    fn build_doc_maps(&self) -> Result<(Vec<DocMap>, u32, Option<Vec<Vec<u8>>>)> {
        match &self.sort {
            None => {
                let mut maps = Vec::with_capacity(self.readers.len());
                let mut next = doc_limits::MIN;
                for reader in &self.readers {
                    let mask = reader.mask();
                    let mut map = Vec::with_capacity(reader.docs_count() as usize);
                    for old in doc_limits::MIN..=reader.docs_count() {
                        if mask.contains(&old) {
                            map.push(doc_limits::EOF);
                        } else {
                            map.push(next);
                            next += 1;
                        }
                    }
                    maps.push(map);
                }
                Ok((maps, next - doc_limits::MIN, None))
            }
            Some(sort) => {
                // every input must expose the sort column; their key
                // streams merge through a min-heap, popping in comparator
                // order
                let mut columns = Vec::with_capacity(self.readers.len());
                let mut heap: BinaryHeap<Reverse<SortedLeg<'_>>> = BinaryHeap::new();
                for (input, reader) in self.readers.iter().enumerate() {
                    let mut column = reader.sort_column()?.ok_or_else(|| {
                        Error::IllegalState(format!(
                            "segment {} lacks the sort column required for a sorted merge",
                            reader.meta().name
                        ))
                    })?;
                    if let Some((doc, key)) = next_live_key(&mut column, reader.mask())? {
                        heap.push(Reverse(SortedLeg {
                            key,
                            input,
                            doc,
                            spec: sort.as_ref(),
                        }));
                    }
                    columns.push(column);
                }
                let mut maps: Vec<DocMap> = self
                    .readers
                    .iter()
                    .map(|r| vec![doc_limits::EOF; r.docs_count() as usize])
                    .collect();
                let mut keys_out = Vec::new();
                while let Some(Reverse(leg)) = heap.pop() {
                    maps[leg.input][(leg.doc - doc_limits::MIN) as usize] =
                        doc_limits::MIN + keys_out.len() as u32;
                    keys_out.push(leg.key);
                    let mask = self.readers[leg.input].mask();
                    if let Some((doc, key)) = next_live_key(&mut columns[leg.input], mask)? {
                        heap.push(Reverse(SortedLeg {
                            key,
                            input: leg.input,
                            doc,
                            spec: sort.as_ref(),
                        }));
                    }
                }
                let total = keys_out.len() as u32;
                Ok((maps, total, Some(keys_out)))
            }
        }
    }

    /// Merge one field's terms; returns the merged docs-with-field count,
    /// or `None` when the progress callback aborted.
    fn merge_field_terms(
        &self,
        field_name: &str,
        features: IndexFeatures,
        doc_maps: &[DocMap],
        writer: &mut PostingsWriter<Box<dyn IndexOutput>>,
        dict: &mut TermDictWriter<Box<dyn IndexOutput>>,
        check: &mut dyn FnMut() -> bool,
    ) -> Result<Option<u32>> {
        struct Leg<'r> {
            input: usize,
            field: crate::segment_reader::FieldReader<'r>,
            terms: tessera_formats::term_dict::TermIterator<'r>,
        }
        let mut legs = Vec::new();
        // min-heap over each leg's current term; equal terms group by
        // repeated pops
        let mut heap: BinaryHeap<Reverse<(Vec<u8>, usize)>> = BinaryHeap::new();
        for (input, reader) in self.readers.iter().enumerate() {
            if let Some(field) = reader.field(field_name) {
                let mut terms = field.iterator()?;
                if terms.next()? {
                    heap.push(Reverse((terms.term().to_vec(), legs.len())));
                }
                legs.push(Leg {
                    input,
                    field,
                    terms,
                });
            }
        }

        let mut docs_with_field = DocBitSet::default();
        while let Some(Reverse((min_term, first))) = heap.pop() {
            if !check() {
                return Ok(None);
            }
            let mut group = vec![first];
            while heap
                .peek()
                .map_or(false, |entry| (entry.0).0 == min_term)
            {
                let Reverse((_, leg_idx)) = heap.pop().expect("peeked an equal term");
                group.push(leg_idx);
            }

            // gather remapped postings from every leg at the minimum term
            let mut merged: Vec<(DocId, u32, Vec<(u32, Option<(u32, u32)>, Vec<u8>)>)> =
                Vec::new();
            for &leg_idx in &group {
                let leg = &mut legs[leg_idx];
                let cookie = leg
                    .terms
                    .meta()
                    .ok_or_else(|| Error::Index("term without metadata".to_string()))?;
                let mut postings = leg.field.postings(cookie, features)?;
                while postings.next() {
                    let new_doc =
                        doc_maps[leg.input][(postings.value() - doc_limits::MIN) as usize];
                    if doc_limits::eof(new_doc) {
                        continue;
                    }
                    let freq = postings.freq();
                    let mut positions = Vec::new();
                    if features.position() {
                        let reader = postings.positions()?;
                        while reader.remaining() > 0 {
                            reader.next()?;
                            positions.push((
                                reader.pos(),
                                reader.offsets(),
                                reader.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                            ));
                        }
                    }
                    merged.push((new_doc, freq, positions));
                }
                if leg.terms.next()? {
                    heap.push(Reverse((leg.terms.term().to_vec(), leg_idx)));
                }
            }
            if merged.is_empty() {
                continue; // every posting was masked
            }
            merged.sort_unstable_by_key(|&(doc, _, _)| doc);
            writer.begin_term(Some(merged.len() as u64))?;
            for (doc, freq, positions) in &merged {
                docs_with_field.set(*doc);
                writer.write_doc(*doc, *freq)?;
                for (pos, offsets, payload) in positions {
                    writer.write_position(
                        *pos,
                        features.offset().then(|| offsets.unwrap_or((0, 0))),
                        features.payload().then_some(payload.as_slice()),
                    )?;
                }
            }
            let meta = writer.end_term()?;
            dict.push_term(&min_term, meta)?;
        }
        Ok(Some(docs_with_field.len() as u32))
    }

    /// Merge a per-field feature column (norms) into `target`.
    fn merge_feature_column(
        &self,
        field_name: &str,
        target: u64,
        columns: &mut ColumnstoreWriter,
        doc_maps: &[DocMap],
    ) -> Result<()> {
        let mut values = Vec::new();
        for (input, reader) in self.readers.iter().enumerate() {
            let Some(mut it) = reader.norms(field_name)? else {
                continue;
            };
            while it.next()? {
                let new_doc = doc_maps[input][(it.value() - doc_limits::MIN) as usize];
                if doc_limits::eof(new_doc) {
                    continue;
                }
                values.push((new_doc, it.payload()?.to_vec()));
            }
        }
        values.sort_unstable_by_key(|&(doc, _)| doc);
        let writer = columns.column_mut(target)?;
        for (doc, payload) in values {
            writer.prepare(doc)?;
            writer.write_bytes(&payload)?;
        }
        Ok(())
    }
}
