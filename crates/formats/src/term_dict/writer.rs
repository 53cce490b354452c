//! Term dictionary serialization.

use tessera_core::{Error, FieldId, IndexFeatures, Result};
use tessera_directory::{format_utils, IndexOutput};

use crate::postings::TermMeta;

use super::{write_term_meta, EntryKind, FORMAT_VERSION, MAX_BLOCK_TERMS, TI_FORMAT, TM_FORMAT};

struct FieldEntry {
    field_id: FieldId,
    features: IndexFeatures,
    terms_count: u64,
    docs_count: u32,
    sum_doc_freq: u64,
    sum_total_freq: u64,
    min_term: Vec<u8>,
    max_term: Vec<u8>,
    root_offset: u64,
}

struct FieldBuilder {
    field_id: FieldId,
    features: IndexFeatures,
    terms: Vec<(Vec<u8>, TermMeta)>,
    sum_doc_freq: u64,
    sum_total_freq: u64,
}

/// Serializes per-field term trees into the `tm`/`ti` outputs.
///
/// Fields must be written in ascending id order; terms within a field in
/// strictly ascending byte order.
pub struct TermDictWriter<O: IndexOutput> {
    tm_out: O,
    ti_out: O,
    fields: Vec<FieldEntry>,
    current: Option<FieldBuilder>,
}

impl<O: IndexOutput> TermDictWriter<O> {
    pub fn new(mut tm_out: O, mut ti_out: O) -> Result<Self> {
        format_utils::write_header(&mut tm_out, TM_FORMAT, FORMAT_VERSION)?;
        format_utils::write_header(&mut ti_out, TI_FORMAT, FORMAT_VERSION)?;
        Ok(Self {
            tm_out,
            ti_out,
            fields: Vec::new(),
            current: None,
        })
    }

    pub fn begin_field(&mut self, field_id: FieldId, features: IndexFeatures) -> Result<()> {
        if self.current.is_some() {
            return Err(Error::IllegalState("field already open".to_string()));
        }
        if let Some(last) = self.fields.last() {
            if field_id <= last.field_id {
                return Err(Error::IllegalArgument(format!(
                    "field {field_id} out of order (last {})",
                    last.field_id
                )));
            }
        }
        self.current = Some(FieldBuilder {
            field_id,
            features,
            terms: Vec::new(),
            sum_doc_freq: 0,
            sum_total_freq: 0,
        });
        Ok(())
    }

    pub fn push_term(&mut self, term: &[u8], meta: TermMeta) -> Result<()> {
        let builder = self
            .current
            .as_mut()
            .ok_or_else(|| Error::IllegalState("no field open".to_string()))?;
        if let Some((last, _)) = builder.terms.last() {
            if term <= last.as_slice() {
                return Err(Error::IllegalArgument(format!(
                    "term {term:?} out of order"
                )));
            }
        }
        builder.sum_doc_freq += u64::from(meta.docs_count);
        builder.sum_total_freq += meta.total_freq;
        builder.terms.push((term.to_vec(), meta));
        Ok(())
    }

    /// Seal the open field. `docs_with_field` is the number of documents in
    /// which the field occurs at all.
    pub fn end_field(&mut self, docs_with_field: u32) -> Result<()> {
        let builder = self
            .current
            .take()
            .ok_or_else(|| Error::IllegalState("no field open".to_string()))?;
        if builder.terms.is_empty() {
            // field indexed but termless; keep the stats entry
            self.fields.push(FieldEntry {
                field_id: builder.field_id,
                features: builder.features,
                terms_count: 0,
                docs_count: docs_with_field,
                sum_doc_freq: 0,
                sum_total_freq: 0,
                min_term: Vec::new(),
                max_term: Vec::new(),
                root_offset: 0,
            });
            return Ok(());
        }
        let root_offset = write_block(&mut self.tm_out, &builder.terms, 0)?;
        self.fields.push(FieldEntry {
            field_id: builder.field_id,
            features: builder.features,
            terms_count: builder.terms.len() as u64,
            docs_count: docs_with_field,
            sum_doc_freq: builder.sum_doc_freq,
            sum_total_freq: builder.sum_total_freq,
            min_term: builder.terms.first().map(|(t, _)| t.clone()).unwrap_or_default(),
            max_term: builder.terms.last().map(|(t, _)| t.clone()).unwrap_or_default(),
            root_offset,
        });
        Ok(())
    }

    /// Write the field table and the footers; returns the outputs.
    pub fn finish(mut self) -> Result<(O, O)> {
        if self.current.is_some() {
            return Err(Error::IllegalState("field still open".to_string()));
        }
        self.ti_out.write_vint(self.fields.len() as u32)?;
        for field in &self.fields {
            self.ti_out.write_vlong(field.field_id)?;
            self.ti_out.write_byte(field.features.bits())?;
            self.ti_out.write_vlong(field.terms_count)?;
            self.ti_out.write_vint(field.docs_count)?;
            self.ti_out.write_vlong(field.sum_doc_freq)?;
            self.ti_out.write_vlong(field.sum_total_freq)?;
            self.ti_out.write_vbytes(&field.min_term)?;
            self.ti_out.write_vbytes(&field.max_term)?;
            self.ti_out.write_vlong(field.root_offset)?;
        }
        format_utils::write_footer(&mut self.tm_out)?;
        format_utils::write_footer(&mut self.ti_out)?;
        Ok((self.tm_out, self.ti_out))
    }
}

/// Longest common prefix of a sorted, non-empty run, measured from `from`.
fn common_prefix_from(terms: &[(Vec<u8>, TermMeta)], from: usize) -> usize {
    let first = &terms[0].0[from..];
    let last = &terms[terms.len() - 1].0[from..];
    let mut len = 0;
    while len < first.len() && len < last.len() && first[len] == last[len] {
        len += 1;
    }
    len
}

/// Recursively serialize `terms` (all sharing `prefix_len` bytes) and
/// return the block's offset.
fn write_block<O: IndexOutput>(
    out: &mut O,
    terms: &[(Vec<u8>, TermMeta)],
    prefix_len: usize,
) -> Result<u64> {
    enum Pending {
        Leaf { index: usize },
        Sub { label: Vec<u8>, child: u64 },
        TermWithSubs { label: Vec<u8>, index: usize, child: u64 },
    }

    let mut entries = Vec::new();
    if terms.len() <= MAX_BLOCK_TERMS {
        for (i, _) in terms.iter().enumerate() {
            entries.push(Pending::Leaf { index: i });
        }
    } else {
        let mut i = 0;
        // a term equal to the prefix itself stays in this block
        if terms[0].0.len() == prefix_len {
            entries.push(Pending::Leaf { index: 0 });
            i = 1;
        }
        while i < terms.len() {
            let byte = terms[i].0[prefix_len];
            let mut end = i;
            while end < terms.len() && terms[end].0[prefix_len] == byte {
                end += 1;
            }
            if end - i == 1 {
                entries.push(Pending::Leaf { index: i });
            } else {
                let group = &terms[i..end];
                let lcp = common_prefix_from(group, prefix_len);
                debug_assert!(lcp >= 1);
                let label = group[0].0[prefix_len..prefix_len + lcp].to_vec();
                if group[0].0.len() == prefix_len + lcp {
                    let child = write_block(out, &group[1..], prefix_len + lcp)?;
                    entries.push(Pending::TermWithSubs {
                        label,
                        index: i,
                        child,
                    });
                } else {
                    let child = write_block(out, group, prefix_len + lcp)?;
                    entries.push(Pending::Sub { label, child });
                }
            }
            i = end;
        }
    }

    let offset = out.position();
    out.write_vint(entries.len() as u32)?;
    for entry in &entries {
        match entry {
            Pending::Leaf { index } => {
                let (term, meta) = &terms[*index];
                out.write_byte(EntryKind::LeafTerm as u8)?;
                out.write_vbytes(&term[prefix_len..])?;
                write_term_meta(out, meta)?;
            }
            Pending::Sub { label, child } => {
                out.write_byte(EntryKind::SubBlock as u8)?;
                out.write_vbytes(label)?;
                out.write_vlong(*child)?;
            }
            Pending::TermWithSubs {
                label,
                index,
                child,
            } => {
                let (_, meta) = &terms[*index];
                out.write_byte(EntryKind::TermWithSubs as u8)?;
                out.write_vbytes(label)?;
                write_term_meta(out, meta)?;
                out.write_vlong(*child)?;
            }
        }
    }
    Ok(offset)
}
