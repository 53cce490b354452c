//! Read access to one sealed segment.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tessera_core::bitset::DocBitSet;
use tessera_core::{DocIterator, Error, FieldId, IndexFeatures, Result};
use tessera_directory::{Cipher, Directory, IndexInput, IoAdvice, SliceInput};
use tessera_formats::columnstore::{
    ColumnHint, ColumnIterator, ColumnstoreReader, ReaderOptions,
};
use tessera_formats::doc_mask::{read_doc_mask, DocMask};
use tessera_formats::field_meta::{read_fields, FeatureKind, FieldMeta};
use tessera_formats::postings::{PostingsIterator, TermMeta, Wanderator};
use tessera_formats::term_dict::{Automaton, IntersectIterator, TermDict, TermIterator};

use crate::meta::SegmentMeta;
use crate::sort_column::SortColumnReader;
use crate::{extensions, segment_file};

/// Options shared by every reader of an index.
#[derive(Default, Clone)]
pub struct SegmentReaderOptions {
    pub cipher: Option<Arc<dyn Cipher>>,
    pub accountant: Option<tessera_formats::columnstore::MemoryAccountant>,
}

/// Reader over one immutable segment plus its current document mask.
///
/// The reader itself is thread-safe; iterators obtained from it are not
/// and belong to one thread each.
pub struct SegmentReader {
    meta: SegmentMeta,
    fields_by_name: FxHashMap<String, FieldMeta>,
    fields_by_id: FxHashMap<FieldId, FieldMeta>,
    dict: TermDict,
    doc_data: SliceInput,
    pos_data: Option<SliceInput>,
    pay_data: Option<SliceInput>,
    columns: Option<ColumnstoreReader>,
    mask: Arc<DocMask>,
    dir: Arc<dyn Directory>,
}

fn load(dir: &dyn Directory, name: &str) -> Result<SliceInput> {
    let mut input = dir.open(name, IoAdvice::Sequential)?;
    let len = input.length() as usize;
    let mut buf = vec![0u8; len];
    input.read_bytes(&mut buf)?;
    Ok(SliceInput::new(Arc::new(buf)))
}

impl SegmentReader {
    /// Open the segment described by `meta`.
    pub fn open(
        dir: Arc<dyn Directory>,
        meta: SegmentMeta,
        opts: &SegmentReaderOptions,
    ) -> Result<Self> {
        let name = &meta.name;
        let mut fm_in = load(&*dir, &segment_file(name, extensions::FIELD_META))?;
        let mut f2_in = load(&*dir, &segment_file(name, extensions::FIELD_FEATURES))?;
        let field_list = read_fields(&mut fm_in, &mut f2_in)?;
        let mut fields_by_name = FxHashMap::default();
        let mut fields_by_id = FxHashMap::default();
        for field in field_list {
            fields_by_id.insert(field.id, field.clone());
            fields_by_name.insert(field.name.clone(), field);
        }

        let dict = TermDict::open(
            load(&*dir, &segment_file(name, extensions::TERM_INDEX))?,
            load(&*dir, &segment_file(name, extensions::TERM_META))?,
        )?;

        let doc_data = load(&*dir, &segment_file(name, extensions::DOCS))?;
        let pos_name = segment_file(name, extensions::POSITIONS);
        let pos_data = if dir.exists(&pos_name)? {
            Some(load(&*dir, &pos_name)?)
        } else {
            None
        };
        let pay_name = segment_file(name, extensions::PAYLOADS);
        let pay_data = if dir.exists(&pay_name)? {
            Some(load(&*dir, &pay_name)?)
        } else {
            None
        };

        let columns = if meta.column_store {
            Some(ColumnstoreReader::open(
                Arc::clone(&dir),
                &segment_file(name, extensions::COLUMNSTORE_DATA),
                &segment_file(name, extensions::COLUMNSTORE_INDEX),
                ReaderOptions {
                    cipher: opts.cipher.clone(),
                    accountant: opts.accountant.clone(),
                },
            )?)
        } else {
            None
        };

        let mask = match meta.mask_file() {
            Some(file) => {
                let mut input = dir.open(&file, IoAdvice::ReadOnce)?;
                Arc::new(read_doc_mask(&mut *input)?)
            }
            None => Arc::new(DocMask::new()),
        };
        if meta.docs_count - mask.len() as u32 != meta.live_docs_count {
            return Err(Error::Index(format!(
                "segment {name}: mask of {} disagrees with live_docs_count {}",
                mask.len(),
                meta.live_docs_count
            )));
        }

        Ok(Self {
            meta,
            fields_by_name,
            fields_by_id,
            dict,
            doc_data,
            pos_data,
            pay_data,
            columns,
            mask,
            dir,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    pub fn docs_count(&self) -> u32 {
        self.meta.docs_count
    }

    pub fn live_docs_count(&self) -> u32 {
        self.meta.live_docs_count
    }

    /// The deleted-documents set of this segment version.
    pub fn mask(&self) -> &Arc<DocMask> {
        &self.mask
    }

    pub fn field_meta(&self, name: &str) -> Option<&FieldMeta> {
        self.fields_by_name.get(name)
    }

    pub fn field_meta_by_id(&self, id: FieldId) -> Option<&FieldMeta> {
        self.fields_by_id.get(&id)
    }

    /// Field names in no particular order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields_by_name.keys().map(|s| s.as_str())
    }

    /// Term-level access to a field, or `None` when it does not exist.
    pub fn field(&self, name: &str) -> Option<FieldReader<'_>> {
        let meta = self.fields_by_name.get(name)?;
        let terms = self.dict.field(meta.id)?;
        Some(FieldReader {
            reader: self,
            meta,
            features: terms.features,
        })
    }

    pub fn columns(&self) -> Option<&ColumnstoreReader> {
        self.columns.as_ref()
    }

    /// Iterator over a named column.
    pub fn column_by_name(
        &self,
        name: &str,
        hint: ColumnHint,
    ) -> Result<Option<ColumnIterator<'_>>> {
        let Some(columns) = &self.columns else {
            return Ok(None);
        };
        match columns.column_by_name(name) {
            Some(column) => Ok(Some(columns.iterator(column.id(), hint)?)),
            None => Ok(None),
        }
    }

    /// Iterator over a column by id.
    pub fn column(&self, id: u64, hint: ColumnHint) -> Result<Option<ColumnIterator<'_>>> {
        let Some(columns) = &self.columns else {
            return Ok(None);
        };
        if columns.column(id).is_none() {
            return Ok(None);
        }
        Ok(Some(columns.iterator(id, hint)?))
    }

    /// The norm column of a field, when norms were indexed.
    pub fn norms(&self, field: &str) -> Result<Option<ColumnIterator<'_>>> {
        let Some(meta) = self.fields_by_name.get(field) else {
            return Ok(None);
        };
        match meta.feature_column(FeatureKind::Norm) {
            Some(column) => self.column(column, ColumnHint::NORMAL),
            None => Ok(None),
        }
    }

    /// Open the segment's sort column, when the index is sorted.
    pub fn sort_column(&self) -> Result<Option<SortColumnReader>> {
        if self.meta.sort_column.is_none() {
            return Ok(None);
        }
        let input = self
            .dir
            .open(&segment_file(&self.meta.name, extensions::SORT_COLUMN), IoAdvice::Sequential)?;
        Ok(Some(SortColumnReader::open(input)?))
    }
}

/// Term and postings access for one field.
pub struct FieldReader<'a> {
    reader: &'a SegmentReader,
    meta: &'a FieldMeta,
    features: IndexFeatures,
}

impl<'a> FieldReader<'a> {
    pub fn meta(&self) -> &FieldMeta {
        self.meta
    }

    pub fn features(&self) -> IndexFeatures {
        self.features
    }

    pub fn terms(&self) -> &tessera_formats::term_dict::FieldTerms {
        self.reader
            .dict
            .field(self.meta.id)
            .expect("field existence checked on construction")
    }

    /// Sequential term iterator.
    pub fn iterator(&self) -> Result<TermIterator<'a>> {
        self.reader.dict.iterator(self.meta.id)
    }

    /// Random-access term lookup.
    pub fn seek_exact(&self, term: &[u8]) -> Result<Option<TermMeta>> {
        self.reader.dict.seek_exact(self.meta.id, term)
    }

    /// Automaton-driven term iterator.
    pub fn intersect<A: Automaton>(&self, automaton: A) -> Result<IntersectIterator<'a, A>> {
        self.reader.dict.intersect(self.meta.id, automaton)
    }

    /// Postings of one term cookie.
    pub fn postings(&self, cookie: TermMeta, requested: IndexFeatures) -> Result<PostingsIterator> {
        PostingsIterator::open(
            cookie,
            self.features,
            requested,
            &self.reader.doc_data,
            self.reader.pos_data.as_ref(),
            self.reader.pay_data.as_ref(),
        )
    }

    /// Block-max postings of one term cookie.
    pub fn wanderator(&self, cookie: TermMeta, requested: IndexFeatures) -> Result<Wanderator> {
        Wanderator::open(cookie, self.features, requested, &self.reader.doc_data)
    }

    /// OR the documents of every cookie into `set`; returns how many bits
    /// were visited.
    pub fn bit_union(&self, cookies: &[TermMeta], set: &mut DocBitSet) -> Result<u64> {
        let mut visited = 0u64;
        for cookie in cookies {
            let mut it = self.postings(*cookie, IndexFeatures::NONE)?;
            while it.next() {
                set.set(it.value());
                visited += 1;
            }
        }
        Ok(visited)
    }
}
