//! Field metadata: names, index features, and the feature-to-column map.
//!
//! The `fm` file carries field names, ids, and index feature bits; the
//! `f2` file carries each field's feature map, pointing feature kinds at
//! the columns that store their values.

use tessera_core::{Error, FieldId, IndexFeatures, Result};
use tessera_directory::{format_utils, IndexInput, IndexOutput};

const FM_FORMAT: &str = "tessera_field_meta";
const F2_FORMAT: &str = "tessera_field_features";
const FORMAT_VERSION: u32 = 0;

/// A per-field feature whose values live in a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Field-length normalization values.
    Norm = 0,
}

impl FeatureKind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(FeatureKind::Norm),
            other => Err(Error::Index(format!("unknown feature kind {other}"))),
        }
    }
}

/// Declaration of one indexed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub name: String,
    pub id: FieldId,
    pub features: IndexFeatures,
    /// Feature kind to the column id storing its values.
    pub feature_map: Vec<(FeatureKind, u64)>,
}

impl FieldMeta {
    pub fn new(name: impl Into<String>, id: FieldId, features: IndexFeatures) -> Self {
        Self {
            name: name.into(),
            id,
            features,
            feature_map: Vec::new(),
        }
    }

    pub fn feature_column(&self, kind: FeatureKind) -> Option<u64> {
        self.feature_map
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, col)| *col)
    }
}

/// Write field declarations to the `fm` output and feature maps to `f2`.
pub fn write_fields(
    fm_out: &mut dyn IndexOutput,
    f2_out: &mut dyn IndexOutput,
    fields: &[FieldMeta],
) -> Result<()> {
    format_utils::write_header(fm_out, FM_FORMAT, FORMAT_VERSION)?;
    format_utils::write_header(f2_out, F2_FORMAT, FORMAT_VERSION)?;

    fm_out.write_vint(fields.len() as u32)?;
    f2_out.write_vint(fields.len() as u32)?;
    let mut last_id = None;
    for field in fields {
        if let Some(last) = last_id {
            if field.id <= last {
                return Err(Error::IllegalArgument(format!(
                    "duplicate or out-of-order field id {}",
                    field.id
                )));
            }
        }
        last_id = Some(field.id);
        field.features.check()?;
        fm_out.write_vstr(&field.name)?;
        fm_out.write_vlong(field.id)?;
        fm_out.write_byte(field.features.bits())?;

        f2_out.write_vlong(field.id)?;
        f2_out.write_vint(field.feature_map.len() as u32)?;
        for (kind, column) in &field.feature_map {
            f2_out.write_byte(*kind as u8)?;
            f2_out.write_vlong(*column)?;
        }
    }
    format_utils::write_footer(fm_out)?;
    format_utils::write_footer(f2_out)
}

/// Read back what [`write_fields`] produced.
pub fn read_fields(
    fm_in: &mut dyn IndexInput,
    f2_in: &mut dyn IndexInput,
) -> Result<Vec<FieldMeta>> {
    format_utils::check_footer(&mut *fm_in.dup()?)?;
    format_utils::check_footer(&mut *f2_in.dup()?)?;
    fm_in.seek(0)?;
    f2_in.seek(0)?;
    format_utils::check_header(fm_in, FM_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
    format_utils::check_header(f2_in, F2_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;

    let count = fm_in.read_vint()? as usize;
    let f2_count = f2_in.read_vint()? as usize;
    if count != f2_count {
        return Err(Error::Index(format!(
            "field meta lists disagree: {count} fields vs {f2_count} feature maps"
        )));
    }
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let name = fm_in.read_vstr()?;
        let id = fm_in.read_vlong()?;
        let features = IndexFeatures::from_bits(fm_in.read_byte()?)
            .ok_or_else(|| Error::Index("invalid index features".to_string()))?;
        features.check().map_err(|_| {
            Error::Index(format!("field '{name}' carries inconsistent features"))
        })?;

        let f2_id = f2_in.read_vlong()?;
        if f2_id != id {
            return Err(Error::Index(format!(
                "feature map for field {f2_id} does not match field {id}"
            )));
        }
        let feature_count = f2_in.read_vint()? as usize;
        let mut feature_map = Vec::with_capacity(feature_count);
        for _ in 0..feature_count {
            let kind = FeatureKind::from_u8(f2_in.read_byte()?)?;
            let column = f2_in.read_vlong()?;
            feature_map.push((kind, column));
        }
        fields.push(FieldMeta {
            name,
            id,
            features,
            feature_map,
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_directory::{BufferOutput, SliceInput};

    fn roundtrip(fields: &[FieldMeta]) -> Result<Vec<FieldMeta>> {
        let mut fm = BufferOutput::new();
        let mut f2 = BufferOutput::new();
        write_fields(&mut fm, &mut f2, fields)?;
        let mut fm_in = SliceInput::new(Arc::new(fm.into_bytes()));
        let mut f2_in = SliceInput::new(Arc::new(f2.into_bytes()));
        read_fields(&mut fm_in, &mut f2_in)
    }

    #[test]
    fn test_roundtrip() {
        let mut title = FieldMeta::new(
            "title",
            1,
            IndexFeatures::FREQ | IndexFeatures::POS,
        );
        title.feature_map.push((FeatureKind::Norm, 7));
        let body = FieldMeta::new("body", 2, IndexFeatures::FREQ);
        let fields = vec![title, body];
        assert_eq!(roundtrip(&fields).unwrap(), fields);
    }

    #[test]
    fn test_duplicate_field_id_rejected() {
        let fields = vec![
            FieldMeta::new("a", 3, IndexFeatures::NONE),
            FieldMeta::new("b", 3, IndexFeatures::NONE),
        ];
        assert!(roundtrip(&fields).is_err());
    }

    #[test]
    fn test_inconsistent_features_rejected() {
        let fields = vec![FieldMeta::new("a", 1, IndexFeatures::POS)];
        assert!(roundtrip(&fields).is_err());
    }

    #[test]
    fn test_feature_lookup() {
        let mut field = FieldMeta::new("f", 1, IndexFeatures::FREQ);
        field.feature_map.push((FeatureKind::Norm, 42));
        assert_eq!(field.feature_column(FeatureKind::Norm), Some(42));
    }
}
