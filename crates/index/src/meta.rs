//! Segment and index metadata files.
//!
//! Each segment's descriptor lives in its own `.sm` file, versioned by
//! renaming: a mask-only change writes a new descriptor pointing at the
//! same data files. The index meta lists `(segment, version)` pairs and is
//! committed by renaming `pending_segments_<gen>` to `segments_<gen>`.

use tessera_core::{Error, Result};
use tessera_directory::{format_utils, Directory, IndexInput, IndexOutput, IoAdvice};

use crate::{extensions, versioned_file};

const SM_FORMAT: &str = "tessera_segment_meta";
const INDEX_META_FORMAT: &str = "tessera_index_meta";
const FORMAT_VERSION: u32 = 0;

/// Codec identifier recorded in every segment descriptor.
pub const CODEC: &str = "tessera_0";

/// Descriptor of one immutable segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    pub name: String,
    /// Bumped whenever the document mask changes.
    pub version: u64,
    pub docs_count: u32,
    pub live_docs_count: u32,
    pub byte_size: u64,
    pub codec: String,
    pub column_store: bool,
    pub sort_column: Option<u64>,
    /// Data files belonging to this segment, descriptor excluded.
    pub files: Vec<String>,
}

impl SegmentMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            docs_count: 0,
            live_docs_count: 0,
            byte_size: 0,
            codec: CODEC.to_string(),
            column_store: false,
            sort_column: None,
            files: Vec::new(),
        }
    }

    /// Name of this descriptor's own file.
    pub fn meta_file(&self) -> String {
        versioned_file(&self.name, self.version, extensions::SEGMENT_META)
    }

    pub fn has_mask(&self) -> bool {
        self.live_docs_count < self.docs_count
    }

    /// Name of the mask file for this version, when one exists.
    pub fn mask_file(&self) -> Option<String> {
        self.files
            .iter()
            .find(|f| f.ends_with(extensions::DOC_MASK))
            .cloned()
    }

    /// Persist the descriptor under [`SegmentMeta::meta_file`].
    pub fn write(&self, dir: &dyn Directory) -> Result<()> {
        if self.live_docs_count > self.docs_count {
            return Err(Error::IllegalState(format!(
                "segment {}: live {} exceeds docs {}",
                self.name, self.live_docs_count, self.docs_count
            )));
        }
        let mut out = dir.create(&self.meta_file())?;
        format_utils::write_header(&mut *out, SM_FORMAT, FORMAT_VERSION)?;
        out.write_vstr(&self.name)?;
        out.write_vlong(self.version)?;
        out.write_vstr(&self.codec)?;
        out.write_vint(self.docs_count)?;
        out.write_vint(self.live_docs_count)?;
        out.write_vlong(self.byte_size)?;
        let mut flags = 0u8;
        if self.column_store {
            flags |= 1;
        }
        if self.sort_column.is_some() {
            flags |= 2;
        }
        out.write_byte(flags)?;
        if let Some(column) = self.sort_column {
            out.write_vlong(column)?;
        }
        out.write_vint(self.files.len() as u32)?;
        for file in &self.files {
            out.write_vstr(file)?;
        }
        format_utils::write_footer(&mut *out)?;
        out.close()
    }

    /// Load the descriptor of `(name, version)`.
    pub fn read(dir: &dyn Directory, name: &str, version: u64) -> Result<Self> {
        let file = versioned_file(name, version, extensions::SEGMENT_META);
        let mut input = dir.open(&file, IoAdvice::ReadOnce)?;
        format_utils::check_footer(&mut *input)?;
        input.seek(0)?;
        format_utils::check_header(&mut *input, SM_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        let stored_name = input.read_vstr()?;
        if stored_name != name {
            return Err(Error::Index(format!(
                "segment meta '{file}' names segment '{stored_name}'"
            )));
        }
        let stored_version = input.read_vlong()?;
        if stored_version != version {
            return Err(Error::Index(format!(
                "segment meta '{file}' carries version {stored_version}"
            )));
        }
        let codec = input.read_vstr()?;
        if codec != CODEC {
            return Err(Error::Index(format!("unknown codec '{codec}'")));
        }
        let docs_count = input.read_vint()?;
        let live_docs_count = input.read_vint()?;
        if live_docs_count > docs_count {
            return Err(Error::Index(format!(
                "segment {name}: live {live_docs_count} exceeds docs {docs_count}"
            )));
        }
        let byte_size = input.read_vlong()?;
        let flags = input.read_byte()?;
        let sort_column = if flags & 2 != 0 {
            Some(input.read_vlong()?)
        } else {
            None
        };
        let files_count = input.read_vint()? as usize;
        let mut files = Vec::with_capacity(files_count);
        for _ in 0..files_count {
            files.push(input.read_vstr()?);
        }
        Ok(Self {
            name: name.to_string(),
            version,
            docs_count,
            live_docs_count,
            byte_size,
            codec,
            column_store: flags & 1 != 0,
            sort_column,
            files,
        })
    }
}

/// The committed state of an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMeta {
    /// Strictly increasing across commits.
    pub generation: u64,
    /// Source of new segment names.
    pub counter: u64,
    /// `(segment name, segment version)` pairs.
    pub segments: Vec<(String, u64)>,
    /// Opaque application payload carried with the commit.
    pub payload: Vec<u8>,
}

impl IndexMeta {
    pub fn pending_file(generation: u64) -> String {
        format!("pending_segments_{generation}")
    }

    pub fn committed_file(generation: u64) -> String {
        format!("segments_{generation}")
    }

    /// Allocate the next segment name.
    pub fn next_segment_name(&mut self) -> String {
        self.counter += 1;
        format!("seg_{}", self.counter)
    }

    /// Write under the pending name for `self.generation`.
    pub fn write_pending(&self, dir: &dyn Directory) -> Result<String> {
        let file = Self::pending_file(self.generation);
        let mut out = dir.create(&file)?;
        format_utils::write_header(&mut *out, INDEX_META_FORMAT, FORMAT_VERSION)?;
        out.write_vlong(self.generation)?;
        out.write_vlong(self.counter)?;
        out.write_vint(self.segments.len() as u32)?;
        for (name, version) in &self.segments {
            out.write_vstr(name)?;
            out.write_vlong(*version)?;
        }
        out.write_vbytes(&self.payload)?;
        format_utils::write_footer(&mut *out)?;
        out.close()?;
        Ok(file)
    }

    pub fn read(dir: &dyn Directory, file: &str) -> Result<Self> {
        let mut input = dir.open(file, IoAdvice::ReadOnce)?;
        format_utils::check_footer(&mut *input)?;
        input.seek(0)?;
        format_utils::check_header(&mut *input, INDEX_META_FORMAT, FORMAT_VERSION, FORMAT_VERSION)?;
        let generation = input.read_vlong()?;
        let counter = input.read_vlong()?;
        let count = input.read_vint()? as usize;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let name = input.read_vstr()?;
            let version = input.read_vlong()?;
            segments.push((name, version));
        }
        let payload = input.read_vbytes()?;
        Ok(Self {
            generation,
            counter,
            segments,
            payload,
        })
    }

    /// Find the newest committed generation in `dir`, if any.
    pub fn last_committed_generation(dir: &dyn Directory) -> Result<Option<u64>> {
        let mut last = None;
        for name in dir.list()? {
            if let Some(gen) = name.strip_prefix("segments_") {
                if let Ok(gen) = gen.parse::<u64>() {
                    last = last.max(Some(gen));
                }
            }
        }
        Ok(last)
    }

    /// Load the newest committed meta, if the index has ever committed.
    pub fn read_last_committed(dir: &dyn Directory) -> Result<Option<Self>> {
        match Self::last_committed_generation(dir)? {
            None => Ok(None),
            Some(gen) => Ok(Some(Self::read(dir, &Self::committed_file(gen))?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_directory::MemoryDirectory;

    #[test]
    fn test_segment_meta_roundtrip() {
        let dir = MemoryDirectory::new();
        let mut meta = SegmentMeta::new("seg_1");
        meta.version = 2;
        meta.docs_count = 10;
        meta.live_docs_count = 8;
        meta.byte_size = 12345;
        meta.column_store = true;
        meta.sort_column = Some(3);
        meta.files = vec!["seg_1.doc".to_string(), "seg_1.2.doc_mask".to_string()];
        meta.write(&dir).unwrap();

        let read = SegmentMeta::read(&dir, "seg_1", 2).unwrap();
        assert_eq!(read, meta);
        assert_eq!(read.meta_file(), "seg_1.2.sm");
        assert!(read.has_mask());
        assert_eq!(read.mask_file(), Some("seg_1.2.doc_mask".to_string()));
    }

    #[test]
    fn test_live_docs_invariant_enforced() {
        let dir = MemoryDirectory::new();
        let mut meta = SegmentMeta::new("seg_1");
        meta.docs_count = 3;
        meta.live_docs_count = 4;
        assert!(meta.write(&dir).is_err());
    }

    #[test]
    fn test_index_meta_roundtrip_and_rename() {
        let dir = MemoryDirectory::new();
        let mut meta = IndexMeta::default();
        meta.generation = 3;
        let name = meta.next_segment_name();
        assert_eq!(name, "seg_1");
        meta.segments.push((name, 0));
        meta.payload = b"app-state".to_vec();

        let pending = meta.write_pending(&dir).unwrap();
        assert_eq!(pending, "pending_segments_3");
        assert_eq!(IndexMeta::last_committed_generation(&dir).unwrap(), None);

        dir.rename(&pending, &IndexMeta::committed_file(3)).unwrap();
        assert_eq!(IndexMeta::last_committed_generation(&dir).unwrap(), Some(3));
        let read = IndexMeta::read_last_committed(&dir).unwrap().unwrap();
        assert_eq!(read, meta);
    }

    #[test]
    fn test_generation_ordering() {
        let dir = MemoryDirectory::new();
        for gen in [1u64, 5, 3] {
            let mut meta = IndexMeta::default();
            meta.generation = gen;
            let pending = meta.write_pending(&dir).unwrap();
            dir.rename(&pending, &IndexMeta::committed_file(gen)).unwrap();
        }
        assert_eq!(IndexMeta::last_committed_generation(&dir).unwrap(), Some(5));
    }
}
