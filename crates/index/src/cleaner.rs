//! Directory cleanup.
//!
//! Deletes files that no committed or pending index meta mentions and no
//! open reader references. Safe to race with readers: a referenced name is
//! never removed, and removal failures are ignored (another process may
//! hold the file).

use std::collections::HashSet;

use tessera_core::Result;
use tessera_directory::Directory;

use crate::meta::{IndexMeta, SegmentMeta};
use crate::refs::RefTracker;

/// Remove every unreferenced file; returns the removed names.
///
/// Only the newest committed meta and every pending meta pin files;
/// superseded `segments_<gen>` files are themselves removable once no
/// reader holds them.
pub fn cleanup(dir: &dyn Directory, refs: &RefTracker) -> Result<Vec<String>> {
    let mut keep: HashSet<String> = HashSet::new();
    let last_committed = IndexMeta::last_committed_generation(dir)?;

    for name in dir.list()? {
        let current = match last_committed {
            Some(gen) if name == IndexMeta::committed_file(gen) => true,
            _ => name.starts_with("pending_segments_"),
        };
        if !current {
            continue;
        }
        keep.insert(name.clone());
        if let Ok(meta) = IndexMeta::read(dir, &name) {
            for (segment, version) in &meta.segments {
                if let Ok(segment_meta) = SegmentMeta::read(dir, segment, *version) {
                    keep.insert(segment_meta.meta_file());
                    keep.extend(segment_meta.files.iter().cloned());
                }
            }
        }
    }

    let mut removed = Vec::new();
    for name in dir.list()? {
        if keep.contains(&name) || refs.count(&name) > 0 {
            continue;
        }
        if name.ends_with(".lock") || name.ends_with(".tmp") {
            continue;
        }
        match dir.remove(&name) {
            Ok(()) => {
                tracing::debug!(file = %name, "removed unreferenced file");
                removed.push(name);
            }
            Err(err) => {
                tracing::debug!(file = %name, %err, "failed to remove unreferenced file");
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_directory::{Directory as _, IndexOutput, MemoryDirectory};

    fn touch(dir: &MemoryDirectory, name: &str) {
        let mut out = dir.create(name).unwrap();
        out.write_bytes(b"x").unwrap();
        out.close().unwrap();
    }

    #[test]
    fn test_removes_only_unreferenced() {
        let dir = MemoryDirectory::new();
        let refs = RefTracker::new();

        // a committed meta referencing seg_1
        let mut seg = SegmentMeta::new("seg_1");
        seg.files = vec!["seg_1.doc".to_string()];
        seg.write(&dir).unwrap();
        touch(&dir, "seg_1.doc");
        let mut meta = IndexMeta::default();
        meta.generation = 1;
        meta.segments.push(("seg_1".to_string(), 0));
        let pending = meta.write_pending(&dir).unwrap();
        dir.rename(&pending, &IndexMeta::committed_file(1)).unwrap();

        // stragglers
        touch(&dir, "seg_0.doc");
        touch(&dir, "held.doc");
        let held = refs.retain("held.doc");

        let removed = cleanup(&dir, &refs).unwrap();
        assert_eq!(removed, vec!["seg_0.doc".to_string()]);
        assert!(dir.exists("seg_1.doc").unwrap());
        assert!(dir.exists("held.doc").unwrap());
        assert!(dir.exists("seg_1.0.sm").unwrap());

        drop(held);
        let removed = cleanup(&dir, &refs).unwrap();
        assert_eq!(removed, vec!["held.doc".to_string()]);
    }
}
