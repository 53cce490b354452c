//! Reference counting over file names.
//!
//! Every file consumed by an open reader or named by a pending commit is
//! tracked here; the cleaner deletes only names whose count is zero.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct RefTracker {
    counts: Mutex<FxHashMap<String, usize>>,
}

impl RefTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn retain(self: &Arc<Self>, name: &str) -> FileRef {
        {
            let mut counts = self.counts.lock();
            *counts.entry(name.to_string()).or_insert(0) += 1;
        }
        FileRef {
            tracker: Arc::clone(self),
            name: name.to_string(),
        }
    }

    /// Retain every file of a list at once.
    pub fn retain_all<'a>(
        self: &Arc<Self>,
        names: impl Iterator<Item = &'a str>,
    ) -> Vec<FileRef> {
        names.map(|n| self.retain(n)).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    fn release(&self, name: &str) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                counts.remove(name);
            }
        }
    }
}

/// RAII handle keeping one file name referenced.
pub struct FileRef {
    tracker: Arc<RefTracker>,
    name: String,
}

impl FileRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FileRef {
    fn drop(&mut self) {
        self.tracker.release(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let tracker = RefTracker::new();
        let a = tracker.retain("f");
        let b = tracker.retain("f");
        assert_eq!(tracker.count("f"), 2);
        drop(a);
        assert_eq!(tracker.count("f"), 1);
        drop(b);
        assert_eq!(tracker.count("f"), 0);
    }

    #[test]
    fn test_retain_all() {
        let tracker = RefTracker::new();
        let refs = tracker.retain_all(["x", "y"].into_iter());
        assert_eq!(tracker.count("x"), 1);
        assert_eq!(refs.len(), 2);
        drop(refs);
        assert_eq!(tracker.count("y"), 0);
    }
}
