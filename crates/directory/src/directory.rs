//! The directory abstraction.

use std::time::SystemTime;

use tessera_core::Result;

use crate::io::{IndexInput, IndexOutput};

/// Access pattern hint passed to [`Directory::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoAdvice {
    #[default]
    Normal,
    /// Point lookups; favor small reads.
    Random,
    /// Front-to-back scans; favor large buffers.
    Sequential,
    /// Read once then discard (merge inputs).
    ReadOnce,
}

/// An advisory lock handle produced by [`Directory::make_lock`].
pub trait DirLock: Send {
    /// Attempt to acquire; `false` when another holder owns the lock.
    fn try_lock(&mut self) -> Result<bool>;

    /// Release a previously acquired lock.
    fn unlock(&mut self) -> Result<()>;
}

/// Named byte-stream storage.
///
/// File names are opaque. `create` atomically replaces any existing file of
/// the same name once the returned output is closed. Implementations are
/// thread-safe for operations on independent files; concurrent readers of
/// one file each hold their own [`IndexInput`] cursor.
pub trait Directory: Send + Sync {
    /// Create (or atomically replace) a file for writing.
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>>;

    /// Open an existing file for reading.
    fn open(&self, name: &str, advice: IoAdvice) -> Result<Box<dyn IndexInput>>;

    fn exists(&self, name: &str) -> Result<bool>;

    fn remove(&self, name: &str) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Durably persist the named files.
    fn sync(&self, names: &[String]) -> Result<()>;

    fn mtime(&self, name: &str) -> Result<SystemTime>;

    fn length(&self, name: &str) -> Result<u64>;

    /// Enumerate every file in the directory.
    fn list(&self) -> Result<Vec<String>>;

    /// Create an advisory lock handle under `name`.
    fn make_lock(&self, name: &str) -> Result<Box<dyn DirLock>>;
}
