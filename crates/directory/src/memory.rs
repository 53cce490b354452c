//! Heap-backed directory.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tessera_core::{Error, Result};

use crate::directory::{DirLock, Directory, IoAdvice};
use crate::io::{BufferOutput, IndexInput, IndexOutput, SliceInput};

#[derive(Clone)]
struct MemoryFile {
    data: Arc<Vec<u8>>,
    mtime: SystemTime,
}

#[derive(Default)]
struct Inner {
    files: FxHashMap<String, MemoryFile>,
    locks: FxHashMap<String, bool>,
}

/// A directory whose files live entirely on the heap.
///
/// Writes are buffered in the output and published atomically on `close`,
/// matching the atomic-replace contract of file creation.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(inner: &Arc<RwLock<Inner>>, name: &str, data: Vec<u8>) {
        let mut guard = inner.write();
        guard.files.insert(
            name.to_string(),
            MemoryFile {
                data: Arc::new(data),
                mtime: SystemTime::now(),
            },
        );
    }
}

struct MemoryOutput {
    inner: Arc<RwLock<Inner>>,
    name: String,
    buf: BufferOutput,
    closed: bool,
}

impl IndexOutput for MemoryOutput {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::IllegalState(format!(
                "write to closed output '{}'",
                self.name
            )));
        }
        self.buf.write_bytes(data)
    }

    fn position(&self) -> u64 {
        self.buf.position()
    }

    fn checksum(&self) -> u64 {
        self.buf.checksum()
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let data = std::mem::take(&mut self.buf).into_bytes();
            MemoryDirectory::publish(&self.inner, &self.name, data);
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        // Publish whatever was written; close() is the normal path.
        let _ = self.close();
    }
}

struct MemoryLock {
    inner: Arc<RwLock<Inner>>,
    name: String,
    held: bool,
}

impl DirLock for MemoryLock {
    fn try_lock(&mut self) -> Result<bool> {
        let mut guard = self.inner.write();
        let taken = guard.locks.entry(self.name.clone()).or_insert(false);
        if *taken {
            return Ok(false);
        }
        *taken = true;
        self.held = true;
        Ok(true)
    }

    fn unlock(&mut self) -> Result<()> {
        if self.held {
            self.held = false;
            self.inner.write().locks.insert(self.name.clone(), false);
        }
        Ok(())
    }
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}

impl Directory for MemoryDirectory {
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        Ok(Box::new(MemoryOutput {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            buf: BufferOutput::new(),
            closed: false,
        }))
    }

    fn open(&self, name: &str, _advice: IoAdvice) -> Result<Box<dyn IndexInput>> {
        let guard = self.inner.read();
        let file = guard.files.get(name).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {name}"),
            ))
        })?;
        Ok(Box::new(SliceInput::new(Arc::clone(&file.data))))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.inner.read().files.contains_key(name))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.inner.write().files.remove(name);
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut guard = self.inner.write();
        let file = guard.files.remove(from).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {from}"),
            ))
        })?;
        guard.files.insert(to.to_string(), file);
        Ok(())
    }

    fn sync(&self, _names: &[String]) -> Result<()> {
        Ok(())
    }

    fn mtime(&self, name: &str) -> Result<SystemTime> {
        let guard = self.inner.read();
        guard.files.get(name).map(|f| f.mtime).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such file: {name}"),
            ))
        })
    }

    fn length(&self, name: &str) -> Result<u64> {
        let guard = self.inner.read();
        guard
            .files
            .get(name)
            .map(|f| f.data.len() as u64)
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no such file: {name}"),
                ))
            })
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().files.keys().cloned().collect())
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn DirLock>> {
        Ok(Box::new(MemoryLock {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
            held: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_publishes_on_close() {
        let dir = MemoryDirectory::new();
        let mut out = dir.create("a").unwrap();
        out.write_bytes(b"payload").unwrap();
        assert!(!dir.exists("a").unwrap());
        out.close().unwrap();
        assert!(dir.exists("a").unwrap());
        assert_eq!(dir.length("a").unwrap(), 7);
    }

    #[test]
    fn test_atomic_replace() {
        let dir = MemoryDirectory::new();
        let mut out = dir.create("f").unwrap();
        out.write_bytes(b"one").unwrap();
        out.close().unwrap();

        let mut out = dir.create("f").unwrap();
        out.write_bytes(b"second").unwrap();
        // old content visible until close
        assert_eq!(dir.length("f").unwrap(), 3);
        out.close().unwrap();
        assert_eq!(dir.length("f").unwrap(), 6);
    }

    #[test]
    fn test_rename_and_remove() {
        let dir = MemoryDirectory::new();
        let mut out = dir.create("x").unwrap();
        out.write_bytes(b"data").unwrap();
        out.close().unwrap();

        dir.rename("x", "y").unwrap();
        assert!(!dir.exists("x").unwrap());
        assert!(dir.exists("y").unwrap());

        dir.remove("y").unwrap();
        assert!(!dir.exists("y").unwrap());
        assert!(dir.rename("y", "z").is_err());
    }

    #[test]
    fn test_lock_exclusion() {
        let dir = MemoryDirectory::new();
        let mut a = dir.make_lock("write.lock").unwrap();
        let mut b = dir.make_lock("write.lock").unwrap();
        assert!(a.try_lock().unwrap());
        assert!(!b.try_lock().unwrap());
        a.unlock().unwrap();
        assert!(b.try_lock().unwrap());
    }

    #[test]
    fn test_independent_readers() {
        let dir = MemoryDirectory::new();
        let mut out = dir.create("f").unwrap();
        out.write_bytes(&[1, 2, 3, 4]).unwrap();
        out.close().unwrap();

        let mut r1 = dir.open("f", IoAdvice::Normal).unwrap();
        let mut r2 = dir.open("f", IoAdvice::Sequential).unwrap();
        assert_eq!(r1.read_byte().unwrap(), 1);
        assert_eq!(r2.read_byte().unwrap(), 1);
        assert_eq!(r1.read_byte().unwrap(), 2);
    }
}
