//! File-system directory.
//!
//! Files are created under a temporary name and renamed into place on
//! close, so `create` replaces existing files atomically. Advisory write
//! locks are plain lock files held via `fs2`.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crc32fast::Hasher;
use fs2::FileExt;
use tessera_core::{Error, Result};

use crate::directory::{DirLock, Directory, IoAdvice};
use crate::io::{IndexInput, IndexOutput};

/// A directory rooted at a file-system path.
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open (creating if needed) a directory at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

struct FsOutput {
    writer: BufWriter<File>,
    hasher: Hasher,
    written: u64,
    tmp_path: PathBuf,
    final_path: PathBuf,
    closed: bool,
}

impl IndexOutput for FsOutput {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::IllegalState("write to closed output".to_string()));
        }
        self.writer.write_all(data)?;
        self.hasher.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn checksum(&self) -> u64 {
        u64::from(self.hasher.clone().finalize())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        std::fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }
}

impl Drop for FsOutput {
    fn drop(&mut self) {
        if !self.closed {
            // Abandoned output: drop the temporary, keep the old file.
            let _ = self.writer.flush();
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

struct FsInput {
    file: File,
    path: PathBuf,
    length: u64,
    pos: u64,
}

impl IndexInput for FsInput {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.pos))?;
        self.file.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.length {
            return Err(Error::OutOfRange(format!(
                "seek {pos} beyond length {}",
                self.length
            )));
        }
        self.pos = pos;
        Ok(())
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn reopen(&self) -> Result<Box<dyn IndexInput>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FsInput {
            file,
            path: self.path.clone(),
            length: self.length,
            pos: 0,
        }))
    }

    fn dup(&self) -> Result<Box<dyn IndexInput>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(FsInput {
            file,
            path: self.path.clone(),
            length: self.length,
            pos: self.pos,
        }))
    }
}

struct FsLock {
    path: PathBuf,
    file: Option<File>,
}

impl DirLock for FsLock {
    fn try_lock(&mut self) -> Result<bool> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                self.file = Some(file);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    fn unlock(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        Ok(())
    }
}

impl Drop for FsLock {
    fn drop(&mut self) {
        let _ = self.unlock();
    }
}

impl Directory for FsDirectory {
    fn create(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let final_path = self.path(name);
        let tmp_path = self.path(&format!("{name}.tmp"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        Ok(Box::new(FsOutput {
            writer: BufWriter::new(file),
            hasher: Hasher::new(),
            written: 0,
            tmp_path,
            final_path,
            closed: false,
        }))
    }

    fn open(&self, name: &str, _advice: IoAdvice) -> Result<Box<dyn IndexInput>> {
        let path = self.path(name);
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        Ok(Box::new(FsInput {
            file,
            path,
            length,
            pos: 0,
        }))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.path(name).exists())
    }

    fn remove(&self, name: &str) -> Result<()> {
        std::fs::remove_file(self.path(name))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        std::fs::rename(self.path(from), self.path(to))?;
        Ok(())
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        for name in names {
            let file = File::open(self.path(name))?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn mtime(&self, name: &str) -> Result<SystemTime> {
        Ok(std::fs::metadata(self.path(name))?.modified()?)
    }

    fn length(&self, name: &str) -> Result<u64> {
        Ok(std::fs::metadata(self.path(name))?.len())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }

    fn make_lock(&self, name: &str) -> Result<Box<dyn DirLock>> {
        Ok(Box::new(FsLock {
            path: self.path(name),
            file: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_roundtrip() {
        let tmp = tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path()).unwrap();

        let mut out = dir.create("seg.doc").unwrap();
        out.write_bytes(b"abc").unwrap();
        out.write_u32(0xDEAD_BEEF).unwrap();
        out.close().unwrap();

        let mut input = dir.open("seg.doc", IoAdvice::Normal).unwrap();
        let mut buf = [0u8; 3];
        input.read_bytes(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(input.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(input.length(), 7);
    }

    #[test]
    fn test_create_is_atomic_replace() {
        let tmp = tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path()).unwrap();

        let mut out = dir.create("f").unwrap();
        out.write_bytes(b"old-contents").unwrap();
        out.close().unwrap();

        // Abandoning an output leaves the previous contents intact.
        {
            let mut out = dir.create("f").unwrap();
            out.write_bytes(b"partial").unwrap();
            // dropped without close
        }
        assert_eq!(dir.length("f").unwrap(), 12);

        let mut out = dir.create("f").unwrap();
        out.write_bytes(b"new").unwrap();
        out.close().unwrap();
        assert_eq!(dir.length("f").unwrap(), 3);
    }

    #[test]
    fn test_reopen_is_independent() {
        let tmp = tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path()).unwrap();
        let mut out = dir.create("f").unwrap();
        out.write_bytes(&[9, 8, 7]).unwrap();
        out.close().unwrap();

        let mut a = dir.open("f", IoAdvice::Normal).unwrap();
        assert_eq!(a.read_byte().unwrap(), 9);
        let mut b = a.reopen().unwrap();
        assert_eq!(b.read_byte().unwrap(), 9);
        assert_eq!(a.read_byte().unwrap(), 8);
    }

    #[test]
    fn test_lock_blocks_second_holder() {
        let tmp = tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path()).unwrap();
        let mut a = dir.make_lock("write.lock").unwrap();
        assert!(a.try_lock().unwrap());
        let mut b = dir.make_lock("write.lock").unwrap();
        assert!(!b.try_lock().unwrap());
        a.unlock().unwrap();
        assert!(b.try_lock().unwrap());
    }

    #[test]
    fn test_list_excludes_directories() {
        let tmp = tempdir().unwrap();
        let dir = FsDirectory::new(tmp.path()).unwrap();
        let mut out = dir.create("only").unwrap();
        out.write_bytes(b"x").unwrap();
        out.close().unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();
        assert_eq!(dir.list().unwrap(), vec!["only".to_string()]);
    }
}
