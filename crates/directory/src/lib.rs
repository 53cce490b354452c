//! Named byte-stream I/O.
//!
//! A [`Directory`] maps opaque file names to streams. Outputs report a
//! cumulative checksum of everything written so far; inputs can be
//! re-opened or duplicated into independent cursors over the same bytes.
//! Two implementations ship here: a heap-backed [`MemoryDirectory`] and a
//! file-system [`FsDirectory`] with advisory write locks.

pub mod cipher;
pub mod directory;
pub mod format_utils;
pub mod fs;
pub mod io;
pub mod memory;

pub use cipher::{Cipher, XorKeystreamCipher};
pub use directory::{DirLock, Directory, IoAdvice};
pub use fs::FsDirectory;
pub use io::{BufferOutput, IndexInput, IndexOutput, OffsetInput, SliceInput};
pub use memory::MemoryDirectory;
