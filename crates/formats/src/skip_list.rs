//! Multi-level skip index over posting blocks.
//!
//! Level 0 receives one record every `skip_0` documents; level `L` one
//! every `skip_0 * skip_n^L`. Record payloads are owned by the caller
//! through the [`SkipObserver`] callbacks; this module only frames them and
//! drives the descent. Levels above 0 prefix every record with a child
//! pointer: the offset within the next-lower level where scanning resumes
//! after the skipped span.

use tessera_core::types::doc_limits;
use tessera_core::{DocId, Result};
use tessera_directory::{BufferOutput, IndexInput, IndexOutput, SliceInput};

/// Parses and stages caller-defined skip records.
pub trait SkipObserver {
    /// Parse the record at `level` into a staging slot; return the last
    /// document of the span it covers.
    fn read(&mut self, level: usize, input: &mut SliceInput) -> Result<DocId>;

    /// Commit the staged record at `level`.
    fn accept(&mut self, level: usize);

    /// Seed level `to` from the accepted state of level `from` when the
    /// seek descends.
    fn copy(&mut self, from: usize, to: usize);
}

/// Maximum levels useful for `count` documents.
fn max_levels_for(skip_0: u32, skip_n: u32, count: u64) -> usize {
    let mut levels = 0usize;
    let mut step = u64::from(skip_0);
    while step <= count {
        levels += 1;
        step = step.saturating_mul(u64::from(skip_n));
    }
    levels.max(1)
}

/// Builds the per-level record streams.
pub struct SkipWriter {
    skip_0: u32,
    skip_n: u32,
    levels: Vec<BufferOutput>,
    max_levels: usize,
}

impl SkipWriter {
    pub fn new(skip_0: u32, skip_n: u32) -> Self {
        debug_assert!(skip_0 > 0 && skip_n > 1);
        Self {
            skip_0,
            skip_n,
            levels: Vec::new(),
            max_levels: 0,
        }
    }

    pub fn skip_0(&self) -> u32 {
        self.skip_0
    }

    /// Size level buffers for up to `count` documents and clear any state
    /// from a previous use.
    pub fn prepare(&mut self, count: u64) {
        self.max_levels = max_levels_for(self.skip_0, self.skip_n, count);
        for level in &mut self.levels {
            level.clear();
        }
        while self.levels.len() < self.max_levels {
            self.levels.push(BufferOutput::new());
        }
    }

    /// Record a skip point after `count` documents have been written.
    ///
    /// `write` emits the payload for one record at the given level. Called
    /// with non-multiples of `skip_0` this is a no-op.
    pub fn skip<F>(&mut self, count: u64, mut write: F) -> Result<()>
    where
        F: FnMut(usize, &mut BufferOutput) -> Result<()>,
    {
        if count == 0 || count % u64::from(self.skip_0) != 0 {
            return Ok(());
        }
        let mut step = u64::from(self.skip_0);
        for level in 0..self.max_levels {
            if count % step != 0 {
                break;
            }
            if level > 0 {
                let child = self.levels[level - 1].position();
                self.levels[level].write_vlong(child)?;
            }
            write(level, &mut self.levels[level])?;
            step = match step.checked_mul(u64::from(self.skip_n)) {
                Some(s) => s,
                None => break,
            };
        }
        Ok(())
    }

    /// True when at least one record was emitted.
    pub fn has_records(&self) -> bool {
        self.levels.first().map_or(false, |l| l.position() > 0)
    }

    /// Serialize: number of levels, then each non-empty level from the
    /// highest down as `{length, bytes}`.
    pub fn flush(&mut self, out: &mut dyn IndexOutput) -> Result<()> {
        let filled = self
            .levels
            .iter()
            .take(self.max_levels)
            .rposition(|l| l.position() > 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        out.write_vint(filled as u32)?;
        for level in self.levels[..filled].iter().rev() {
            out.write_vlong(level.position())?;
            out.write_bytes(level.as_bytes())?;
        }
        Ok(())
    }
}

struct ReaderLevel {
    input: SliceInput,
    /// Documents per record at this level.
    step: u64,
    /// Documents not yet covered by accepted records at this level.
    left: u64,
    /// Last document of the last accepted record.
    doc: DocId,
    /// Child pointer of the last accepted record (levels above 0).
    child: u64,
}

/// Drives seeks over the streams produced by [`SkipWriter`].
pub struct SkipReader<O: SkipObserver> {
    skip_0: u32,
    /// Bottom level first.
    levels: Vec<ReaderLevel>,
    docs_count: u64,
    observer: O,
}

impl<O: SkipObserver> SkipReader<O> {
    /// Parse level framing from `input`; the level payloads are sliced out
    /// of the stream without copying.
    pub fn open(
        input: &mut SliceInput,
        skip_0: u32,
        skip_n: u32,
        docs_count: u64,
        observer: O,
    ) -> Result<Self> {
        let num_levels = input.read_vint()? as usize;
        let mut top_down = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            let len = input.read_vlong()?;
            let start = input.position();
            let slice = input.slice_of(start, len)?;
            input.seek(start + len)?;
            top_down.push(slice);
        }
        let mut levels = Vec::with_capacity(num_levels);
        let mut step = u64::from(skip_0);
        for slice in top_down.into_iter().rev() {
            levels.push(ReaderLevel {
                input: slice,
                step,
                left: docs_count,
                doc: doc_limits::INVALID,
                child: 0,
            });
            step = step.saturating_mul(u64::from(skip_n));
        }
        Ok(Self {
            skip_0,
            levels,
            docs_count,
            observer,
        })
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Reposition every level at its stream start.
    pub fn reset(&mut self) -> Result<()> {
        for level in &mut self.levels {
            level.input.seek(0)?;
            level.left = self.docs_count;
            level.doc = doc_limits::INVALID;
            level.child = 0;
        }
        Ok(())
    }

    /// Advance levels until the level-0 block containing `target` is
    /// isolated. Returns the number of documents known to precede that
    /// block. Seeks are monotone: repeated calls continue forward.
    pub fn seek(&mut self, target: DocId) -> Result<u64> {
        for lvl in (0..self.levels.len()).rev() {
            loop {
                if self.levels[lvl].left < self.levels[lvl].step {
                    break;
                }
                let saved = self.levels[lvl].input.position();
                let child = if lvl > 0 {
                    self.levels[lvl].input.read_vlong()?
                } else {
                    0
                };
                let doc = self.observer.read(lvl, &mut self.levels[lvl].input)?;
                if doc >= target {
                    self.levels[lvl].input.seek(saved)?;
                    break;
                }
                self.observer.accept(lvl);
                let level = &mut self.levels[lvl];
                level.left -= level.step;
                level.doc = doc;
                level.child = child;
            }
            if lvl > 0 {
                let (child, left, accepted) = {
                    let level = &self.levels[lvl];
                    (level.child, level.left, doc_limits::valid(level.doc))
                };
                let lower = &mut self.levels[lvl - 1];
                if accepted && lower.input.position() < child {
                    lower.input.seek(child)?;
                    lower.left = left;
                    self.observer.copy(lvl, lvl - 1);
                }
            }
        }
        Ok(self.docs_count - self.levels[0].left)
    }

    pub fn skip_0(&self) -> u32 {
        self.skip_0
    }
}
