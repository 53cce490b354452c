//! The transactional index writer.
//!
//! Documents stream into reusable segment contexts owned by a two-slot
//! flush-context ring; `commit` drains the ring, applies queued deletions,
//! materializes consolidation results, and publishes a new index meta in
//! two phases. Lock nesting order, outermost first: commit state, flush
//! context, segment context, consolidation set, reader cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use rustc_hash::FxHashMap;
use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator, Error, Result};
use tessera_directory::{Directory, DirLock, IoAdvice};
use tessera_formats::doc_mask::{read_doc_mask, write_doc_mask, DocMask};

use crate::index::IndexOptions;
use crate::merge_writer::{DocMap, MergeWriter};
use crate::meta::{IndexMeta, SegmentMeta};
use crate::reader_cache::ReaderCache;
use crate::refs::{FileRef, RefTracker};
use crate::segment_reader::SegmentReader;
use crate::segment_writer::{Document, SegmentWriter};
use crate::{extensions, versioned_file};

/// Name of the writer's advisory lock file.
pub const WRITE_LOCK: &str = "write.lock";

/// Deletion predicate evaluated against each segment at flush time.
pub trait DocFilter: Send + Sync {
    /// Iterator over the documents the filter matches in `reader`.
    fn matching<'a>(&'a self, reader: &'a SegmentReader) -> Result<Box<dyn DocIterator + 'a>>;
}

/// Chooses which committed segments a consolidation merges.
pub trait ConsolidationPolicy: Send + Sync {
    /// Names of the segments to merge, drawn from `segments`.
    fn select(&self, segments: &[SegmentMeta]) -> Vec<String>;
}

/// Merge every available segment.
pub struct ConsolidateAll;

impl ConsolidationPolicy for ConsolidateAll {
    fn select(&self, segments: &[SegmentMeta]) -> Vec<String> {
        segments.iter().map(|s| s.name.clone()).collect()
    }
}

struct SegmentContextInner {
    writer: SegmentWriter,
    /// Write generation of each allocated document (`doc - 1` indexed).
    doc_gens: Vec<u64>,
}

type SegmentHandle = Arc<Mutex<SegmentContextInner>>;

#[derive(Default)]
struct FlushContext {
    /// Shared by document batches, exclusive for the ring swap.
    guard: RwLock<()>,
    /// Contexts holding buffered documents of this flush generation.
    segments: Mutex<Vec<SegmentHandle>>,
}

/// A freshly flushed segment awaiting its first commit.
struct FlushedSegment {
    meta: SegmentMeta,
    doc_gens: Vec<u64>,
}

/// Consolidation result produced while a commit was mid-transaction.
struct StagedConsolidation {
    /// `(name, version)` of each input at merge time.
    candidates: Vec<(String, u64)>,
    merged: SegmentMeta,
    doc_maps: Vec<DocMap>,
}

#[derive(Default)]
struct CommitState {
    in_progress: bool,
    /// Pending meta written by phase one, finished by phase two.
    pending: Option<PendingCommit>,
}

struct PendingCommit {
    meta: IndexMeta,
    pending_file: String,
}

/// Working view of the index between commits.
#[derive(Default)]
struct WriterState {
    /// Last committed meta.
    committed: IndexMeta,
    /// Segments the next commit will publish.
    segments: Vec<SegmentMeta>,
    /// Segments flushed but not yet committed, with their doc generations.
    uncommitted_gens: FxHashMap<String, Vec<u64>>,
    /// Pins on every working segment's files.
    file_refs: FxHashMap<String, Vec<FileRef>>,
    /// Source of segment names.
    counter: u64,
}

/// The single writer of an index.
///
/// `documents()` may be used from any number of threads concurrently;
/// `commit`, `consolidate`, and `clear` serialize on the commit state.
pub struct IndexWriter {
    dir: Arc<dyn Directory>,
    options: IndexOptions,
    refs: Arc<RefTracker>,
    _write_lock: Mutex<Box<dyn DirLock>>,

    state: Mutex<WriterState>,
    commit_state: Mutex<CommitState>,
    commit_cv: Condvar,

    contexts: [FlushContext; 2],
    active: AtomicUsize,
    pool: Mutex<Vec<SegmentHandle>>,
    flushed: Mutex<Vec<FlushedSegment>>,

    generation: AtomicU64,
    deletions: Mutex<Vec<(u64, Arc<dyn DocFilter>)>>,

    consolidation_lock: Mutex<()>,
    consolidating: Mutex<HashSet<String>>,
    staged: Mutex<Vec<StagedConsolidation>>,
    reader_cache: ReaderCache,
}

impl IndexWriter {
    pub(crate) fn open(
        dir: Arc<dyn Directory>,
        refs: Arc<RefTracker>,
        options: IndexOptions,
    ) -> Result<Self> {
        let mut lock = dir.make_lock(WRITE_LOCK)?;
        if !lock.try_lock()? {
            return Err(Error::LockObtainFailed(format!(
                "another writer holds '{WRITE_LOCK}'"
            )));
        }

        let committed = IndexMeta::read_last_committed(&*dir)?.unwrap_or_default();
        let mut state = WriterState {
            counter: committed.counter,
            committed: committed.clone(),
            ..WriterState::default()
        };
        for (name, version) in &committed.segments {
            let meta = SegmentMeta::read(&*dir, name, *version)?;
            let mut pins = vec![refs.retain(&meta.meta_file())];
            pins.extend(refs.retain_all(meta.files.iter().map(String::as_str)));
            state.file_refs.insert(name.clone(), pins);
            state.segments.push(meta);
        }

        Ok(Self {
            dir,
            options,
            refs,
            _write_lock: Mutex::new(lock),
            state: Mutex::new(state),
            commit_state: Mutex::new(CommitState::default()),
            commit_cv: Condvar::new(),
            contexts: [FlushContext::default(), FlushContext::default()],
            active: AtomicUsize::new(0),
            pool: Mutex::new(Vec::new()),
            flushed: Mutex::new(Vec::new()),
            generation: AtomicU64::new(1),
            deletions: Mutex::new(Vec::new()),
            consolidation_lock: Mutex::new(()),
            consolidating: Mutex::new(HashSet::new()),
            staged: Mutex::new(Vec::new()),
            reader_cache: ReaderCache::new(),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Begin a document batch bound to the active flush context.
    pub fn documents(&self) -> DocBatch<'_> {
        loop {
            let idx = self.active.load(Ordering::Acquire);
            let guard = self.contexts[idx].guard.read();
            if self.active.load(Ordering::Acquire) == idx {
                return DocBatch {
                    writer: self,
                    ctx_idx: idx,
                    segment: None,
                    batch_docs: Vec::new(),
                    failed: false,
                    _shared: guard,
                };
            }
        }
    }

    /// Queue a deletion; it is evaluated against every live segment at the
    /// next flush and masks only documents written before it.
    pub fn remove(&self, filter: Arc<dyn DocFilter>) {
        let generation = self.next_generation();
        self.deletions.lock().push((generation, filter));
    }

    fn acquire_segment(&self, ctx_idx: usize) -> SegmentHandle {
        if let Some(handle) = self.contexts[ctx_idx].segments.lock().pop() {
            return handle;
        }
        if let Some(handle) = self.pool.lock().pop() {
            return handle;
        }
        Arc::new(Mutex::new(SegmentContextInner {
            writer: SegmentWriter::new(self.options.cipher.clone(), self.options.sort.clone()),
            doc_gens: Vec::new(),
        }))
    }

    fn release_segment(&self, ctx_idx: usize, handle: SegmentHandle) {
        let empty = handle.lock().writer.is_empty();
        if empty {
            self.pool.lock().push(handle);
        } else {
            self.contexts[ctx_idx].segments.lock().push(handle);
        }
    }

    /// Seal one segment context to disk; the context becomes reusable.
    fn flush_segment(&self, inner: &mut SegmentContextInner) -> Result<()> {
        if inner.writer.is_empty() {
            return Ok(());
        }
        if inner.writer.live_docs_count() == 0 {
            // nothing visible would survive; drop the buffers
            inner.writer.reset();
            inner.doc_gens.clear();
            return Ok(());
        }
        let name = {
            let mut state = self.state.lock();
            state.counter += 1;
            format!("seg_{}", state.counter)
        };
        let mut meta = SegmentMeta::new(&name);
        let doc_map = inner.writer.flush(&*self.dir, &mut meta)?;
        meta.write(&*self.dir)?;

        let mut doc_gens = std::mem::take(&mut inner.doc_gens);
        if let Some(map) = doc_map {
            let mut remapped = vec![0u64; doc_gens.len()];
            for (old_idx, gen) in doc_gens.iter().enumerate() {
                let new_doc = map[old_idx];
                remapped[(new_doc - doc_limits::MIN) as usize] = *gen;
            }
            doc_gens = remapped;
        }
        inner.writer.reset();

        tracing::debug!(segment = %name, docs = meta.docs_count, "flushed segment");
        self.flushed.lock().push(FlushedSegment { meta, doc_gens });
        Ok(())
    }

    /// Swap the flush-context ring and seal every drained context.
    fn flush_all(&self) -> Result<()> {
        let draining = self.active.load(Ordering::Acquire);
        let _ = self.active.compare_exchange(
            draining,
            1 - draining,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // wait for in-flight batches of the draining context
        let _exclusive = self.contexts[draining].guard.write();
        let handles: Vec<SegmentHandle> =
            std::mem::take(&mut *self.contexts[draining].segments.lock());
        for handle in handles {
            let mut inner = handle.lock();
            self.flush_segment(&mut inner)?;
            drop(inner);
            self.pool.lock().push(handle);
        }
        Ok(())
    }

    /// Commit phase one: flush, apply deletions, stage the pending meta.
    pub fn begin(&self) -> Result<()> {
        let mut commit = self.commit_state.lock();
        while commit.in_progress {
            self.commit_cv.wait(&mut commit);
        }
        commit.in_progress = true;
        drop(commit);

        match self.start_commit() {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut commit = self.commit_state.lock();
                commit.in_progress = false;
                commit.pending = None;
                drop(commit);
                self.commit_cv.notify_all();
                Err(err)
            }
        }
    }

    fn start_commit(&self) -> Result<()> {
        self.flush_all()?;

        let mut state = self.state.lock();

        // adopt freshly flushed segments
        for flushed in self.flushed.lock().drain(..) {
            let mut pins = vec![self.refs.retain(&flushed.meta.meta_file())];
            pins.extend(
                self.refs
                    .retain_all(flushed.meta.files.iter().map(String::as_str)),
            );
            state.file_refs.insert(flushed.meta.name.clone(), pins);
            state
                .uncommitted_gens
                .insert(flushed.meta.name.clone(), flushed.doc_gens);
            state.segments.push(flushed.meta);
        }

        // apply queued deletions to every live segment
        let deletions: Vec<(u64, Arc<dyn DocFilter>)> =
            std::mem::take(&mut *self.deletions.lock());
        if !deletions.is_empty() {
            self.apply_deletions(&mut state, &deletions)?;
        }

        // then materialize staged consolidations; masks committed since a
        // merge snapshot are remapped onto the merged segment
        let staged: Vec<StagedConsolidation> = self.staged.lock().drain(..).collect();
        for staged in staged {
            self.install_consolidation(&mut state, staged)?;
        }

        // fully masked segments drop out
        let dropped: Vec<String> = state
            .segments
            .iter()
            .filter(|m| m.live_docs_count == 0)
            .map(|m| m.name.clone())
            .collect();
        state.segments.retain(|m| m.live_docs_count > 0);
        for name in dropped {
            state.file_refs.remove(&name);
        }

        // compose and stage the new meta
        let meta = IndexMeta {
            generation: state.committed.generation + 1,
            counter: state.counter,
            segments: state
                .segments
                .iter()
                .map(|s| (s.name.clone(), s.version))
                .collect(),
            payload: Vec::new(),
        };
        let pending_file = meta.write_pending(&*self.dir)?;
        let mut to_sync: Vec<String> = vec![pending_file.clone()];
        for segment in &state.segments {
            to_sync.push(segment.meta_file());
            to_sync.extend(segment.files.iter().cloned());
        }
        self.dir.sync(&to_sync)?;
        drop(state);

        let mut commit = self.commit_state.lock();
        commit.pending = Some(PendingCommit { meta, pending_file });
        Ok(())
    }

    /// Commit phase two: publish the staged meta.
    pub fn finish(&self) -> Result<()> {
        let mut commit = self.commit_state.lock();
        if !commit.in_progress {
            return Err(Error::IllegalState("no commit in progress".to_string()));
        }
        let result = (|| -> Result<()> {
            let Some(pending) = commit.pending.take() else {
                return Err(Error::IllegalState("commit has no pending meta".to_string()));
            };
            let committed_file = IndexMeta::committed_file(pending.meta.generation);
            self.dir.rename(&pending.pending_file, &committed_file)?;
            self.dir.sync(&[committed_file])?;

            let mut state = self.state.lock();
            state.committed = pending.meta;
            state.uncommitted_gens.clear();
            let live: Vec<(String, u64)> = state
                .segments
                .iter()
                .map(|s| (s.name.clone(), s.version))
                .collect();
            drop(state);
            self.reader_cache.purge(&live);
            Ok(())
        })();
        commit.in_progress = false;
        drop(commit);
        self.commit_cv.notify_all();
        result
    }

    /// Abort a begun commit, restoring the last committed state.
    pub fn rollback(&self) -> Result<()> {
        let mut commit = self.commit_state.lock();
        if !commit.in_progress {
            return Err(Error::IllegalState("no commit in progress".to_string()));
        }
        if let Some(pending) = commit.pending.take() {
            let _ = self.dir.remove(&pending.pending_file);
        }
        let mut state = self.state.lock();
        let committed = state.committed.clone();
        state.counter = committed.counter;
        state.segments.clear();
        state.uncommitted_gens.clear();
        state.file_refs.clear();
        for (name, version) in &committed.segments {
            let meta = SegmentMeta::read(&*self.dir, name, *version)?;
            let mut pins = vec![self.refs.retain(&meta.meta_file())];
            pins.extend(self.refs.retain_all(meta.files.iter().map(String::as_str)));
            state.file_refs.insert(name.clone(), pins);
            state.segments.push(meta);
        }
        drop(state);
        commit.in_progress = false;
        drop(commit);
        self.commit_cv.notify_all();
        Ok(())
    }

    /// Flush and publish in one step.
    pub fn commit(&self) -> Result<()> {
        self.begin()?;
        self.finish()
    }

    fn apply_deletions(
        &self,
        state: &mut WriterState,
        deletions: &[(u64, Arc<dyn DocFilter>)],
    ) -> Result<()> {
        let reader_options = self.options.reader_options();
        let mut updated: Vec<(usize, SegmentMeta)> = Vec::new();
        for (i, segment) in state.segments.iter().enumerate() {
            let reader = self
                .reader_cache
                .get(&self.dir, segment, &reader_options)?;
            let gens = state.uncommitted_gens.get(&segment.name);
            let mut mask: DocMask = reader.mask().as_ref().clone();
            let before = mask.len();
            for (deletion_gen, filter) in deletions {
                let mut it = filter.matching(&reader)?;
                while it.next() {
                    let doc = it.value();
                    if !doc_limits::valid(doc) || doc > segment.docs_count {
                        break;
                    }
                    // documents written after the deletion stay visible
                    if let Some(gens) = gens {
                        if gens[(doc - doc_limits::MIN) as usize] > *deletion_gen {
                            continue;
                        }
                    }
                    mask.insert(doc);
                }
            }
            if mask.len() == before {
                continue;
            }
            let mut meta = segment.clone();
            meta.version += 1;
            meta.live_docs_count = meta.docs_count - mask.len() as u32;
            let mask_file = versioned_file(&meta.name, meta.version, extensions::DOC_MASK);
            let mut out = self.dir.create(&mask_file)?;
            write_doc_mask(&mut *out, &mask)?;
            out.close()?;
            meta.files.retain(|f| !f.ends_with(extensions::DOC_MASK));
            meta.files.push(mask_file);
            meta.write(&*self.dir)?;
            updated.push((i, meta));
        }
        for (i, meta) in updated {
            let mut pins = vec![self.refs.retain(&meta.meta_file())];
            pins.extend(self.refs.retain_all(meta.files.iter().map(String::as_str)));
            state.file_refs.insert(meta.name.clone(), pins);
            state.segments[i] = meta;
        }
        Ok(())
    }

    /// Merge the segments selected by `policy` into a new segment.
    ///
    /// Returns `false` when the policy selected nothing or the result had
    /// to be dropped because a concurrent commit removed a candidate.
    pub fn consolidate(&self, policy: &dyn ConsolidationPolicy) -> Result<bool> {
        // phase one: pick candidates under the consolidation lock
        let (candidates, name) = {
            let _guard = self.consolidation_lock.lock();
            let state = self.state.lock();
            let mut consolidating = self.consolidating.lock();
            let available: Vec<SegmentMeta> = state
                .segments
                .iter()
                .filter(|s| !consolidating.contains(&s.name))
                .cloned()
                .collect();
            drop(state);
            let selected = policy.select(&available);
            if selected.len() < 2 {
                return Ok(false);
            }
            let mut candidates = Vec::with_capacity(selected.len());
            for name in selected {
                let Some(meta) = available.iter().find(|s| s.name == name) else {
                    return Err(Error::IllegalArgument(format!(
                        "policy selected unknown segment '{name}'"
                    )));
                };
                consolidating.insert(name.clone());
                candidates.push(meta.clone());
            }
            drop(consolidating);
            let name = {
                let mut state = self.state.lock();
                state.counter += 1;
                format!("seg_{}", state.counter)
            };
            (candidates, name)
        };

        // phase two: merge outside every lock
        let result = (|| -> Result<Option<StagedConsolidation>> {
            let reader_options = self.options.reader_options();
            let mut readers = Vec::with_capacity(candidates.len());
            for meta in &candidates {
                readers.push(self.reader_cache.get(&self.dir, meta, &reader_options)?);
            }
            let merger = MergeWriter::new(
                readers,
                self.options.sort.clone(),
                self.options.cipher.clone(),
            );
            let Some(result) = merger.merge(&*self.dir, &name, None)? else {
                return Ok(None);
            };
            let mut merged = result.meta;
            merged.write(&*self.dir)?;
            Ok(Some(StagedConsolidation {
                candidates: candidates.iter().map(|c| (c.name.clone(), c.version)).collect(),
                merged,
                doc_maps: result.doc_maps,
            }))
        })();

        let staged = match result {
            Ok(Some(staged)) => staged,
            other => {
                let mut consolidating = self.consolidating.lock();
                for meta in &candidates {
                    consolidating.remove(&meta.name);
                }
                return other.map(|_| false);
            }
        };

        // phase three: install, or stage behind a mid-transaction commit
        let installed = {
            let commit = self.commit_state.lock();
            if commit.in_progress {
                self.staged.lock().push(staged);
                tracing::debug!("consolidation staged behind an in-progress commit");
                true
            } else {
                drop(commit);
                let mut state = self.state.lock();
                let installed = self.install_consolidation(&mut state, staged)?;
                drop(state);
                let mut consolidating = self.consolidating.lock();
                for meta in &candidates {
                    consolidating.remove(&meta.name);
                }
                installed
            }
        };
        Ok(installed)
    }

    /// Replace a consolidation's candidates with its merged segment,
    /// remapping any masks committed since the merge started.
    fn install_consolidation(
        &self,
        state: &mut WriterState,
        staged: StagedConsolidation,
    ) -> Result<bool> {
        // candidate set must be intact
        for (name, _) in &staged.candidates {
            if !state.segments.iter().any(|s| &s.name == name) {
                tracing::debug!(segment = %name, "consolidation dropped: candidate gone");
                let mut consolidating = self.consolidating.lock();
                for (name, _) in &staged.candidates {
                    consolidating.remove(name);
                }
                return Ok(false);
            }
        }

        // collect masks added after the merge snapshot
        let mut merged_mask = DocMask::new();
        for (input, (name, snapshot_version)) in staged.candidates.iter().enumerate() {
            let current = state
                .segments
                .iter()
                .find(|s| &s.name == name)
                .expect("checked above");
            if current.version == *snapshot_version {
                continue;
            }
            let snapshot_mask = match SegmentMeta::read(&*self.dir, name, *snapshot_version)
                .ok()
                .and_then(|m| m.mask_file())
            {
                Some(file) => {
                    let mut input = self.dir.open(&file, IoAdvice::ReadOnce)?;
                    read_doc_mask(&mut *input)?
                }
                None => DocMask::new(),
            };
            let current_mask = match current.mask_file() {
                Some(file) => {
                    let mut input = self.dir.open(&file, IoAdvice::ReadOnce)?;
                    read_doc_mask(&mut *input)?
                }
                None => DocMask::new(),
            };
            for doc in current_mask.difference(&snapshot_mask) {
                let new_doc = staged.doc_maps[input][(*doc - doc_limits::MIN) as usize];
                if !doc_limits::eof(new_doc) {
                    merged_mask.insert(new_doc);
                }
            }
        }

        let mut merged = staged.merged;
        if !merged_mask.is_empty() {
            merged.version += 1;
            merged.live_docs_count = merged.docs_count - merged_mask.len() as u32;
            let mask_file = versioned_file(&merged.name, merged.version, extensions::DOC_MASK);
            let mut out = self.dir.create(&mask_file)?;
            write_doc_mask(&mut *out, &merged_mask)?;
            out.close()?;
            merged.files.push(mask_file);
            merged.write(&*self.dir)?;
        }

        // drop candidates, adopt the merged segment
        let candidate_names: HashSet<String> =
            staged.candidates.iter().map(|(n, _)| n.clone()).collect();
        state.segments.retain(|s| !candidate_names.contains(&s.name));
        for name in &candidate_names {
            state.file_refs.remove(name);
        }
        let mut pins = vec![self.refs.retain(&merged.meta_file())];
        pins.extend(self.refs.retain_all(merged.files.iter().map(String::as_str)));
        state.file_refs.insert(merged.name.clone(), pins);
        tracing::debug!(segment = %merged.name, docs = merged.docs_count, "consolidation installed");
        state.segments.push(merged);

        let mut consolidating = self.consolidating.lock();
        for (name, _) in &staged.candidates {
            consolidating.remove(name);
        }
        Ok(true)
    }

    /// Remove every document and commit the empty index.
    pub fn clear(&self) -> Result<()> {
        {
            let mut commit = self.commit_state.lock();
            while commit.in_progress {
                self.commit_cv.wait(&mut commit);
            }
            commit.in_progress = true;
        }
        let result = (|| -> Result<()> {
            self.flush_all()?;
            self.flushed.lock().clear();
            self.deletions.lock().clear();
            let mut state = self.state.lock();
            state.segments.clear();
            state.file_refs.clear();
            let meta = IndexMeta {
                generation: state.committed.generation + 1,
                counter: state.counter,
                segments: Vec::new(),
                payload: Vec::new(),
            };
            let pending = meta.write_pending(&*self.dir)?;
            let committed_file = IndexMeta::committed_file(meta.generation);
            self.dir.rename(&pending, &committed_file)?;
            self.dir.sync(&[committed_file])?;
            state.committed = meta;
            drop(state);
            self.reader_cache.purge(&[]);
            Ok(())
        })();
        let mut commit = self.commit_state.lock();
        commit.in_progress = false;
        drop(commit);
        self.commit_cv.notify_all();
        result
    }
}

/// A batch of document insertions sharing one segment context.
///
/// A failed insertion poisons the batch: every document it added is masked
/// when the batch drops, and further insertions are rejected. The writer
/// itself stays usable.
pub struct DocBatch<'a> {
    writer: &'a IndexWriter,
    ctx_idx: usize,
    segment: Option<SegmentHandle>,
    batch_docs: Vec<DocId>,
    failed: bool,
    _shared: RwLockReadGuard<'a, ()>,
}

impl<'a> DocBatch<'a> {
    /// Insert one document; `fill` streams its fields.
    pub fn insert<F>(&mut self, fill: F) -> Result<()>
    where
        F: FnOnce(&mut Document<'_>) -> Result<()>,
    {
        if self.failed {
            return Err(Error::IllegalState(
                "batch already failed; documents will be rolled back".to_string(),
            ));
        }
        if self.segment.is_none() {
            self.segment = Some(self.writer.acquire_segment(self.ctx_idx));
        }
        let handle = self.segment.as_ref().expect("just acquired");
        let generation = self.writer.next_generation();
        let mut inner = handle.lock();
        let result = (|| -> Result<DocId> {
            let (mut doc, id) = Document::new(&mut inner.writer)?;
            fill(&mut doc)?;
            doc.done()?;
            Ok(id)
        })();
        match result {
            Ok(id) => {
                inner.doc_gens.push(generation);
                self.batch_docs.push(id);
                let force = inner.writer.docs_count() >= self.writer.options.segment_docs_max
                    || inner.writer.memory_used() >= self.writer.options.segment_memory_max;
                if force {
                    self.writer.flush_segment(&mut inner)?;
                    self.batch_docs.clear();
                }
                Ok(())
            }
            Err(err) => {
                // the document was rolled back; poison the batch
                inner.doc_gens.push(generation);
                self.failed = true;
                Err(err)
            }
        }
    }

    /// Queue a deletion with this batch's ordering.
    pub fn remove(&mut self, filter: Arc<dyn DocFilter>) {
        self.writer.remove(filter);
    }
}

impl Drop for DocBatch<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.segment.take() {
            if self.failed {
                let mut inner = handle.lock();
                for doc in self.batch_docs.drain(..) {
                    inner.writer.mask(doc);
                }
            }
            self.writer.release_segment(self.ctx_idx, handle);
        }
    }
}
