//! Disjunction emitting only documents matched by at least `k` inputs.

use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator};

use crate::disjunction::BlockDisjunction;

/// Window-eviction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinMatchMode {
    /// Every window is filled from every input; match counts are exact.
    #[default]
    Exact,
    /// Window filling stops once every slot has either reached `k` or
    /// provably cannot. The emitted document set is unchanged, but match
    /// counts (and scores) of emitted documents may under-report.
    EarlyPruning,
}

/// Precision of [`MinMatchIterator::match_count`] under the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCountPrecision {
    Exact,
    /// The reported count is a lower bound of at least `min_match`.
    AtLeast,
}

/// Documents matched by at least `min_match` of the sub-iterators.
pub struct MinMatchIterator<I: DocIterator> {
    block: BlockDisjunction<I>,
    min_match: u32,
    mode: MinMatchMode,
    value: DocId,
}

impl<I: DocIterator> MinMatchIterator<I> {
    pub fn new(subs: Vec<I>, min_match: u32, mode: MinMatchMode) -> Self {
        debug_assert!(min_match >= 1);
        Self {
            block: BlockDisjunction::new(subs, 1),
            min_match,
            mode,
            value: doc_limits::INVALID,
        }
    }

    pub fn mode(&self) -> MinMatchMode {
        self.mode
    }

    /// Part of the iterator contract: how trustworthy `match_count` is.
    pub fn precision(&self) -> MatchCountPrecision {
        match self.mode {
            MinMatchMode::Exact => MatchCountPrecision::Exact,
            MinMatchMode::EarlyPruning => MatchCountPrecision::AtLeast,
        }
    }

    /// Matching inputs of the current document; see [`Self::precision`].
    pub fn match_count(&self) -> u32 {
        self.block.match_count()
    }

    fn advance(&mut self, mut target: DocId) -> bool {
        let k = self.min_match;
        let prune = self.mode == MinMatchMode::EarlyPruning;
        loop {
            if self.block.alive() < k as usize {
                // not enough inputs left for any further match
                self.value = doc_limits::EOF;
                return false;
            }
            let advanced = self.block.advance(target, |counts, processed, total| {
                if !prune {
                    return false;
                }
                let remaining = (total - processed) as u32;
                counts
                    .iter()
                    .all(|&c| u32::from(c) >= k || u32::from(c) + remaining < k)
            });
            if !advanced {
                self.value = doc_limits::EOF;
                return false;
            }
            if self.block.match_count() >= k {
                self.value = self.block.value();
                return true;
            }
            target = self.block.value() + 1;
        }
    }
}

impl<I: DocIterator> DocIterator for MinMatchIterator<I> {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        let target = if self.value == doc_limits::INVALID {
            doc_limits::MIN
        } else {
            self.value + 1
        };
        self.advance(target)
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        self.advance(target);
        self.value
    }

    fn cost(&self) -> u64 {
        self.block.cost()
    }

    fn score(&mut self) -> f32 {
        self.block.score()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disjunction::tests_support::VecIterator;

    fn inputs() -> Vec<VecIterator> {
        vec![
            VecIterator::new(vec![1, 2, 5, 100, 300]),
            VecIterator::new(vec![2, 5, 7, 100]),
            VecIterator::new(vec![2, 5, 100, 300]),
            VecIterator::new(vec![3, 100]),
        ]
    }

    fn collect<I: DocIterator>(mut it: MinMatchIterator<I>) -> Vec<(DocId, u32)> {
        let mut out = Vec::new();
        while it.next() {
            out.push((it.value(), it.match_count()));
        }
        out
    }

    #[test]
    fn test_exact_mode() {
        let it = MinMatchIterator::new(inputs(), 3, MinMatchMode::Exact);
        assert_eq!(it.precision(), MatchCountPrecision::Exact);
        let hits = collect(it);
        assert_eq!(hits, vec![(2, 3), (5, 3), (100, 4)]);
    }

    #[test]
    fn test_min_match_one_equals_union() {
        let it = MinMatchIterator::new(inputs(), 1, MinMatchMode::Exact);
        let docs: Vec<DocId> = collect(it).into_iter().map(|(d, _)| d).collect();
        assert_eq!(docs, vec![1, 2, 3, 5, 7, 100, 300]);
    }

    #[test]
    fn test_early_pruning_same_documents() {
        let exact = MinMatchIterator::new(inputs(), 3, MinMatchMode::Exact);
        let pruned = MinMatchIterator::new(inputs(), 3, MinMatchMode::EarlyPruning);
        let exact_docs: Vec<DocId> = collect(exact).into_iter().map(|(d, _)| d).collect();
        let pruned_hits = collect(pruned);
        let pruned_docs: Vec<DocId> = pruned_hits.iter().map(|&(d, _)| d).collect();
        assert_eq!(exact_docs, pruned_docs);
        // counts are a lower bound, never below the threshold
        for (_, count) in pruned_hits {
            assert!(count >= 3);
        }
    }

    #[test]
    fn test_seek() {
        let mut it = MinMatchIterator::new(inputs(), 2, MinMatchMode::Exact);
        assert_eq!(it.seek(3), 5);
        assert_eq!(it.seek(101), 300);
        assert_eq!(it.seek(301), doc_limits::EOF);
    }

    #[test]
    fn test_unreachable_threshold() {
        let mut it = MinMatchIterator::new(inputs(), 5, MinMatchMode::Exact);
        assert!(!it.next());
    }
}
