//! Sorted intersection of iterators.

use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator};

/// Intersection of every sub-iterator.
///
/// The cheapest iterator leads; the others follow via `seek`. The score of
/// a match is the sum of the sub-iterators' scores.
pub struct Conjunction<I: DocIterator> {
    /// Sorted by ascending cost; element 0 leads.
    subs: Vec<I>,
    value: DocId,
}

impl<I: DocIterator> Conjunction<I> {
    pub fn new(mut subs: Vec<I>) -> Self {
        debug_assert!(!subs.is_empty());
        subs.sort_by_key(|s| s.cost());
        Self {
            subs,
            value: doc_limits::INVALID,
        }
    }

    /// Align every follower on the lead's candidate; advances the lead
    /// past misses. Returns the agreed document or `EOF`.
    fn converge(&mut self, mut candidate: DocId) -> DocId {
        if doc_limits::eof(candidate) {
            self.value = doc_limits::EOF;
            return self.value;
        }
        'outer: loop {
            for i in 1..self.subs.len() {
                let at = self.subs[i].seek(candidate);
                if at != candidate {
                    if doc_limits::eof(at) {
                        self.value = doc_limits::EOF;
                        return self.value;
                    }
                    candidate = self.subs[0].seek(at);
                    if doc_limits::eof(candidate) {
                        self.value = doc_limits::EOF;
                        return self.value;
                    }
                    continue 'outer;
                }
            }
            self.value = candidate;
            return self.value;
        }
    }
}

impl<I: DocIterator> DocIterator for Conjunction<I> {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        if !self.subs[0].next() {
            self.value = doc_limits::EOF;
            return false;
        }
        let candidate = self.subs[0].value();
        !doc_limits::eof(self.converge(candidate))
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        let candidate = self.subs[0].seek(target);
        self.converge(candidate)
    }

    fn cost(&self) -> u64 {
        self.subs.first().map_or(0, |s| s.cost())
    }

    fn score(&mut self) -> f32 {
        self.subs.iter_mut().map(|s| s.score()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disjunction::tests_support::VecIterator;

    #[test]
    fn test_intersection() {
        let a = VecIterator::new(vec![1, 3, 5, 7, 9, 11]);
        let b = VecIterator::new(vec![3, 4, 5, 9, 12]);
        let c = VecIterator::new(vec![1, 3, 9, 11]);
        let mut it = Conjunction::new(vec![a, b, c]);
        let mut seen = Vec::new();
        while it.next() {
            seen.push(it.value());
        }
        assert_eq!(seen, vec![3, 9]);
        assert!(!it.next());
        assert_eq!(it.value(), doc_limits::EOF);
    }

    #[test]
    fn test_seek() {
        let a = VecIterator::new(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let b = VecIterator::new(vec![2, 4, 6, 8]);
        let mut it = Conjunction::new(vec![a, b]);
        assert_eq!(it.seek(3), 4);
        assert_eq!(it.seek(4), 4);
        assert_eq!(it.seek(7), 8);
        assert_eq!(it.seek(9), doc_limits::EOF);
    }

    #[test]
    fn test_disjoint_inputs() {
        let a = VecIterator::new(vec![1, 3, 5]);
        let b = VecIterator::new(vec![2, 4, 6]);
        let mut it = Conjunction::new(vec![a, b]);
        assert!(!it.next());
    }

    #[test]
    fn test_score_sums() {
        let a = VecIterator::new(vec![2, 4]).with_score(1.5);
        let b = VecIterator::new(vec![2, 4]).with_score(2.0);
        let mut it = Conjunction::new(vec![a, b]);
        assert!(it.next());
        assert!((it.score() - 3.5).abs() < 1e-6);
    }
}
