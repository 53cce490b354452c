//! Union of iterators.
//!
//! Strategy is chosen by arity: one input passes through, two inputs use a
//! branch-explicit pair, small fans use a linear scan, and large fans use
//! a block-decoded variant that fills a 64-document window per round and
//! records per-document match counts (the basis of min-match).

use tessera_core::types::doc_limits;
use tessera_core::{DocId, DocIterator};

/// Inputs below this arity use the linear implementation.
const LINEAR_MAX: usize = 4;

/// Window width of the block-decoded implementation.
pub(crate) const BLOCK_WINDOW: u32 = 64;

/// Union with summed scores.
pub enum Disjunction<I: DocIterator> {
    One(I),
    Pair(PairDisjunction<I>),
    Linear(LinearDisjunction<I>),
    Block(BlockDisjunction<I>),
}

impl<I: DocIterator> Disjunction<I> {
    /// Build the strategy fitting `subs.len()`; empty input yields an
    /// immediately exhausted iterator.
    pub fn new(mut subs: Vec<I>) -> Self {
        match subs.len() {
            1 => Disjunction::One(subs.pop().expect("one element")),
            2 => {
                let b = subs.pop().expect("two elements");
                let a = subs.pop().expect("two elements");
                Disjunction::Pair(PairDisjunction::new(a, b))
            }
            n if n <= LINEAR_MAX => Disjunction::Linear(LinearDisjunction::new(subs)),
            _ => Disjunction::Block(BlockDisjunction::new(subs, 1)),
        }
    }
}

impl<I: DocIterator> DocIterator for Disjunction<I> {
    fn value(&self) -> DocId {
        match self {
            Disjunction::One(it) => it.value(),
            Disjunction::Pair(it) => it.value(),
            Disjunction::Linear(it) => it.value(),
            Disjunction::Block(it) => it.value(),
        }
    }

    fn next(&mut self) -> bool {
        match self {
            Disjunction::One(it) => it.next(),
            Disjunction::Pair(it) => it.next(),
            Disjunction::Linear(it) => it.next(),
            Disjunction::Block(it) => it.next(),
        }
    }

    fn seek(&mut self, target: DocId) -> DocId {
        match self {
            Disjunction::One(it) => it.seek(target),
            Disjunction::Pair(it) => it.seek(target),
            Disjunction::Linear(it) => it.seek(target),
            Disjunction::Block(it) => it.seek(target),
        }
    }

    fn cost(&self) -> u64 {
        match self {
            Disjunction::One(it) => it.cost(),
            Disjunction::Pair(it) => it.cost(),
            Disjunction::Linear(it) => it.cost(),
            Disjunction::Block(it) => it.cost(),
        }
    }

    fn score(&mut self) -> f32 {
        match self {
            Disjunction::One(it) => it.score(),
            Disjunction::Pair(it) => it.score(),
            Disjunction::Linear(it) => it.score(),
            Disjunction::Block(it) => it.score(),
        }
    }
}

/// Two-way union with an explicit branch on which side is current.
pub struct PairDisjunction<I: DocIterator> {
    left: I,
    right: I,
    left_started: bool,
    right_started: bool,
    value: DocId,
}

impl<I: DocIterator> PairDisjunction<I> {
    pub fn new(left: I, right: I) -> Self {
        Self {
            left,
            right,
            left_started: false,
            right_started: false,
            value: doc_limits::INVALID,
        }
    }

    fn settle(&mut self) -> DocId {
        let l = self.left.value();
        let r = self.right.value();
        self.value = match (doc_limits::eof(l), doc_limits::eof(r)) {
            (true, true) => doc_limits::EOF,
            (true, false) => r,
            (false, true) => l,
            (false, false) => l.min(r),
        };
        self.value
    }
}

impl<I: DocIterator> DocIterator for PairDisjunction<I> {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        // advance whichever side sits on the current value
        if !self.left_started {
            self.left_started = true;
            self.right_started = true;
            self.left.next();
            self.right.next();
        } else {
            if self.left.value() == self.value {
                self.left.next();
            }
            if self.right.value() == self.value {
                self.right.next();
            }
        }
        !doc_limits::eof(self.settle())
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        self.left_started = true;
        self.right_started = true;
        self.left.seek(target);
        self.right.seek(target);
        self.settle()
    }

    fn cost(&self) -> u64 {
        self.left.cost().saturating_add(self.right.cost())
    }

    fn score(&mut self) -> f32 {
        let mut score = 0.0;
        if self.left.value() == self.value {
            score += self.left.score();
        }
        if self.right.value() == self.value {
            score += self.right.score();
        }
        score
    }
}

/// Small-fan union scanning every sub-iterator for the minimum.
pub struct LinearDisjunction<I: DocIterator> {
    subs: Vec<I>,
    started: bool,
    value: DocId,
}

impl<I: DocIterator> LinearDisjunction<I> {
    pub fn new(subs: Vec<I>) -> Self {
        Self {
            subs,
            started: false,
            value: doc_limits::INVALID,
        }
    }

    fn settle(&mut self) -> DocId {
        self.value = self
            .subs
            .iter()
            .map(|s| s.value())
            .min()
            .unwrap_or(doc_limits::EOF);
        self.value
    }
}

impl<I: DocIterator> DocIterator for LinearDisjunction<I> {
    fn value(&self) -> DocId {
        self.value
    }

    fn next(&mut self) -> bool {
        if doc_limits::eof(self.value) {
            return false;
        }
        if !self.started {
            self.started = true;
            for sub in &mut self.subs {
                sub.next();
            }
        } else {
            let current = self.value;
            for sub in &mut self.subs {
                if sub.value() == current {
                    sub.next();
                }
            }
        }
        !doc_limits::eof(self.settle())
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        self.started = true;
        for sub in &mut self.subs {
            if sub.value() < target {
                sub.seek(target);
            }
        }
        self.settle()
    }

    fn cost(&self) -> u64 {
        self.subs.iter().map(|s| s.cost()).fold(0, u64::saturating_add)
    }

    fn score(&mut self) -> f32 {
        let current = self.value;
        self.subs
            .iter_mut()
            .filter(|s| s.value() == current)
            .map(|s| s.score())
            .sum()
    }
}

/// Large-fan union decoding matches in 64-document windows.
///
/// Each refill drains every sub-iterator through the window
/// `[base, base + 64)`, recording a presence bit, a match count, and the
/// accumulated score per slot. [`BlockDisjunction::match_count`] reports
/// how many sub-iterators matched the current document.
pub struct BlockDisjunction<I: DocIterator> {
    subs: Vec<I>,
    started: bool,
    /// First document of the current window.
    base: DocId,
    bits: u64,
    counts: [u8; BLOCK_WINDOW as usize],
    scores: [f32; BLOCK_WINDOW as usize],
    /// Slot of the current document, or `BLOCK_WINDOW` before positioning.
    slot: u32,
    value: DocId,
}

impl<I: DocIterator> BlockDisjunction<I> {
    /// `windows` is accepted for compatibility with callers tuning window
    /// counts; the implementation always fills one 64-document window.
    pub fn new(subs: Vec<I>, _windows: u32) -> Self {
        Self {
            subs,
            started: false,
            base: doc_limits::MIN,
            bits: 0,
            counts: [0; BLOCK_WINDOW as usize],
            scores: [0.0; BLOCK_WINDOW as usize],
            slot: BLOCK_WINDOW,
            value: doc_limits::INVALID,
        }
    }

    /// Matching sub-iterators of the current document.
    pub fn match_count(&self) -> u32 {
        if self.slot < BLOCK_WINDOW {
            u32::from(self.counts[self.slot as usize])
        } else {
            0
        }
    }

    fn start(&mut self) {
        if !self.started {
            self.started = true;
            for sub in &mut self.subs {
                sub.next();
            }
            self.subs.retain(|s| !doc_limits::eof(s.value()));
        }
    }

    pub(crate) fn alive(&self) -> usize {
        self.subs.len()
    }

    /// Fill the window starting at the smallest pending document.
    ///
    /// `stop_fill` lets min-match abandon the remaining sub-iterators of a
    /// window once no slot can reach the required count; counts then
    /// under-report.
    pub(crate) fn refill<F>(&mut self, from: DocId, mut stop_fill: F) -> bool
    where
        F: FnMut(&[u8; BLOCK_WINDOW as usize], usize, usize) -> bool,
    {
        self.start();
        let min = self
            .subs
            .iter()
            .map(|s| s.value())
            .filter(|&v| !doc_limits::eof(v))
            .min();
        let Some(min) = min else {
            self.value = doc_limits::EOF;
            return false;
        };
        self.base = min.max(from);
        self.bits = 0;
        self.counts = [0; BLOCK_WINDOW as usize];
        self.scores = [0.0; BLOCK_WINDOW as usize];
        self.slot = BLOCK_WINDOW;

        let end = self.base.saturating_add(BLOCK_WINDOW);
        let total = self.subs.len();
        for i in 0..total {
            if stop_fill(&self.counts, i, total) {
                break;
            }
            let sub = &mut self.subs[i];
            let mut doc = sub.value();
            if doc < self.base {
                doc = sub.seek(self.base);
            }
            while doc < end {
                let slot = (doc - self.base) as usize;
                self.bits |= 1u64 << slot;
                self.counts[slot] = self.counts[slot].saturating_add(1);
                self.scores[slot] += sub.score();
                if !sub.next() {
                    break;
                }
                doc = sub.value();
            }
        }
        self.subs.retain(|s| !doc_limits::eof(s.value()));
        true
    }

    fn position_in_window(&mut self, from_slot: u32) -> bool {
        let masked = if from_slot >= BLOCK_WINDOW {
            0
        } else {
            self.bits & (!0u64 << from_slot)
        };
        if masked == 0 {
            return false;
        }
        self.slot = masked.trailing_zeros();
        self.value = self.base + self.slot;
        true
    }

    pub(crate) fn advance<F>(&mut self, target: DocId, mut stop_fill: F) -> bool
    where
        F: FnMut(&[u8; BLOCK_WINDOW as usize], usize, usize) -> bool,
    {
        // within the current window first
        if self.started && self.slot <= BLOCK_WINDOW && target >= self.base {
            let from_slot = target - self.base;
            if from_slot < BLOCK_WINDOW && self.position_in_window(from_slot) {
                return true;
            }
        }
        let mut from = target;
        loop {
            if !self.refill(from, &mut stop_fill) {
                return false;
            }
            if self.position_in_window(target.saturating_sub(self.base).min(BLOCK_WINDOW)) {
                return true;
            }
            // an entirely pruned or empty window; continue past it
            from = self.base.saturating_add(BLOCK_WINDOW);
            if from == doc_limits::EOF {
                self.value = doc_limits::EOF;
                return false;
            }
        }
    }
}

impl<I: DocIterator> DocIterator for BlockDisjunction<I> {
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
        if !self.advance(target, |_, _, _| false) {
            self.value = doc_limits::EOF;
            return false;
        }
        true
    }

    fn seek(&mut self, target: DocId) -> DocId {
        if doc_limits::eof(self.value) || target <= self.value {
            return self.value;
        }
        if !self.advance(target, |_, _, _| false) {
            self.value = doc_limits::EOF;
        }
        self.value
    }

    fn cost(&self) -> u64 {
        self.subs.iter().map(|s| s.cost()).fold(0, u64::saturating_add)
    }

    fn score(&mut self) -> f32 {
        if self.slot < BLOCK_WINDOW {
            self.scores[self.slot as usize]
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// Deterministic iterator over a fixed document list.
    pub struct VecIterator {
        docs: Vec<DocId>,
        at: Option<usize>,
        exhausted: bool,
        score: f32,
    }

    impl VecIterator {
        pub fn new(docs: Vec<DocId>) -> Self {
            Self {
                docs,
                at: None,
                exhausted: false,
                score: 1.0,
            }
        }

        pub fn with_score(mut self, score: f32) -> Self {
            self.score = score;
            self
        }
    }

    impl DocIterator for VecIterator {
        fn value(&self) -> DocId {
            if self.exhausted {
                doc_limits::EOF
            } else {
                match self.at {
                    Some(i) => self.docs[i],
                    None => doc_limits::INVALID,
                }
            }
        }

        fn next(&mut self) -> bool {
            if self.exhausted {
                return false;
            }
            let next = self.at.map_or(0, |i| i + 1);
            if next >= self.docs.len() {
                self.exhausted = true;
                false
            } else {
                self.at = Some(next);
                true
            }
        }

        fn seek(&mut self, target: DocId) -> DocId {
            if self.exhausted {
                return doc_limits::EOF;
            }
            if let Some(i) = self.at {
                if target <= self.docs[i] {
                    return self.docs[i];
                }
            }
            let from = self.at.map_or(0, |i| i + 1);
            let pos = from + self.docs[from..].partition_point(|&d| d < target);
            if pos >= self.docs.len() {
                self.exhausted = true;
                doc_limits::EOF
            } else {
                self.at = Some(pos);
                self.docs[pos]
            }
        }

        fn cost(&self) -> u64 {
            self.docs.len() as u64
        }

        fn score(&mut self) -> f32 {
            self.score
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::VecIterator;
    use super::*;

    fn collect<I: DocIterator>(mut it: I) -> Vec<DocId> {
        let mut out = Vec::new();
        while it.next() {
            out.push(it.value());
        }
        out
    }

    #[test]
    fn test_single_input_passthrough() {
        let it = Disjunction::new(vec![VecIterator::new(vec![2, 5, 9])]);
        assert_eq!(collect(it), vec![2, 5, 9]);
    }

    #[test]
    fn test_pair_union() {
        let it = Disjunction::new(vec![
            VecIterator::new(vec![1, 4, 9]),
            VecIterator::new(vec![2, 4, 10]),
        ]);
        assert_eq!(collect(it), vec![1, 2, 4, 9, 10]);
    }

    #[test]
    fn test_pair_seek_and_score() {
        let mut it = Disjunction::new(vec![
            VecIterator::new(vec![1, 4, 9]).with_score(1.0),
            VecIterator::new(vec![2, 4, 10]).with_score(2.0),
        ]);
        assert_eq!(it.seek(3), 4);
        // both sides match doc 4
        assert!((it.score() - 3.0).abs() < 1e-6);
        assert_eq!(it.seek(10), 10);
        assert!((it.score() - 2.0).abs() < 1e-6);
        assert_eq!(it.seek(11), doc_limits::EOF);
    }

    #[test]
    fn test_linear_union() {
        let it = Disjunction::new(vec![
            VecIterator::new(vec![1, 8]),
            VecIterator::new(vec![2, 8]),
            VecIterator::new(vec![3, 9]),
        ]);
        assert_eq!(collect(it), vec![1, 2, 3, 8, 9]);
    }

    #[test]
    fn test_block_union_matches_linear() {
        let inputs: Vec<Vec<DocId>> = (0..8)
            .map(|i| (1..200).filter(|d| d % (i + 2) == 0).collect())
            .collect();
        let mut expected: Vec<DocId> = inputs.iter().flatten().copied().collect();
        expected.sort_unstable();
        expected.dedup();

        let it = Disjunction::new(inputs.into_iter().map(VecIterator::new).collect());
        assert!(matches!(it, Disjunction::Block(_)));
        assert_eq!(collect(it), expected);
    }

    #[test]
    fn test_block_match_counts() {
        let mut it = BlockDisjunction::new(
            vec![
                VecIterator::new(vec![5, 70, 200]),
                VecIterator::new(vec![5, 70]),
                VecIterator::new(vec![5, 200]),
            ],
            1,
        );
        assert_eq!(it.seek(1), 5);
        assert_eq!(it.match_count(), 3);
        assert!(it.next());
        assert_eq!(it.value(), 70);
        assert_eq!(it.match_count(), 2);
        assert!(it.next());
        assert_eq!(it.value(), 200);
        assert_eq!(it.match_count(), 2);
        assert!(!it.next());
    }

    #[test]
    fn test_block_scores_accumulate() {
        let mut it = BlockDisjunction::new(
            vec![
                VecIterator::new(vec![10]).with_score(1.0),
                VecIterator::new(vec![10]).with_score(0.5),
            ],
            1,
        );
        assert_eq!(it.seek(1), 10);
        assert!((it.score() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_terminal_eof() {
        let mut it = Disjunction::new(vec![VecIterator::new(vec![3])]);
        assert_eq!(it.seek(4), doc_limits::EOF);
        assert!(!it.next());
        assert_eq!(it.seek(1), doc_limits::EOF);
    }
}
