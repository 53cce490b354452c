//! Query evaluation: filters, scorers, and the iterator compositions they
//! reduce to.
//!
//! A [`Filter`](filter::Filter) is prepared once against an index reader
//! (collecting statistics), then executed per segment to yield a
//! [`DocIterator`](tessera_core::DocIterator). The compositions
//! (conjunction, the disjunction family, min-match, phrase) operate on
//! iterators only and are agnostic of what produced them.

pub mod all;
pub mod automaton;
pub mod boolean;
pub mod conjunction;
pub mod disjunction;
pub mod filter;
pub mod iter_utils;
pub mod min_match;
pub mod phrase;
pub mod range;
pub mod score;
pub mod term_query;

pub use all::{AllFilter, ColumnExistenceFilter};
pub use boolean::{AndFilter, OrFilter};
pub use conjunction::Conjunction;
pub use disjunction::Disjunction;
pub use filter::{Filter, FilterDeleter, PrepareContext, PreparedFilter};
pub use min_match::{MatchCountPrecision, MinMatchIterator, MinMatchMode};
pub use phrase::{PhraseFilter, PhraseSlot};
pub use range::{PrefixFilter, RangeFilter, WildcardFilter};
pub use score::{Bm25, FieldStats, ScoreFunction, Scorer, TermStats, TfIdf};
pub use term_query::TermFilter;
