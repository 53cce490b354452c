//! Scoring: per-term/per-field statistic collection and score functions.
//!
//! Statistics are gathered once per `(segment, term)` during preparation;
//! the resulting [`ScoreFunction`] is consulted at match time with the
//! document's term frequency and optional norm.

/// Field-level statistics accumulated at prepare time.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldStats {
    /// Documents carrying the field anywhere in the index.
    pub docs_with_field: u64,
    /// Sum of per-term total frequencies (total tokens of the field).
    pub sum_total_freq: u64,
    /// Sum of per-term document frequencies.
    pub sum_doc_freq: u64,
    /// Total documents in the index.
    pub total_docs: u64,
}

/// Term-level statistics accumulated at prepare time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TermStats {
    /// Documents containing the term.
    pub docs_count: u64,
    /// Sum of the term's frequencies.
    pub total_freq: u64,
}

impl FieldStats {
    pub fn merge(&mut self, other: &FieldStats) {
        self.docs_with_field += other.docs_with_field;
        self.sum_total_freq += other.sum_total_freq;
        self.sum_doc_freq += other.sum_doc_freq;
        self.total_docs += other.total_docs;
    }
}

impl TermStats {
    pub fn merge(&mut self, other: &TermStats) {
        self.docs_count += other.docs_count;
        self.total_freq += other.total_freq;
    }
}

/// A compiled per-term score function.
pub struct ScoreFunction {
    f: Box<dyn Fn(u32, Option<f32>) -> f32 + Send + Sync>,
}

impl ScoreFunction {
    pub fn new(f: impl Fn(u32, Option<f32>) -> f32 + Send + Sync + 'static) -> Self {
        Self { f: Box::new(f) }
    }

    /// Constant score, independent of frequency.
    pub fn constant(value: f32) -> Self {
        Self::new(move |_, _| value)
    }

    #[inline]
    pub fn score(&self, freq: u32, norm: Option<f32>) -> f32 {
        (self.f)(freq, norm)
    }
}

/// A scorer compiles collected statistics into score functions.
///
/// Multiple scorers compose by summing their functions' outputs; see
/// [`ScoreFunction::merge_sum`].
pub trait Scorer: Send + Sync {
    /// Compile the score function for one term.
    fn prepare(&self, field: &FieldStats, term: &TermStats, boost: f32) -> ScoreFunction;

    /// True when the function consumes field-length norms.
    fn needs_norms(&self) -> bool {
        false
    }
}

impl ScoreFunction {
    /// Reduce several score functions into one by summation.
    pub fn merge_sum(functions: Vec<ScoreFunction>) -> ScoreFunction {
        ScoreFunction::new(move |freq, norm| {
            functions.iter().map(|f| f.score(freq, norm)).sum()
        })
    }
}

/// TF-IDF: `sqrt(freq) * idf * norm`, `idf = 1 + ln(N / (df + 1))`.
#[derive(Debug, Clone, Copy)]
pub struct TfIdf {
    pub with_norms: bool,
}

impl TfIdf {
    pub fn new(with_norms: bool) -> Self {
        Self { with_norms }
    }
}

impl Scorer for TfIdf {
    fn prepare(&self, field: &FieldStats, term: &TermStats, boost: f32) -> ScoreFunction {
        let idf = 1.0
            + ((field.total_docs as f32 + 1.0) / (term.docs_count as f32 + 1.0)).ln();
        let with_norms = self.with_norms;
        ScoreFunction::new(move |freq, norm| {
            let tf = (freq as f32).sqrt();
            let norm = if with_norms {
                norm.unwrap_or(1.0)
            } else {
                1.0
            };
            boost * tf * idf * norm
        })
    }

    fn needs_norms(&self) -> bool {
        self.with_norms
    }
}

/// Okapi BM25 with field-length normalization.
#[derive(Debug, Clone, Copy)]
pub struct Bm25 {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25 {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl Scorer for Bm25 {
    fn prepare(&self, field: &FieldStats, term: &TermStats, boost: f32) -> ScoreFunction {
        let n = field.total_docs as f32;
        let df = term.docs_count as f32;
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        let avg_dl = if field.docs_with_field > 0 {
            field.sum_total_freq as f32 / field.docs_with_field as f32
        } else {
            1.0
        };
        let (k1, b) = (self.k1, self.b);
        ScoreFunction::new(move |freq, norm| {
            // the norm column stores 1/sqrt(dl); recover dl from it
            let dl = match norm {
                Some(n) if n > 0.0 => 1.0 / (n * n),
                _ => avg_dl,
            };
            let tf = freq as f32;
            let denom = tf + k1 * (1.0 - b + b * dl / avg_dl.max(f32::EPSILON));
            boost * idf * tf * (k1 + 1.0) / denom.max(f32::EPSILON)
        })
    }

    fn needs_norms(&self) -> bool {
        true
    }
}
