//! Lexical scoring for the sparse retrieval channel.
//!
//! The index builds a [`SparseCorpus`] (term statistics) per collection when
//! a document version is added; a [`SparseScorer`] turns a query into one
//! score per corpus entry. Scorers are injectable so the lexical channel can
//! be backed by something other than the built-in [`Bm25Scorer`].

use std::collections::HashMap;

use crate::error::Result;
use crate::text::tokenize;

/// Term statistics for one entry of a [`SparseCorpus`].
#[derive(Debug, Clone)]
pub struct SparseEntry {
    /// Record id (chunk or block id).
    pub id: String,

    /// Number of tokens in the entry.
    pub length: usize,

    /// Term frequencies.
    pub terms: HashMap<String, u32>,
}

/// Tokenized texts plus corpus-wide document frequencies.
#[derive(Debug, Clone, Default)]
pub struct SparseCorpus {
    entries: Vec<SparseEntry>,
    doc_freq: HashMap<String, usize>,
    avg_length: f32,
}

impl SparseCorpus {
    /// Build a corpus from `(id, text)` pairs, keeping their order.
    pub fn build<'a>(texts: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut entries = Vec::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for (id, text) in texts {
            let tokens = tokenize(text);
            let mut terms: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *terms.entry(token.clone()).or_default() += 1;
            }
            for term in terms.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            entries.push(SparseEntry {
                id: id.to_string(),
                length: tokens.len(),
                terms,
            });
        }

        let total: usize = entries.iter().map(|e| e.length).sum();
        let avg_length = if entries.is_empty() {
            0.0
        } else {
            total as f32 / entries.len() as f32
        };

        Self {
            entries,
            doc_freq,
            avg_length,
        }
    }

    /// Entries in build order.
    pub fn entries(&self) -> &[SparseEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the corpus has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries containing `term`.
    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    /// Mean entry length in tokens.
    pub fn avg_length(&self) -> f32 {
        self.avg_length
    }
}

/// A lexical scoring function.
pub trait SparseScorer: Send + Sync {
    /// Scorer name for diagnostics.
    fn name(&self) -> &str;

    /// Score every corpus entry against `query`, in corpus order.
    fn score(&self, corpus: &SparseCorpus, query: &str) -> Result<Vec<f32>>;

    /// Whether the scorer can currently serve queries.
    fn is_available(&self) -> bool {
        true
    }
}

/// Okapi BM25.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Scorer {
    k1: f32,
    b: f32,
}

impl Bm25Scorer {
    /// Create a scorer with explicit parameters.
    pub fn new(k1: f32, b: f32) -> Self {
        Self { k1, b }
    }

    /// `ln((N - df + 0.5) / (df + 0.5) + 1)`, always positive.
    fn idf(n: usize, df: usize) -> f32 {
        let n = n as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

impl Default for Bm25Scorer {
    fn default() -> Self {
        Self::new(1.2, 0.75)
    }
}

impl SparseScorer for Bm25Scorer {
    fn name(&self) -> &str {
        "bm25"
    }

    fn score(&self, corpus: &SparseCorpus, query: &str) -> Result<Vec<f32>> {
        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let n = corpus.len();
        let avg = corpus.avg_length().max(1.0);
        let idfs: Vec<(String, f32)> = query_terms
            .into_iter()
            .filter_map(|term| match corpus.doc_freq(&term) {
                0 => None,
                df => Some((term, Self::idf(n, df))),
            })
            .collect();

        Ok(corpus
            .entries()
            .iter()
            .map(|entry| {
                let norm = self.k1 * (1.0 - self.b + self.b * entry.length as f32 / avg);
                idfs.iter()
                    .filter_map(|(term, idf)| {
                        let tf = *entry.terms.get(term)? as f32;
                        Some(idf * tf * (self.k1 + 1.0) / (tf + norm))
                    })
                    .sum::<f32>()
            })
            .collect())
    }
}
