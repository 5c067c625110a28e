//! Math-1 lexical layer: BM25 over artifact content and tags.
//!
//! This is the cheap prefilter in front of the vector stages. The index
//! is built per query over the candidate pool (document statistics come
//! from the pool, not a global corpus), which keeps it O(n) to build and
//! O(terms) to score — well within the Math-1 budget.

use crate::types::MemoryArtifact;
use std::collections::HashMap;
use uuid::Uuid;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// Lowercase alphanumeric tokens with light suffix folding.
///
/// Folding strips a single trailing `s` from longer tokens so plural
/// and third-person forms ("databases", "supports") match their stems.
/// Applied to both documents and queries, so it only ever needs to be
/// consistent, not linguistically correct.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(fold_suffix)
        .collect()
}

fn fold_suffix(token: &str) -> String {
    if token.len() >= 4 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

struct IndexedDoc {
    artifact_id: Uuid,
    term_freq: HashMap<String, usize>,
    length: usize,
}

/// BM25 index over a candidate pool.
pub struct Bm25Index {
    docs: Vec<IndexedDoc>,
    doc_freq: HashMap<String, usize>,
    avg_length: f64,
}

impl Bm25Index {
    /// Build an index over artifacts. Tags are indexed alongside
    /// content so tag-only queries still match.
    #[must_use]
    pub fn build(artifacts: &[MemoryArtifact]) -> Self {
        let mut docs = Vec::with_capacity(artifacts.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        for artifact in artifacts {
            let mut tokens = tokenize(&artifact.content);
            for tag in &artifact.tags {
                tokens.extend(tokenize(tag));
            }
            let mut term_freq: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *term_freq.entry(token.clone()).or_default() += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            total_length += tokens.len();
            docs.push(IndexedDoc {
                artifact_id: artifact.id,
                term_freq,
                length: tokens.len(),
            });
        }

        let avg_length = if docs.is_empty() {
            0.0
        } else {
            total_length as f64 / docs.len() as f64
        };

        Self {
            docs,
            doc_freq,
            avg_length,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document against a query, descending, id-tiebroken.
    /// Documents scoring zero are omitted.
    #[must_use]
    pub fn score(&self, query: &str) -> Vec<(Uuid, f64)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.docs.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(Uuid, f64)> = self
            .docs
            .iter()
            .filter_map(|doc| {
                let mut score = 0.0_f64;
                for term in &query_terms {
                    let tf = doc.term_freq.get(term).copied().unwrap_or(0) as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let idf = self.idf(term);
                    let norm = 1.0 - BM25_B + BM25_B * (doc.length as f64 / self.avg_length);
                    score += idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm);
                }
                (score > 0.0).then_some((doc.artifact_id, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored
    }

    /// Top-k helper over [`score`](Self::score).
    #[must_use]
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(Uuid, f64)> {
        let mut scored = self.score(query);
        scored.truncate(k);
        scored
    }
}
