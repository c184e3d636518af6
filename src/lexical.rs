//! BM25 lexical ranking over chunk indexing text.
//!
//! The index keeps the tokenized corpus so it can be persisted as plain
//! JSON and rebuilt on load; term statistics are always derived from it.
//! `corpus[i]` belongs to `ids[i]`.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::error::IndexError;

const BM25_K1: f32 = 1.5;
const BM25_B: f32 = 0.75;

/// Lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Term statistics derived from a tokenized corpus.
#[derive(Debug, Clone)]
struct Bm25 {
    doc_freqs: HashMap<String, usize>,
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f32,
}

impl Bm25 {
    fn new(corpus: &[Vec<String>]) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_lens = Vec::with_capacity(corpus.len());

        for doc in corpus {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in doc {
                *tf.entry(token.clone()).or_default() += 1;
            }
            for token in tf.keys() {
                *doc_freqs.entry(token.clone()).or_default() += 1;
            }
            term_freqs.push(tf);
            doc_lens.push(doc.len());
        }

        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f32 / doc_lens.len() as f32
        };

        Self {
            doc_freqs,
            term_freqs,
            doc_lens,
            avg_doc_len,
        }
    }

    fn score(&self, query_tokens: &[String], doc: usize) -> f32 {
        let (Some(tf_map), Some(&doc_len)) = (self.term_freqs.get(doc), self.doc_lens.get(doc)) else {
            return 0.0;
        };
        if doc_len == 0 {
            return 0.0;
        }
        let n = self.term_freqs.len() as f32;
        let length_norm = BM25_B.mul_add(doc_len as f32 / self.avg_doc_len.max(1.0), 1.0 - BM25_B);

        let mut score = 0.0;
        let mut seen = HashSet::new();
        for token in query_tokens {
            if !seen.insert(token) {
                continue;
            }
            let Some(&tf) = tf_map.get(token) else {
                continue;
            };
            let df = *self.doc_freqs.get(token).unwrap_or(&0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5)).ln_1p().max(0.0);
            let tf = tf as f32;
            let denom = BM25_K1.mul_add(length_norm, tf);
            if denom > 0.0 {
                score += idf * (tf * (BM25_K1 + 1.0) / denom);
            }
        }
        score
    }
}

#[derive(Debug, Clone)]
pub struct LexicalIndex {
    ids: Vec<String>,
    corpus: Vec<Vec<String>>,
    bm25: Bm25,
}

impl LexicalIndex {
    /// Build from aligned id and token lists.
    pub fn new(ids: Vec<String>, corpus: Vec<Vec<String>>) -> Result<Self, IndexError> {
        if ids.len() != corpus.len() {
            return Err(IndexError::Misaligned(format!(
                "{} lexical ids for {} token lists",
                ids.len(),
                corpus.len()
            )));
        }
        let bm25 = Bm25::new(&corpus);
        Ok(Self { ids, corpus, bm25 })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn corpus(&self) -> &[Vec<String>] {
        &self.corpus
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Top `k` chunk ids by descending BM25 score. Documents sharing no
    /// term with the query are omitted; ties keep corpus order.
    pub fn search(&self, query: &str, k: usize) -> Vec<(String, f32)> {
        let tokens = tokenize(query);
        if tokens.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = (0..self.ids.len())
            .map(|i| (i, self.bm25.score(&tokens, i)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, s)| (self.ids[i].clone(), s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[&str]) -> LexicalIndex {
        let ids = (0..docs.len()).map(|i| format!("c{}", i)).collect();
        let corpus = docs.iter().map(|d| tokenize(d)).collect();
        LexicalIndex::new(ids, corpus).unwrap()
    }

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Export: CSV/JSON, v2!"), vec!["export", "csv", "json", "v2"]);
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn ranks_matching_doc_first() {
        let idx = index(&[
            "Overview of the product",
            "Getting started with installation",
            "Export CSV and JSON are supported",
        ]);
        let hits = idx.search("What export formats are supported?", 3);
        assert_eq!(hits[0].0, "c2");
        assert!(hits.iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn rare_terms_weigh_more() {
        let idx = index(&["backup backup settings", "settings menu", "settings panel"]);
        let hits = idx.search("backup settings", 3);
        assert_eq!(hits[0].0, "c0");
    }

    #[test]
    fn respects_k_and_empty_query() {
        let idx = index(&["alpha", "alpha beta", "alpha gamma"]);
        assert_eq!(idx.search("alpha", 2).len(), 2);
        assert!(idx.search("", 5).is_empty());
        assert!(idx.search("zeta", 5).is_empty());
    }

    #[test]
    fn misaligned_rejected() {
        let err = LexicalIndex::new(vec!["a".into()], vec![]).unwrap_err();
        assert!(matches!(err, IndexError::Misaligned(_)));
    }
}
