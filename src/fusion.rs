//! Reciprocal Rank Fusion: score = Σ 1/(k + rank + 1), rank 0-based.
//!
//! Combines dense and lexical rankings for every query variant without
//! normalizing their raw scores against each other.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Fuse ranked id lists. Ids absent from every list are absent from the
/// output. Ties keep first-seen order.
pub fn rrf_fuse(rankings: &[Vec<String>], k: u32) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();

    for ranking in rankings {
        for (rank, id) in ranking.iter().enumerate() {
            let rrf = 1.0 / (k as f64 + rank as f64 + 1.0);
            let entry = scores.entry(id.as_str()).or_insert_with(|| {
                first_seen.push(id.as_str());
                0.0
            });
            *entry += rrf;
        }
    }

    let mut fused: Vec<(String, f64)> = first_seen
        .into_iter()
        .map(|id| (id.to_string(), scores.get(id).copied().unwrap_or(0.0)))
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    fused
}

/// Ids only, in fused order.
pub fn rrf_ids(rankings: &[Vec<String>], k: u32) -> Vec<String> {
    rrf_fuse(rankings, k).into_iter().map(|(id, _)| id).collect()
}
