//! Multi-query expansion.
//!
//! The generator proposes paraphrases of the user's question; near
//! duplicates are dropped with an order-insensitive fuzzy ratio so that
//! each variant contributes distinct rankings to fusion. The original
//! query always comes first, and any generator failure degrades to the
//! original query alone.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::generate::Generator;
use crate::prompts::{fill, MULTI_QUERY_EXPAND};

static LINE_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[-*•]|\d+[.)]|\(\d+\))\s*").expect("marker regex"));

/// Order-insensitive similarity in `0..=100`: tokens are lowercased,
/// stripped of punctuation, sorted, and compared by indel ratio.
pub fn token_sort_ratio(a: &str, b: &str) -> u8 {
    let a = sorted_tokens(a);
    let b = sorted_tokens(b);
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 100;
    }
    let lcs = lcs_len(&a, &b);
    ((200 * lcs) as f64 / total as f64).round() as u8
}

fn sorted_tokens(s: &str) -> String {
    let lowered = s.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Longest common subsequence length over chars.
fn lcs_len(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Candidate paraphrases from raw generator output, one per line.
fn candidate_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(|line| {
            let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
            LINE_MARKER_RE
                .replace(&collapsed, "")
                .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Original query first, then up to `max_variants` paraphrases whose
/// similarity to every accepted variant is below `threshold`.
pub fn dedup_variants(query: &str, candidates: &[String], max_variants: usize, threshold: u8) -> Vec<String> {
    let mut accepted = vec![query.to_string()];
    for candidate in candidates {
        if accepted.len() > max_variants {
            break;
        }
        if accepted.iter().all(|a| token_sort_ratio(candidate, a) < threshold) {
            accepted.push(candidate.clone());
        }
    }
    accepted
}

/// Expand `query` into variants. Never empty, never an error.
pub async fn expand_query(
    generator: &dyn Generator,
    query: &str,
    max_variants: usize,
    threshold: u8,
) -> Vec<String> {
    if max_variants == 0 {
        return vec![query.to_string()];
    }
    let n = max_variants.to_string();
    let prompt = fill(MULTI_QUERY_EXPAND, &[("n", n.as_str()), ("query", query)]);
    let output = match generator.generate(&prompt).await {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "query expansion failed; using the original query only");
            return vec![query.to_string()];
        }
    };
    let variants = dedup_variants(query, &candidate_lines(&output), max_variants, threshold);
    debug!(variants = variants.len(), "expanded query");
    variants
}
