//! Candidate reranking.
//!
//! | Reranker | Scoring |
//! |----------|---------|
//! | [`NoopReranker`] | none; input order is kept (reranking disabled) |
//! | [`CrossEncoderReranker`] | joint (query, text) relevance from a [`CrossEncoder`] |
//! | [`GenerativeReranker`] | a generator rates each candidate in `[0, 1]` |
//!
//! All rerankers sort by descending score; ties keep input order. A
//! candidate that cannot be scored gets 0.0 and never aborts the batch.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{RerankConfig, RerankKind};
use crate::generate::Generator;
use crate::models::Chunk;
use crate::prompts::{fill, SCORE_RELEVANCE};

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?|\.\d+").expect("score regex"));

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` by estimated relevance to `query`.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[String],
        chunks: &HashMap<String, Chunk>,
    ) -> Result<Vec<String>>;
}

/// (query, text) pairs → relevance scores, one per text.
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(&self, _query: &str, candidates: &[String], _chunks: &HashMap<String, Chunk>) -> Result<Vec<String>> {
        Ok(candidates.to_vec())
    }
}

pub struct CrossEncoderReranker {
    encoder: Arc<dyn CrossEncoder>,
}

impl CrossEncoderReranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self { encoder }
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    async fn rerank(&self, query: &str, candidates: &[String], chunks: &HashMap<String, Chunk>) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = candidates
            .iter()
            .map(|id| chunks.get(id).map(|c| c.text.clone()).unwrap_or_default())
            .collect();
        let scores = match self.encoder.score(query, &texts).await {
            Ok(scores) if scores.len() == candidates.len() => scores,
            Ok(scores) => {
                warn!(got = scores.len(), expected = candidates.len(), "cross-encoder score count mismatch; keeping fused order");
                return Ok(candidates.to_vec());
            }
            Err(e) => {
                warn!(error = %e, "cross-encoder failed; keeping fused order");
                return Ok(candidates.to_vec());
            }
        };
        Ok(sort_by_score(candidates, &scores))
    }
}

pub struct GenerativeReranker {
    generator: Arc<dyn Generator>,
    concurrency: usize,
}

impl GenerativeReranker {
    pub fn new(generator: Arc<dyn Generator>, concurrency: usize) -> Self {
        Self {
            generator,
            concurrency: concurrency.max(1),
        }
    }

    async fn score_one(&self, query: &str, id: &str, chunks: &HashMap<String, Chunk>) -> f32 {
        let Some(chunk) = chunks.get(id) else {
            return 0.0;
        };
        let prompt = fill(SCORE_RELEVANCE, &[("query", query), ("text", &chunk.text)]);
        match self.generator.generate(&prompt).await {
            Ok(reply) => parse_score(&reply).unwrap_or_else(|| {
                debug!(chunk = id, reply = %reply.trim(), "unparsable relevance score");
                0.0
            }),
            Err(e) => {
                warn!(chunk = id, error = %e, "relevance scoring failed; scoring 0.0");
                0.0
            }
        }
    }
}

#[async_trait]
impl Reranker for GenerativeReranker {
    async fn rerank(&self, query: &str, candidates: &[String], chunks: &HashMap<String, Chunk>) -> Result<Vec<String>> {
        let scoring: Vec<_> = candidates
            .iter()
            .map(|id| self.score_one(query, id.as_str(), chunks))
            .collect();
        let scores: Vec<f32> = stream::iter(scoring)
            .buffered(self.concurrency)
            .collect()
            .await;
        Ok(sort_by_score(candidates, &scores))
    }
}

/// First number in `reply`, clamped to `[0, 1]`.
pub fn parse_score(reply: &str) -> Option<f32> {
    let m = SCORE_RE.find(reply)?;
    let value: f32 = m.as_str().parse().ok()?;
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Stable sort of `ids` by descending `scores`.
fn sort_by_score(ids: &[String], scores: &[f32]) -> Vec<String> {
    let mut paired: Vec<(&String, f32)> = ids.iter().zip(scores.iter().copied()).collect();
    paired.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    paired.into_iter().map(|(id, _)| id.clone()).collect()
}

// ============ Local cross-encoder (fastembed) ============

#[cfg(feature = "local-models")]
pub struct LocalCrossEncoder {
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-models")]
impl LocalCrossEncoder {
    pub fn new(model_name: Option<&str>) -> Result<Self> {
        use fastembed::RerankerModel as M;
        let model = match model_name.unwrap_or("bge-reranker-base") {
            "bge-reranker-base" => M::BGERerankerBase,
            "bge-reranker-v2-m3" => M::BGERerankerV2M3,
            "jina-reranker-v1-turbo-en" => M::JINARerankerV1TurboEn,
            "jina-reranker-v2-base-multilingual" => M::JINARerankerV2BaseMultiligual,
            other => bail!(
                "Unknown cross-encoder model: '{}'. Supported models: bge-reranker-base, \
                 bge-reranker-v2-m3, jina-reranker-v1-turbo-en, jina-reranker-v2-base-multilingual",
                other
            ),
        };
        let reranker = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize cross-encoder: {}", e))?;
        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(reranker)),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl CrossEncoder for LocalCrossEncoder {
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("cross-encoder lock poisoned"))?;
            let docs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let results = model
                .rerank(query.as_str(), docs, false, None)
                .map_err(|e| anyhow::anyhow!("Cross-encoder scoring failed: {}", e))?;
            let mut scores = vec![0.0f32; texts.len()];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = r.score;
                }
            }
            Ok(scores)
        })
        .await?
    }
}

/// Build the configured reranker. Disabled reranking yields [`NoopReranker`].
pub fn create_reranker(config: &RerankConfig, generator: Arc<dyn Generator>) -> Result<Arc<dyn Reranker>> {
    if !config.enabled {
        return Ok(Arc::new(NoopReranker));
    }
    match config.kind {
        RerankKind::Generative => Ok(Arc::new(GenerativeReranker::new(generator, config.concurrency))),
        #[cfg(feature = "local-models")]
        RerankKind::CrossEncoder => {
            let encoder = LocalCrossEncoder::new(config.model.as_deref())?;
            Ok(Arc::new(CrossEncoderReranker::new(Arc::new(encoder))))
        }
        #[cfg(not(feature = "local-models"))]
        RerankKind::CrossEncoder => bail!("Cross-encoder reranking requires --features local-models"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_map(items: &[(&str, &str)]) -> HashMap<String, Chunk> {
        items
            .iter()
            .map(|(id, text)| {
                let chunk = Chunk {
                    id: id.to_string(),
                    text: text.to_string(),
                    toc_path: "T".into(),
                    page_start: 1,
                    page_end: 1,
                    heading_num: "1".into(),
                    heading_title: "T".into(),
                    heading_level: 1,
                    ordinal_in_section: 0,
                    parent_key: String::new(),
                    prev_id: None,
                    next_id: None,
                };
                (id.to_string(), chunk)
            })
            .collect()
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Scores by looking up a keyword in the prompt.
    struct Keyword;

    #[async_trait]
    impl Generator for Keyword {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("Document: best") {
                Ok("0.9".into())
            } else if prompt.contains("Document: good") {
                Ok("Score: .5 overall".into())
            } else if prompt.contains("Document: broken") {
                bail!("timeout")
            } else {
                Ok("no idea".into())
            }
        }
    }

    struct Lengths;

    #[async_trait]
    impl CrossEncoder for Lengths {
        async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(texts.iter().map(|t| t.len() as f32).collect())
        }
    }

    #[test]
    fn parse_first_number_and_clamp() {
        assert_eq!(parse_score("0.73"), Some(0.73));
        assert_eq!(parse_score("Relevance: .4 (fair)"), Some(0.4));
        assert_eq!(parse_score("1"), Some(1.0));
        assert_eq!(parse_score("7.5 out of 10"), Some(1.0));
        assert_eq!(parse_score("none"), None);
    }

    #[tokio::test]
    async fn generative_sorts_and_defaults_failures_to_zero() {
        let chunks = chunk_map(&[("a", "meh"), ("b", "broken"), ("c", "best"), ("d", "good")]);
        let r = GenerativeReranker::new(Arc::new(Keyword), 2);
        let out = r.rerank("q", &ids(&["a", "b", "c", "d"]), &chunks).await.unwrap();
        assert_eq!(out[..2], ids(&["c", "d"])[..]);
        // a and b both score 0.0 and keep input order.
        assert_eq!(out[2..], ids(&["a", "b"])[..]);
    }

    #[tokio::test]
    async fn default_reranker_runs_on_a_spawned_task() {
        let r = create_reranker(&RerankConfig::default(), Arc::new(Keyword)).unwrap();
        let chunks = chunk_map(&[("a", "meh"), ("c", "best")]);
        let out = tokio::spawn(async move { r.rerank("q", &ids(&["a", "c"]), &chunks).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out, ids(&["c", "a"]));
    }

    #[tokio::test]
    async fn cross_encoder_sorts_descending() {
        let chunks = chunk_map(&[("short", "x"), ("long", "xxxxx"), ("mid", "xxx")]);
        let r = CrossEncoderReranker::new(Arc::new(Lengths));
        let out = r.rerank("q", &ids(&["short", "long", "mid"]), &chunks).await.unwrap();
        assert_eq!(out, ids(&["long", "mid", "short"]));
    }

    #[tokio::test]
    async fn disabled_returns_input() {
        let cfg = RerankConfig {
            enabled: false,
            ..Default::default()
        };
        let r = create_reranker(&cfg, Arc::new(Keyword)).unwrap();
        let input = ids(&["b", "a"]);
        assert_eq!(r.rerank("q", &input, &HashMap::new()).await.unwrap(), input);
    }

    #[tokio::test]
    async fn empty_candidates() {
        let r = GenerativeReranker::new(Arc::new(Keyword), 4);
        assert!(r.rerank("q", &[], &HashMap::new()).await.unwrap().is_empty());
    }
}
