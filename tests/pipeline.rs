//! Library-level pipeline tests with in-process capabilities.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use manual_rag::chunk::build_chunks;
use manual_rag::config::{ChunkingConfig, Config};
use manual_rag::embedding::Embedder;
use manual_rag::expand::expand_query;
use manual_rag::generate::Generator;
use manual_rag::index::{build_index, load_index, save_index};
use manual_rag::models::Page;
use manual_rag::progress::NoProgress;
use manual_rag::rerank::NoopReranker;
use manual_rag::search::QueryEngine;
use manual_rag::summary::Summaries;

fn manual() -> Vec<Page> {
    vec![
        Page::new(
            1,
            "1 Overview\nThe editor keeps your notes in one place.\n\n\
             1.1 Getting Started\nCreate an account, then sign in from the start screen.",
        ),
        Page::new(2, "2 Export\nCSV and JSON are supported."),
    ]
}

fn lexical_config() -> Config {
    let mut config = Config::default();
    config.embedding.provider = manual_rag::config::EmbeddingBackend::Disabled;
    config.rerank.enabled = false;
    config
}

/// Hashes words into a small bag-of-words vector.
struct BagOfWords;

#[async_trait]
impl Embedder for BagOfWords {
    fn backend(&self) -> &str {
        "test"
    }
    fn model_name(&self) -> &str {
        "bow"
    }
    fn dims(&self) -> usize {
        16
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 16];
                for word in manual_rag::lexical::tokenize(t) {
                    let slot = word.bytes().fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize)) % 16;
                    v[slot] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Generator that can neither paraphrase nor answer.
struct Garbled;

#[async_trait]
impl Generator for Garbled {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.contains("alternative phrasings") {
            return Ok("   \n- \n\"\"\n".into());
        }
        bail!("offline")
    }
}

#[test]
fn chunks_form_one_chain() {
    let chunks = build_chunks(&manual(), &ChunkingConfig::default()).unwrap();
    assert_eq!(chunks.len(), 3);

    assert!(chunks[0].prev_id.is_none());
    assert!(chunks[chunks.len() - 1].next_id.is_none());
    for pair in chunks.windows(2) {
        assert_eq!(pair[0].next_id.as_deref(), Some(pair[1].id.as_str()));
        assert_eq!(pair[1].prev_id.as_deref(), Some(pair[0].id.as_str()));
    }
    for c in &chunks {
        assert!(!c.text.trim().is_empty());
        assert!(c.page_start <= c.page_end);
        assert_eq!(c.heading_level, c.heading_num.split('.').count());
    }
    assert_eq!(chunks[1].toc_path, "Overview › Getting Started");
    assert_eq!(chunks[1].parent_key, "1");
}

#[test]
fn contents_page_does_not_rename_sections() {
    let pages = vec![
        Page::new(1, "Contents\n1 Overview    2\n2 Export    3"),
        Page::new(2, "1 Overview\nThe editor keeps your notes in one place."),
        Page::new(3, "2 Export\nCSV and JSON are supported."),
    ];
    let chunks = build_chunks(&pages, &ChunkingConfig::default()).unwrap();
    let citations: Vec<String> = chunks.iter().map(|c| c.citation()).collect();
    assert_eq!(citations, vec!["[Overview — p2]", "[Export — p3]"]);
}

#[tokio::test]
async fn export_question_ranks_export_first_without_dense() {
    let config = lexical_config();
    let chunks = build_chunks(&manual(), &config.chunking).unwrap();
    let index = build_index(chunks, &config, None, Summaries::default(), &NoProgress)
        .await
        .unwrap();
    let engine = QueryEngine::new(Arc::new(index), Arc::new(Garbled), Arc::new(NoopReranker));

    let results = engine.search("What export formats are supported?").await.unwrap();
    assert_eq!(results[0].heading_num, "2");
    assert_eq!(results[0].citation(), "[Export — p2]");
}

#[tokio::test]
async fn unusable_expansion_yields_original_query() {
    let variants = expand_query(&Garbled, "reset my password", 4, 90).await;
    assert_eq!(variants, vec!["reset my password"]);
}

#[tokio::test]
async fn save_load_round_trip_preserves_results() {
    let config = lexical_config();
    let embedder: Arc<dyn Embedder> = Arc::new(BagOfWords);

    let chunks = build_chunks(&manual(), &config.chunking).unwrap();
    let index = build_index(chunks, &config, Some(embedder.clone()), Summaries::default(), &NoProgress)
        .await
        .unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("index");
    save_index(&index, &dir).unwrap();
    let loaded = load_index(&dir, Some(embedder)).unwrap();

    assert_eq!(loaded.chunk_map(), index.chunk_map());
    assert_eq!(loaded.config(), index.config());

    let before = QueryEngine::new(Arc::new(index), Arc::new(Garbled), Arc::new(NoopReranker));
    let after = QueryEngine::new(Arc::new(loaded), Arc::new(Garbled), Arc::new(NoopReranker));
    for query in ["What export formats are supported?", "sign in", "notes"] {
        assert_eq!(
            before.retrieve(query).await.unwrap(),
            after.retrieve(query).await.unwrap(),
            "query: {}",
            query
        );
    }
}

#[tokio::test]
async fn answer_failure_propagates() {
    let config = lexical_config();
    let chunks = build_chunks(&manual(), &config.chunking).unwrap();
    let index = build_index(chunks, &config, None, Summaries::default(), &NoProgress)
        .await
        .unwrap();
    let engine = QueryEngine::new(Arc::new(index), Arc::new(Garbled), Arc::new(NoopReranker));
    assert!(engine.answer("What export formats are supported?").await.is_err());
}
