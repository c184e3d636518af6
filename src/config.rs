//! TOML configuration parsing and validation.
//!
//! A [`Config`] is an immutable value object: it is loaded once, optionally
//! overridden from the command line, validated, and then persisted verbatim
//! inside every index built with it. Every field has a default, so an empty
//! file (or no file at all) yields [`Config::default`].
//!
//! ```toml
//! [chunking]
//! chunk_tokens = 320
//! overlap_tokens = 48
//! toc_pages = 2
//!
//! [retrieval]
//! topk_dense = 8
//! topk_lexical = 8
//! rrf_k = 60
//!
//! [rerank]
//! kind = "generative"
//!
//! [embedding]
//! provider = "ollama"
//! model = "bge-m3"
//! dims = 1024
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Per-chunk token budget (length proxy, see `chars_per_token`).
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    /// Trailing paragraphs carried into the next chunk, in tokens.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Number of leading pages holding the table of contents (0 = none).
    #[serde(default)]
    pub toc_pages: usize,
    /// Added to printed TOC page numbers to obtain physical page numbers.
    #[serde(default)]
    pub toc_page_offset: i64,
    /// Multi-line regex removed from every page before detection.
    #[serde(default)]
    pub footer_regex: Option<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            chars_per_token: default_chars_per_token(),
            toc_pages: 0,
            toc_page_offset: 0,
            footer_regex: None,
        }
    }
}

fn default_chunk_tokens() -> usize {
    320
}
fn default_overlap_tokens() -> usize {
    48
}
fn default_chars_per_token() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Dense candidates per query variant (0 disables dense search).
    #[serde(default = "default_topk")]
    pub topk_dense: usize,
    /// Lexical candidates per query variant (0 disables lexical search).
    #[serde(default = "default_topk")]
    pub topk_lexical: usize,
    /// RRF smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// Paraphrases requested from the generator (0 disables expansion).
    #[serde(default = "default_n_query_expansions")]
    pub n_query_expansions: usize,
    /// Fuzzy similarity (0-100) at or above which a paraphrase is a duplicate.
    #[serde(default = "default_expansion_similarity")]
    pub expansion_similarity: u8,
    /// Positional expansion radius along document order.
    #[serde(default = "default_expand_neighbors")]
    pub expand_neighbors: usize,
    #[serde(default = "default_true")]
    pub expand_siblings: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            topk_dense: default_topk(),
            topk_lexical: default_topk(),
            rrf_k: default_rrf_k(),
            n_query_expansions: default_n_query_expansions(),
            expansion_similarity: default_expansion_similarity(),
            expand_neighbors: default_expand_neighbors(),
            expand_siblings: true,
        }
    }
}

fn default_topk() -> usize {
    8
}
fn default_rrf_k() -> u32 {
    60
}
fn default_n_query_expansions() -> usize {
    4
}
fn default_expansion_similarity() -> u8 {
    90
}
fn default_expand_neighbors() -> usize {
    1
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankKind {
    CrossEncoder,
    Generative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rerank_kind")]
    pub kind: RerankKind,
    /// Cross-encoder model name (local backend).
    #[serde(default)]
    pub model: Option<String>,
    /// Concurrent scoring calls for the generative reranker.
    #[serde(default = "default_rerank_concurrency")]
    pub concurrency: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kind: default_rerank_kind(),
            model: None,
            concurrency: default_rerank_concurrency(),
        }
    }
}

fn default_rerank_kind() -> RerankKind {
    RerankKind::Generative
}
fn default_rerank_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    /// Fixed formatting cost charged per packed chunk.
    #[serde(default = "default_chunk_overhead")]
    pub chunk_overhead: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_chunks: default_max_chunks(),
            chunk_overhead: default_chunk_overhead(),
        }
    }
}

fn default_max_chars() -> usize {
    9000
}
fn default_max_chunks() -> usize {
    12
}
fn default_chunk_overhead() -> usize {
    200
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Disabled,
    OpenAI,
    Ollama,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != EmbeddingBackend::Disabled
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Ollama
}
fn default_embedding_model() -> Option<String> {
    Some("bge-m3".to_string())
}
fn default_embedding_dims() -> Option<usize> {
    Some(1024)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationBackend {
    Disabled,
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_backend")]
    pub provider: GenerationBackend,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_backend(),
            model: default_generation_model(),
            url: None,
            temperature: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_generation_backend() -> GenerationBackend {
    GenerationBackend::Ollama
}
fn default_generation_model() -> String {
    "llama3.2:3b".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed settings before any work begins.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_tokens == 0 {
            bail!("chunking.chunk_tokens must be > 0");
        }
        if c.overlap_tokens >= c.chunk_tokens {
            bail!("chunking.overlap_tokens must be < chunking.chunk_tokens");
        }
        if c.chars_per_token == 0 {
            bail!("chunking.chars_per_token must be > 0");
        }
        if let Some(ref re) = c.footer_regex {
            regex::Regex::new(&format!("(?m){}", re))
                .with_context(|| format!("chunking.footer_regex is not a valid regex: {}", re))?;
        }

        let r = &self.retrieval;
        if r.rrf_k == 0 {
            bail!("retrieval.rrf_k must be > 0");
        }
        if r.expansion_similarity > 100 {
            bail!("retrieval.expansion_similarity must be in [0, 100]");
        }
        if r.topk_dense == 0 && r.topk_lexical == 0 {
            bail!("retrieval.topk_dense and retrieval.topk_lexical cannot both be 0");
        }

        if self.rerank.concurrency == 0 {
            bail!("rerank.concurrency must be >= 1");
        }

        let ctx = &self.context;
        if ctx.max_chunks == 0 {
            bail!("context.max_chunks must be >= 1");
        }
        if ctx.max_chars == 0 {
            bail!("context.max_chars must be >= 1");
        }

        let e = &self.embedding;
        if matches!(
            e.provider,
            EmbeddingBackend::OpenAI | EmbeddingBackend::Ollama
        ) {
            if e.model.as_deref().map_or(true, str::is_empty) {
                bail!(
                    "embedding.model must be specified when provider is '{:?}'",
                    e.provider
                );
            }
            if e.dims.map_or(true, |d| d == 0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{:?}'",
                    e.provider
                );
            }
        }
        if e.is_enabled() && e.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }

        let g = &self.generation;
        if g.provider != GenerationBackend::Disabled && g.model.trim().is_empty() {
            bail!("generation.model must be specified");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}
