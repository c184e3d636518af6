//! Query-time retrieval and answering.
//!
//! ```text
//! query ─▶ expand ─▶ per variant: {dense, lexical} ─▶ RRF ─▶ neighbours
//!       ─▶ rerank ─▶ pack ─▶ (answer) generate + cite
//! ```
//!
//! Dense and lexical searches for every variant run concurrently and fan in
//! at fusion. Rankings are fused in a fixed order (variant order, dense
//! before lexical) so results are deterministic for a given index and
//! generator. A dense search failure only drops that ranking.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::answer::{filter_used_chunks, render_context};
use crate::expand::expand_query;
use crate::fusion::rrf_ids;
use crate::generate::Generator;
use crate::index::Index;
use crate::models::Chunk;
use crate::neighbors::expand_neighborhood;
use crate::pack::pack_context;
use crate::prompts::answer_prompt;
use crate::rerank::{create_reranker, Reranker};

/// Returned when retrieval finds nothing to ground an answer on.
pub const NO_CONTEXT_ANSWER: &str = "The manual does not appear to cover this question.";

/// A generated answer and the chunks it cites.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub cited: Vec<Chunk>,
}

pub struct QueryEngine {
    index: Arc<Index>,
    generator: Arc<dyn Generator>,
    reranker: Arc<dyn Reranker>,
}

impl QueryEngine {
    pub fn new(index: Arc<Index>, generator: Arc<dyn Generator>, reranker: Arc<dyn Reranker>) -> Self {
        Self {
            index,
            generator,
            reranker,
        }
    }

    /// Engine using the reranker described by the index's own config.
    pub fn from_index(index: Arc<Index>, generator: Arc<dyn Generator>) -> Result<Self> {
        let reranker = create_reranker(&index.config().rerank, Arc::clone(&generator))?;
        Ok(Self::new(index, generator, reranker))
    }

    /// Reranked candidate ids, before packing.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let cfg = &self.index.config().retrieval;

        let variants = expand_query(
            self.generator.as_ref(),
            query,
            cfg.n_query_expansions,
            cfg.expansion_similarity,
        )
        .await;

        let per_variant = join_all(variants.iter().map(|v| self.rank_variant(v))).await;
        let rankings: Vec<Vec<String>> = per_variant
            .into_iter()
            .flat_map(|(dense, lexical)| [dense, lexical])
            .filter(|r| !r.is_empty())
            .collect();

        let fused = rrf_ids(&rankings, cfg.rrf_k);
        let expanded = expand_neighborhood(
            &fused,
            self.index.chunk_map(),
            self.index.siblings(),
            cfg.expand_neighbors,
            cfg.expand_siblings,
        );
        debug!(
            variants = variants.len(),
            rankings = rankings.len(),
            fused = fused.len(),
            expanded = expanded.len(),
            "retrieved candidates"
        );

        self.reranker
            .rerank(query, &expanded, self.index.chunk_map())
            .await
    }

    async fn rank_variant(&self, variant: &str) -> (Vec<String>, Vec<String>) {
        let cfg = &self.index.config().retrieval;
        let dense = async {
            if !self.index.has_dense() {
                return Vec::new();
            }
            match self.index.dense_search(variant, cfg.topk_dense).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(variant, error = %e, "dense search failed; using lexical results only");
                    Vec::new()
                }
            }
        };
        let lexical = async { self.index.lexical_search(variant, cfg.topk_lexical) };
        futures::join!(dense, lexical)
    }

    /// Packed chunks for `query`, most relevant first.
    pub async fn search(&self, query: &str) -> Result<Vec<Chunk>> {
        let ordered = self.retrieve(query).await?;
        Ok(pack_context(&ordered, self.index.chunk_map(), &self.index.config().context)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Retrieve, pack, and generate a cited answer.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        let ordered = self.retrieve(query).await?;
        let packed = pack_context(&ordered, self.index.chunk_map(), &self.index.config().context);
        if packed.is_empty() {
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                cited: Vec::new(),
            });
        }

        let context = render_context(&packed);
        let text = self
            .generator
            .generate(&answer_prompt(query.trim(), &context))
            .await
            .context("Answer generation failed")?;
        let cited = filter_used_chunks(&text, &packed)
            .into_iter()
            .cloned()
            .collect();
        Ok(Answer {
            text: text.trim().to_string(),
            cited,
        })
    }
}

/// One-shot answer over a loaded index.
pub async fn answer_query(index: Arc<Index>, generator: Arc<dyn Generator>, query: &str) -> Result<Answer> {
    QueryEngine::from_index(index, generator)?.answer(query).await
}

/// The `mrag search` command: print packed chunks with citations.
pub async fn run_search(engine: &QueryEngine, query: &str) -> Result<()> {
    let chunks = engine.search(query).await?;
    if chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, chunk) in chunks.iter().enumerate() {
        println!("{}. {}", i + 1, chunk.citation());
        println!("    {}", snippet(&chunk.text, 240));
        println!();
    }
    Ok(())
}

/// The `mrag ask` command: print the answer and its deduplicated sources.
pub async fn run_ask(engine: &QueryEngine, query: &str) -> Result<()> {
    let answer = engine.answer(query).await?;
    println!("{}", answer.text);
    print_sources(&answer.cited);
    Ok(())
}

/// `mrag ask --interactive`: one question per line until EOF or `exit`.
pub async fn run_interactive(engine: &QueryEngine) -> Result<()> {
    use std::io::Write;
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }
        // A failed question should not end the session.
        if let Err(e) = run_ask(engine, question).await {
            eprintln!("error: {:#}", e);
        }
        println!();
    }
    Ok(())
}

fn print_sources(chunks: &[Chunk]) {
    let mut seen = std::collections::HashSet::new();
    let sources: Vec<String> = chunks
        .iter()
        .map(|c| c.citation())
        .filter(|c| seen.insert(c.clone()))
        .collect();
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for s in sources {
        println!("  {}", s);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::build_index;
    use crate::progress::NoProgress;
    use crate::rerank::NoopReranker;
    use crate::summary::Summaries;
    use anyhow::bail;
    use async_trait::async_trait;

    fn chunk(id: &str, num: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            toc_path: format!("S{}", num),
            page_start: 1,
            page_end: 1,
            heading_num: num.into(),
            heading_title: format!("S{}", num),
            heading_level: crate::models::heading_level(num),
            ordinal_in_section: 0,
            parent_key: crate::models::parent_key(num),
            prev_id: None,
            next_id: None,
        }
    }

    struct Scripted;

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, prompt: &str) -> Result<String> {
            if prompt.contains("alternative phrasings") {
                let reply = if prompt.contains("proxy") { "proxy configuration" } else { "" };
                return Ok(reply.into());
            }
            if prompt.contains("Manual excerpts") {
                return Ok("Set it under Network [S2 — p1].".into());
            }
            bail!("unexpected prompt")
        }
    }

    async fn engine(config: Config) -> QueryEngine {
        let chunks = vec![
            chunk("a", "1", "Install the application."),
            chunk("b", "2", "Configure the proxy under Network settings."),
            chunk("c", "3", "Export data as CSV."),
        ];
        let index = build_index(chunks, &config, None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        QueryEngine::new(Arc::new(index), Arc::new(Scripted), Arc::new(NoopReranker))
    }

    #[tokio::test]
    async fn lexical_only_retrieval_finds_match() {
        let mut config = Config::default();
        config.retrieval.expand_neighbors = 0;
        config.retrieval.expand_siblings = false;
        let engine = engine(config).await;
        let ids = engine.retrieve("proxy settings").await.unwrap();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn blank_query_retrieves_nothing() {
        let engine = engine(Config::default()).await;
        assert!(engine.retrieve("   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_reports_cited_chunks() {
        let mut config = Config::default();
        config.retrieval.expand_neighbors = 0;
        config.retrieval.expand_siblings = true;
        let engine = engine(config).await;
        let answer = engine.answer("How do I set a proxy?").await.unwrap();
        assert_eq!(answer.text, "Set it under Network [S2 — p1].");
        assert_eq!(answer.cited.len(), 1);
        assert_eq!(answer.cited[0].id, "b");
    }

    #[test]
    fn snippet_flattens_and_cuts() {
        assert_eq!(snippet("a\n\nb   c", 10), "a b c");
        assert_eq!(snippet("abcdef", 3), "abc…");
    }

    #[tokio::test]
    async fn no_candidates_skips_generation() {
        let engine = engine(Config::default()).await;
        let answer = engine.answer("zzzz qqqq").await.unwrap();
        assert_eq!(answer.text, NO_CONTEXT_ANSWER);
        assert!(answer.cited.is_empty());
    }
}
