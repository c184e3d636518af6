//! Index build pipeline orchestration.
//!
//! Coordinates the full build flow: page text → headings → chunks →
//! (optional) summaries → embeddings → atomic save. Summaries are
//! best-effort; every other stage fails the build.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::chunk::build_chunks;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::extract::{source_for, PageTextSource};
use crate::generate::create_generator;
use crate::index::{build_index, save_index, Index};
use crate::progress::{BuildPhase, BuildProgressEvent, BuildProgressReporter};
use crate::summary::{build_summaries, Summaries};

/// Read, chunk, summarize and index a document without saving it.
pub async fn build_from_source(
    config: &Config,
    source: &dyn PageTextSource,
    with_summaries: bool,
    progress: &dyn BuildProgressReporter,
) -> Result<Index> {
    let pages = source.pages()?;
    info!(pages = pages.len(), "read source document");

    progress.report(BuildProgressEvent::Started {
        phase: BuildPhase::Chunking,
        detail: format!("{} pages", pages.len()),
    });
    let chunks = build_chunks(&pages, &config.chunking)?;

    let summaries = if with_summaries {
        let generator = create_generator(&config.generation)?;
        build_summaries(&chunks, generator.as_ref(), progress).await
    } else {
        Summaries::default()
    };

    let embedder = create_embedder(&config.embedding)?;
    let mut index = build_index(chunks, config, embedder, summaries, progress).await?;
    index.set_source_digest(&pages);
    Ok(index)
}

/// The `mrag build` command.
pub async fn run_build(
    config: &Config,
    input: &Path,
    output: &Path,
    with_summaries: bool,
    progress: &dyn BuildProgressReporter,
) -> Result<()> {
    progress.report(BuildProgressEvent::Started {
        phase: BuildPhase::Reading,
        detail: input.display().to_string(),
    });
    let source = source_for(input);
    let index = build_from_source(config, source.as_ref(), with_summaries, progress)
        .await
        .with_context(|| format!("Failed to build an index from {}", input.display()))?;

    progress.report(BuildProgressEvent::Started {
        phase: BuildPhase::Saving,
        detail: output.display().to_string(),
    });
    save_index(&index, output)?;

    let sections: HashSet<&str> = index.chunks().iter().map(|c| c.heading_num.as_str()).collect();
    let pages = index
        .chunks()
        .iter()
        .map(|c| c.page_end)
        .max()
        .unwrap_or(0);

    println!("build {}", input.display());
    println!("  sections: {}", sections.len());
    println!("  chunks: {}", index.chunks().len());
    println!("  last cited page: {}", pages);
    if with_summaries {
        println!(
            "  summaries: {} chunk, {} section",
            index.summaries().chunks.len(),
            index.summaries().sections.len()
        );
    }
    match index.dense_descriptor() {
        Some(d) => println!("  dense: {}:{} ({} dims)", d.backend, d.model, d.dims),
        None => println!("  dense: disabled (lexical only)"),
    }
    println!("  output: {}", output.display());
    println!("ok");
    Ok(())
}
