//! Index statistics and health overview.
//!
//! Provides a quick summary of what's indexed: section and chunk counts,
//! page coverage, the dense half's embedder, and summary coverage. Used by
//! `mrag inspect` to give confidence that a build did what was expected.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use anyhow::Result;

use crate::headings::PATH_SEPARATOR;
use crate::index::{Index, FORMAT_VERSION};

/// Per top-level section breakdown.
struct SectionStats {
    numeral: String,
    title: String,
    chunk_count: usize,
    first_page: u32,
    last_page: u32,
}

fn top_level_stats(index: &Index) -> Vec<SectionStats> {
    let mut by_root: BTreeMap<usize, SectionStats> = BTreeMap::new();
    let mut order: HashMap<String, usize> = HashMap::new();
    for chunk in index.chunks() {
        let root = chunk.heading_num.split('.').next().unwrap_or_default().to_string();
        let next = order.len();
        let slot = *order.entry(root.clone()).or_insert(next);
        let entry = by_root.entry(slot).or_insert_with(|| SectionStats {
            title: chunk.toc_path.split(PATH_SEPARATOR).next().unwrap_or_default().to_string(),
            numeral: root,
            chunk_count: 0,
            first_page: chunk.page_start,
            last_page: chunk.page_end,
        });
        entry.chunk_count += 1;
        entry.first_page = entry.first_page.min(chunk.page_start);
        entry.last_page = entry.last_page.max(chunk.page_end);
    }
    by_root.into_values().collect()
}

/// Run the inspect command: load metadata and print a summary.
pub fn run_inspect(index: &Index, dir: &Path) -> Result<()> {
    let chunks = index.chunks();
    let size = dir_size(dir);
    let sections: HashSet<&str> = chunks.iter().map(|c| c.heading_num.as_str()).collect();
    let avg_chars = if chunks.is_empty() {
        0
    } else {
        chunks.iter().map(|c| c.text.chars().count()).sum::<usize>() / chunks.len()
    };

    println!("Manual RAG — Index Stats");
    println!("========================");
    println!();
    println!("  Index:       {}", dir.display());
    println!("  Size:        {}", format_bytes(size));
    println!("  Format:      v{}", FORMAT_VERSION);
    println!("  Built:       {}", format_ts_relative(index.built_at().timestamp()));
    if let Some(digest) = index.source_digest() {
        println!("  Source:      sha256:{}", &digest[..digest.len().min(16)]);
    }
    println!();
    println!("  Sections:    {}", sections.len());
    println!("  Chunks:      {}", chunks.len());
    println!("  Avg chars:   {}", avg_chars);
    match index.dense_descriptor() {
        Some(d) => println!("  Dense:       {}:{} ({} dims)", d.backend, d.model, d.dims),
        None => println!("  Dense:       none (lexical only)"),
    }
    let summaries = index.summaries();
    println!(
        "  Summaries:   {} / {} chunks, {} / {} sections",
        summaries.chunks.len(),
        chunks.len(),
        summaries.sections.len(),
        sections.len()
    );

    let roots = top_level_stats(index);
    if !roots.is_empty() {
        println!();
        println!("  By section:");
        println!("  {:<6} {:<40} {:>7}   {}", "NUM", "TITLE", "CHUNKS", "PAGES");
        println!("  {}", "-".repeat(68));
        for s in &roots {
            let pages = if s.first_page == s.last_page {
                format!("{}", s.first_page)
            } else {
                format!("{}–{}", s.first_page, s.last_page)
            };
            println!(
                "  {:<6} {:<40} {:>7}   {}",
                s.numeral,
                truncate(&s.title, 40),
                s.chunk_count,
                pages
            );
        }
    }

    println!();
    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
