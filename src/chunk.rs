//! Paragraph-boundary section chunker.
//!
//! Splits each section body into [`Chunk`]s that respect the configured
//! token budget. Splitting occurs on paragraph boundaries (blank lines) to
//! preserve semantic coherence; a single oversized paragraph is kept whole.
//! List items stay attached to the paragraph that introduces them.
//!
//! Token cost is a length proxy: `ceil(chars / chars_per_token)`, min 1.
//! When `overlap_tokens > 0`, trailing paragraphs of a flushed chunk are
//! carried into the next one until their cost reaches the overlap budget.
//! The paragraph that crosses the budget is carried too, but the carry is
//! always a strict tail: a one-paragraph chunk carries nothing.
//!
//! After every section is chunked, all chunks are linked into one
//! `prev_id`/`next_id` chain in document order.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::headings::{extract_sections, Section, SectionBody};
use crate::models::{heading_level, parent_key, Chunk, Page};

static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)*").expect("paragraph regex"));

static HYPHEN_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w)-[ \t]*\n[ \t]*(\w)").expect("hyphen regex"));

static LIST_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*•▪–]|\d+[.)]|[a-z][.)])\s+").expect("list regex"));

/// A cleaned paragraph and the pages it spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
}

/// Length-proxy token cost of `text`.
pub fn token_len(text: &str, chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(chars_per_token.max(1)).max(1)
}

/// Split a section body into cleaned paragraphs.
///
/// Lines inside a paragraph are joined with spaces, except list items,
/// which keep their own line. A paragraph that starts with a list marker
/// is appended to the previous paragraph.
pub fn split_paragraphs(body: &SectionBody) -> Vec<Paragraph> {
    let text = body.text.as_str();
    let mut out: Vec<Paragraph> = Vec::new();
    let mut start = 0;

    let mut ranges: Vec<(usize, usize)> = PARAGRAPH_BREAK_RE
        .find_iter(text)
        .map(|m| {
            let range = (start, m.start());
            start = m.end();
            range
        })
        .collect();
    ranges.push((start, text.len()));

    for (from, to) in ranges {
        let raw = &text[from..to];
        let Some(lead) = raw.find(|c: char| !c.is_whitespace()) else {
            continue;
        };
        let trail = raw.trim_end().len();
        let cleaned = clean_paragraph(raw);
        if cleaned.is_empty() {
            continue;
        }
        let page_start = body.page_at(from + lead);
        let page_end = body.page_at(from + trail.saturating_sub(1));

        match out.last_mut() {
            Some(prev) if LIST_MARKER_RE.is_match(&cleaned) => {
                prev.text.push('\n');
                prev.text.push_str(&cleaned);
                prev.page_end = prev.page_end.max(page_end);
            }
            _ => out.push(Paragraph {
                text: cleaned,
                page_start,
                page_end,
            }),
        }
    }
    out
}

fn clean_paragraph(raw: &str) -> String {
    let joined = HYPHEN_BREAK_RE.replace_all(raw, "$1$2");
    let mut out = String::new();
    for line in joined.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(if LIST_MARKER_RE.is_match(&line) { '\n' } else { ' ' });
        }
        out.push_str(&line);
    }
    out
}

/// Accumulates paragraphs for one section and emits chunks on flush.
struct Accumulator<'a> {
    section: &'a Section,
    cfg: &'a ChunkingConfig,
    buf: Vec<&'a Paragraph>,
    tokens: usize,
    /// Paragraphs in `buf` that were not carried over from the last chunk.
    fresh: usize,
    chunks: Vec<Chunk>,
}

impl<'a> Accumulator<'a> {
    fn new(section: &'a Section, cfg: &'a ChunkingConfig) -> Self {
        Self {
            section,
            cfg,
            buf: Vec::new(),
            tokens: 0,
            fresh: 0,
            chunks: Vec::new(),
        }
    }

    fn cost(&self, p: &Paragraph) -> usize {
        token_len(&p.text, self.cfg.chars_per_token)
    }

    fn push(&mut self, p: &'a Paragraph) {
        let cost = self.cost(p);
        if self.fresh > 0 && self.tokens + cost > self.cfg.chunk_tokens {
            self.flush();
        }
        // Carried overlap yields to new content when both do not fit.
        if self.fresh == 0 {
            while !self.buf.is_empty() && self.tokens + cost > self.cfg.chunk_tokens {
                let dropped = self.buf.remove(0);
                self.tokens -= self.cost(dropped);
            }
        }
        self.buf.push(p);
        self.tokens += cost;
        self.fresh += 1;
    }

    fn flush(&mut self) {
        if self.fresh == 0 {
            return;
        }
        let text = self
            .buf
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let page_start = self.buf.iter().map(|p| p.page_start).min().unwrap_or(1);
        let page_end = self.buf.iter().map(|p| p.page_end).max().unwrap_or(page_start);

        self.chunks.push(Chunk {
            id: Uuid::new_v4().to_string(),
            text,
            toc_path: self.section.toc_path.clone(),
            page_start,
            page_end: page_end.max(page_start),
            heading_num: self.section.numeral.clone(),
            heading_title: self.section.title.clone(),
            heading_level: heading_level(&self.section.numeral),
            ordinal_in_section: self.chunks.len(),
            parent_key: parent_key(&self.section.numeral),
            prev_id: None,
            next_id: None,
        });

        self.carry_overlap();
    }

    /// Keep the shortest strict tail of the buffer whose cost reaches the
    /// overlap budget, or the longest strict tail if none does.
    fn carry_overlap(&mut self) {
        let mut keep = 0;
        let mut kept_tokens = 0;
        if self.cfg.overlap_tokens > 0 {
            for p in self.buf.iter().rev().take(self.buf.len().saturating_sub(1)) {
                keep += 1;
                kept_tokens += self.cost(p);
                if kept_tokens >= self.cfg.overlap_tokens {
                    break;
                }
            }
        }
        let drop = self.buf.len() - keep;
        self.buf.drain(..drop);
        self.tokens = kept_tokens;
        self.fresh = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

/// Chunk one section. Blank sections yield nothing.
pub fn chunk_section(section: &Section, cfg: &ChunkingConfig) -> Vec<Chunk> {
    if section.body.is_blank() {
        return Vec::new();
    }
    let paragraphs = split_paragraphs(&section.body);
    let mut acc = Accumulator::new(section, cfg);
    for p in &paragraphs {
        acc.push(p);
    }
    acc.finish()
}

/// Link chunks into one document-order chain.
pub fn link_chunks(chunks: &mut [Chunk]) {
    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.prev_id = i.checked_sub(1).map(|j| ids[j].clone());
        chunk.next_id = ids.get(i + 1).cloned();
    }
}

/// Pages → linked chunks for the whole document.
pub fn build_chunks(pages: &[Page], cfg: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let sections = extract_sections(pages, cfg)?;
    let mut chunks: Vec<Chunk> = sections.iter().flat_map(|s| chunk_section(s, cfg)).collect();
    link_chunks(&mut chunks);
    Ok(chunks)
}
