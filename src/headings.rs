//! Numbered heading detection and section slicing.
//!
//! Manuals number their sections (`3`, `3.2`, `3.2.1`). Headings are found
//! in one of two ways:
//!
//! 1. **TOC-seeded**: when `toc_pages > 0`, entries of the form
//!    `<numeral> <title> ..... <page>` are parsed from the leading pages and
//!    each is located on the page it cites. A heading whose line cannot be
//!    found there starts at the top of that page.
//! 2. **In-body**: otherwise (or when the TOC yields nothing) every line
//!    shaped like `<numeral> <title>` in the body is a heading.
//!
//! The body between consecutive headings becomes a [`Section`]. A document
//! with no detectable headings becomes one section, `0 Document`.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ChunkingConfig;
use crate::models::{Heading, Page};

/// Separator between breadcrumb titles.
pub const PATH_SEPARATOR: &str = " › ";

pub const FALLBACK_NUMERAL: &str = "0";
pub const FALLBACK_TITLE: &str = "Document";

const MAX_TITLE_CHARS: usize = 120;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?P<num>\d{1,3}(?:\.\d{1,3})*)[ \t]+(?P<title>[^\n]+?)[ \t.]*$")
        .expect("heading regex")
});

static TOC_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<num>\d{1,3}(?:\.\d{1,3})*)[ \t]+(?P<title>\S[^\n]*?)(?:[ \t]*\.{2,}[ \t.]*|[ \t]{2,}|[ \t]*\.[ \t]+)(?P<page>\d{1,4})[ \t]*$",
    )
    .expect("toc regex")
});

static DOT_LEADER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{3,}").expect("leader regex"));

static PAGE_RESIDUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:[ \t]{2,}|\t)\d{1,4}$").expect("residue regex"));

/// A table-of-contents entry; `page` is already mapped to a physical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub numeral: String,
    pub title: String,
    pub page: u32,
}

/// Body text of one section, possibly spanning pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionBody {
    pub text: String,
    /// `(byte offset in text, page number)` for each page segment, ascending.
    marks: Vec<(usize, u32)>,
}

impl SectionBody {
    fn new() -> Self {
        Self {
            text: String::new(),
            marks: Vec::new(),
        }
    }

    fn push_segment(&mut self, page: u32, segment: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.marks.push((self.text.len(), page));
        self.text.push_str(segment);
    }

    /// Page containing byte `offset`.
    pub fn page_at(&self, offset: usize) -> u32 {
        let idx = self.marks.partition_point(|(start, _)| *start <= offset);
        match idx.checked_sub(1).and_then(|i| self.marks.get(i)) {
            Some((_, page)) => *page,
            None => self.marks.first().map(|(_, p)| *p).unwrap_or(1),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Single-page body, for tests and callers that chunk raw text.
    pub fn from_page(page: u32, text: &str) -> Self {
        let mut body = Self::new();
        body.push_segment(page, text);
        body
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub numeral: String,
    pub title: String,
    pub toc_path: String,
    pub body: SectionBody,
}

/// Normalize line endings and remove footer matches from every page.
pub fn clean_pages(pages: &[Page], footer_regex: Option<&str>) -> Result<Vec<Page>> {
    let footer = footer_regex
        .map(|re| Regex::new(&format!("(?m){}", re)))
        .transpose()
        .context("Invalid chunking.footer_regex")?;

    Ok(pages
        .iter()
        .map(|p| {
            let text = p.text.replace("\r\n", "\n").replace('\r', "\n");
            let text = match &footer {
                Some(re) => re.replace_all(&text, "").into_owned(),
                None => text,
            };
            Page::new(p.number, text)
        })
        .collect())
}

/// In-body heading detection. Titles must start with a letter; lines
/// carrying dot leaders or a spaced trailing page number are TOC residue
/// and are skipped.
pub fn detect_headings(pages: &[Page]) -> Vec<Heading> {
    let mut headings = Vec::new();
    for page in pages {
        for caps in HEADING_RE.captures_iter(&page.text) {
            let (Some(whole), Some(num), Some(title)) = (caps.get(0), caps.name("num"), caps.name("title")) else {
                continue;
            };
            let title = title.as_str().trim();
            if !is_plausible_title(title) {
                continue;
            }
            headings.push(Heading {
                numeral: num.as_str().to_string(),
                title: title.to_string(),
                page: page.number,
                span: (whole.start(), whole.end()),
            });
        }
    }
    dedup_and_sort(headings)
}

fn is_plausible_title(title: &str) -> bool {
    let starts_with_letter = title.chars().next().map(char::is_alphabetic).unwrap_or(false);
    starts_with_letter
        && title.chars().count() >= 2
        && title.chars().count() <= MAX_TITLE_CHARS
        && !DOT_LEADER_RE.is_match(title)
        && !PAGE_RESIDUE_RE.is_match(title)
}

/// Parse TOC entries from the first `toc_pages` pages. Printed page numbers
/// are shifted by `page_offset` to physical page numbers; entries that land
/// before page 1 are dropped.
pub fn parse_toc(pages: &[Page], toc_pages: usize, page_offset: i64) -> Vec<TocEntry> {
    let mut entries = Vec::new();
    for page in pages.iter().take(toc_pages) {
        for caps in TOC_ENTRY_RE.captures_iter(&page.text) {
            let (Some(num), Some(title), Some(printed)) = (caps.name("num"), caps.name("title"), caps.name("page")) else {
                continue;
            };
            let Ok(printed) = printed.as_str().parse::<i64>() else {
                continue;
            };
            let physical = printed + page_offset;
            let physical = match u32::try_from(physical) {
                Ok(p) if p > 0 => p,
                _ => {
                    warn!(numeral = num.as_str(), printed, "TOC entry maps before the first page; dropped");
                    continue;
                }
            };
            entries.push(TocEntry {
                numeral: num.as_str().to_string(),
                title: title.as_str().trim().trim_end_matches('.').trim_end().to_string(),
                page: physical,
            });
        }
    }
    entries
}

/// Find each TOC entry's heading line on its cited page.
pub fn locate(entries: &[TocEntry], body: &[Page]) -> Vec<Heading> {
    let by_number: HashMap<u32, &Page> = body.iter().map(|p| (p.number, p)).collect();
    let mut headings = Vec::new();

    for entry in entries {
        let Some(page) = by_number.get(&entry.page) else {
            warn!(numeral = %entry.numeral, page = entry.page, "TOC entry cites a page outside the body; dropped");
            continue;
        };
        let span = match heading_line_pattern(entry).and_then(|re| re.find(&page.text).map(|m| (m.start(), m.end()))) {
            Some(span) => span,
            None => {
                warn!(
                    numeral = %entry.numeral,
                    page = entry.page,
                    "heading line not found on cited page; section starts at page top"
                );
                (0, 0)
            }
        };
        headings.push(Heading {
            numeral: entry.numeral.clone(),
            title: entry.title.clone(),
            page: entry.page,
            span,
        });
    }
    dedup_and_sort(headings)
}

fn heading_line_pattern(entry: &TocEntry) -> Option<Regex> {
    let title = entry
        .title
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let pattern = format!(r"(?m)^[ \t]*{}[ \t]+{}[^\n]*", regex::escape(&entry.numeral), title);
    Regex::new(&pattern).ok()
}

/// Keep the first heading per (page, numeral), ordered by (page, offset).
fn dedup_and_sort(headings: Vec<Heading>) -> Vec<Heading> {
    let mut seen = HashSet::new();
    let mut out: Vec<Heading> = headings
        .into_iter()
        .filter(|h| seen.insert((h.page, h.numeral.clone())))
        .collect();
    out.sort_by_key(|h| (h.page, h.span.0));
    out
}

/// Breadcrumb per numeral: titles of every known prefix joined by ` › `.
/// Unknown ancestors are skipped. The last title seen for a numeral wins,
/// so body headings override front-matter mentions.
pub fn build_toc_paths(headings: &[Heading]) -> HashMap<String, String> {
    let mut titles: HashMap<&str, &str> = HashMap::new();
    for h in headings {
        titles.insert(h.numeral.as_str(), h.title.as_str());
    }

    titles
        .keys()
        .map(|numeral| {
            let parts: Vec<&str> = numeral.split('.').collect();
            let crumbs: Vec<&str> = (1..=parts.len())
                .filter_map(|i| titles.get(parts[..i].join(".").as_str()).copied())
                .collect();
            let path = if crumbs.is_empty() {
                numeral.to_string()
            } else {
                crumbs.join(PATH_SEPARATOR)
            };
            (numeral.to_string(), path)
        })
        .collect()
}

/// Pages → ordered sections.
pub fn extract_sections(pages: &[Page], cfg: &ChunkingConfig) -> Result<Vec<Section>> {
    let pages = clean_pages(pages, cfg.footer_regex.as_deref())?;
    let toc_pages = cfg.toc_pages.min(pages.len());
    let body = &pages[toc_pages..];

    let mut headings = Vec::new();
    if toc_pages > 0 {
        let entries = parse_toc(&pages, toc_pages, cfg.toc_page_offset);
        debug!(entries = entries.len(), "parsed table of contents");
        headings = locate(&entries, body);
    }
    if headings.is_empty() {
        headings = detect_headings(body);
        debug!(headings = headings.len(), "in-body heading detection");
    }

    if headings.is_empty() {
        warn!("no headings detected; treating the whole document as one section");
        let mut whole = SectionBody::new();
        for page in body {
            whole.push_segment(page.number, &page.text);
        }
        return Ok(vec![Section {
            numeral: FALLBACK_NUMERAL.to_string(),
            title: FALLBACK_TITLE.to_string(),
            toc_path: FALLBACK_TITLE.to_string(),
            body: whole,
        }]);
    }

    let paths = build_toc_paths(&headings);
    let last_page = body.last().map(|p| p.number).unwrap_or(1);

    let sections = headings
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let (end_page, end_off) = match headings.get(i + 1) {
                Some(next) => (next.page, Some(next.span.0)),
                None => (last_page, None),
            };
            Section {
                numeral: h.numeral.clone(),
                title: h.title.clone(),
                toc_path: paths.get(&h.numeral).cloned().unwrap_or_else(|| h.title.clone()),
                body: slice_body(body, (h.page, h.span.1), (end_page, end_off)),
            }
        })
        .collect();
    Ok(sections)
}

/// Text from `start` up to `end`; `end.1 == None` means the end of that page.
fn slice_body(body: &[Page], start: (u32, usize), end: (u32, Option<usize>)) -> SectionBody {
    let mut out = SectionBody::new();
    for page in body.iter().filter(|p| p.number >= start.0 && p.number <= end.0) {
        let from = if page.number == start.0 { start.1 } else { 0 };
        let to = match end.1 {
            Some(off) if page.number == end.0 => off,
            _ => page.text.len(),
        };
        if from >= to {
            continue;
        }
        if let Some(segment) = page.text.get(from..to) {
            out.push_segment(page.number, segment);
        }
    }
    out
}
