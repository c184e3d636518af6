//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the pages, headings, and chunks that flow from
//! preprocessing into the hybrid index and out through query answering.

use serde::{Deserialize, Serialize};

/// One page of extracted source text. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

impl Page {
    pub fn new(number: u32, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

/// A detected numbered section heading.
///
/// `span` is the byte range of the heading line within its page's text.
/// Headings located from a table of contents whose literal line could not
/// be found on the cited page carry `span = (0, 0)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub numeral: String,
    pub title: String,
    pub page: u32,
    pub span: (usize, usize),
}

/// An atomic retrievable passage tagged with document-structure metadata.
///
/// Chunks are created once during preprocessing and are read-only
/// afterwards. `prev_id`/`next_id` link every chunk of a document into a
/// single chain in document order, crossing section boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub toc_path: String,
    pub page_start: u32,
    pub page_end: u32,
    pub heading_num: String,
    pub heading_title: String,
    pub heading_level: usize,
    pub ordinal_in_section: usize,
    pub parent_key: String,
    #[serde(default)]
    pub prev_id: Option<String>,
    #[serde(default)]
    pub next_id: Option<String>,
}

impl Chunk {
    /// Citation label, e.g. `[Export › CSV — p14]` or `[Export — p14–15]`.
    pub fn citation(&self) -> String {
        let pages = if self.page_start == self.page_end {
            format!("p{}", self.page_start)
        } else {
            format!("p{}–{}", self.page_start, self.page_end)
        };
        format!("[{} — {}]", self.toc_path, pages)
    }
}

/// Count of `.`-separated components of a heading numeral.
pub fn heading_level(numeral: &str) -> usize {
    numeral.split('.').count()
}

/// The numeral with its last component removed; empty for top-level numerals.
pub fn parent_key(numeral: &str) -> String {
    match numeral.rsplit_once('.') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(page_start: u32, page_end: u32) -> Chunk {
        Chunk {
            id: "c1".to_string(),
            text: "CSV and JSON are supported.".to_string(),
            toc_path: "Export".to_string(),
            page_start,
            page_end,
            heading_num: "2".to_string(),
            heading_title: "Export".to_string(),
            heading_level: 1,
            ordinal_in_section: 0,
            parent_key: String::new(),
            prev_id: None,
            next_id: None,
        }
    }

    #[test]
    fn citation_single_page() {
        assert_eq!(chunk(2, 2).citation(), "[Export — p2]");
    }

    #[test]
    fn citation_page_range() {
        assert_eq!(chunk(2, 4).citation(), "[Export — p2–4]");
    }

    #[test]
    fn level_and_parent() {
        assert_eq!(heading_level("3"), 1);
        assert_eq!(heading_level("3.2.1"), 3);
        assert_eq!(parent_key("3.2.1"), "3.2");
        assert_eq!(parent_key("3"), "");
    }
}
