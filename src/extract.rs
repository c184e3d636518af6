//! Page text sources.
//!
//! A [`PageTextSource`] turns a source document into ordered [`Page`]s.
//! Two sources ship with the crate:
//!
//! | Source | Input | Page split |
//! |--------|-------|------------|
//! | [`PdfSource`] | PDF file | form feeds from `pdf-extract`, per-page `lopdf` fallback |
//! | [`TextSource`] | plain-text export | form feed `\x0c` (the `pdftotext` convention) |
//!
//! A missing document is fatal. A single unreadable page degrades to empty
//! text so that page numbering stays aligned with the printed manual.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ExtractError;
use crate::models::Page;

/// Document → ordered (page number, text) pairs.
pub trait PageTextSource: Send + Sync {
    fn pages(&self) -> Result<Vec<Page>, ExtractError>;
}

/// Pick a source by file extension: `.txt` is read as a form-feed split
/// export, anything else as PDF.
pub fn source_for(path: &Path) -> Box<dyn PageTextSource> {
    let is_text = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if is_text {
        Box::new(TextSource::new(path))
    } else {
        Box::new(PdfSource::new(path))
    }
}

pub struct PdfSource {
    path: PathBuf,
}

impl PdfSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PageTextSource for PdfSource {
    fn pages(&self) -> Result<Vec<Page>, ExtractError> {
        let bytes = read_source(&self.path)?;
        let doc = lopdf::Document::load_mem(&bytes).map_err(|e| ExtractError::Unreadable {
            path: self.path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let page_count = doc.get_pages().len();

        // pdf-extract panics on some malformed font tables.
        let whole = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes));
        match whole {
            Ok(Ok(text)) => {
                let pages = split_form_feeds(&text);
                if pages.len() == page_count {
                    debug!(pages = page_count, "pdf-extract succeeded");
                    return Ok(pages);
                }
                warn!(
                    extracted = pages.len(),
                    expected = page_count,
                    "page breaks lost; falling back to per-page extraction"
                );
            }
            Ok(Err(e)) => warn!(error = %e, "pdf-extract failed; falling back to per-page extraction"),
            Err(_) => warn!("pdf-extract panicked; falling back to per-page extraction"),
        }

        Ok(per_page(&doc))
    }
}

fn per_page(doc: &lopdf::Document) -> Vec<Page> {
    doc.get_pages()
        .keys()
        .map(|&number| {
            let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
                warn!(page = number, error = %e, "unreadable page; using empty text");
                String::new()
            });
            Page::new(number, text)
        })
        .collect()
}

pub struct TextSource {
    path: PathBuf,
}

impl TextSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PageTextSource for TextSource {
    fn pages(&self) -> Result<Vec<Page>, ExtractError> {
        let bytes = read_source(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(split_form_feeds(&text))
    }
}

/// Split text on form feeds into 1-based pages. A trailing form feed does
/// not produce an extra empty page.
pub fn split_form_feeds(text: &str) -> Vec<Page> {
    let mut parts: Vec<String> = text.split('\x0c').map(str::to_string).collect();
    if parts.len() > 1 && parts.last().map(|p| p.trim().is_empty()).unwrap_or(false) {
        parts.pop();
    }
    number_pages(parts)
}

fn number_pages(texts: Vec<String>) -> Vec<Page> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page::new(i as u32 + 1, text))
        .collect()
}

fn read_source(path: &Path) -> Result<Vec<u8>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|e| ExtractError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
