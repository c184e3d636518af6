//! Context rendering and citation matching for answer synthesis.

use crate::models::Chunk;

/// One `### <toc_path> <citation>` block per chunk, separated by blank lines.
pub fn render_context(chunks: &[&Chunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("### {} {}\n{}", c.toc_path, c.citation(), c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Packed chunks whose citation appears verbatim in `answer`. When the
/// answer cites none of them, every packed chunk is returned.
pub fn filter_used_chunks<'a>(answer: &str, packed: &[&'a Chunk]) -> Vec<&'a Chunk> {
    let cited: Vec<&Chunk> = packed
        .iter()
        .copied()
        .filter(|c| answer.contains(&c.citation()))
        .collect();
    if cited.is_empty() {
        packed.to_vec()
    } else {
        cited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, path: &str, page: u32, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            toc_path: path.into(),
            page_start: page,
            page_end: page,
            heading_num: "1".into(),
            heading_title: path.into(),
            heading_level: 1,
            ordinal_in_section: 0,
            parent_key: String::new(),
            prev_id: None,
            next_id: None,
        }
    }

    #[test]
    fn renders_headers_with_citations() {
        let a = chunk("a", "Export", 2, "CSV and JSON are supported.");
        let b = chunk("b", "Overview", 1, "Welcome.");
        let ctx = render_context(&[&a, &b]);
        assert_eq!(
            ctx,
            "### Export [Export — p2]\nCSV and JSON are supported.\n\n### Overview [Overview — p1]\nWelcome."
        );
    }

    #[test]
    fn keeps_only_cited_chunks() {
        let a = chunk("a", "Export", 2, "CSV");
        let b = chunk("b", "Overview", 1, "Welcome");
        let used = filter_used_chunks("Use CSV or JSON [Export — p2].", &[&a, &b]);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].id, "a");

        let all = filter_used_chunks("No citations here.", &[&a, &b]);
        assert_eq!(all.len(), 2);
    }
}
