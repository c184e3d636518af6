//! Built-in prompt templates.
//!
//! Placeholders are written `{name}` and substituted by [`fill`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("placeholder regex"));

pub const MULTI_QUERY_EXPAND: &str = "\
You rewrite search queries for a product user manual.
Write {n} alternative phrasings of the question below. Use the vocabulary a
manual would use (menu names, feature names, actions). Output one phrasing
per line with no numbering and no commentary.

Question: {query}";

pub const SCORE_RELEVANCE: &str = "\
Given the query and document below, return a number between 0 and 1 that
estimates how well the document answers the query. Reply with the number only.

Query: {query}
Document: {text}
Score:";

pub const SUMMARIZE_CHUNK: &str = "\
Summarize this passage from a user manual for search indexing.
Section: {heading_path} ({page_span})

Return a JSON object with the keys: heading_path, overview, key_actions,
ui_terms, entities, synonyms, limitations, search_terms, retrieval_text.
All list values are arrays of short strings. retrieval_text is one dense
paragraph of the phrases a user might search for.

Passage:
{text}";

pub const SUMMARIZE_SECTION: &str = "\
Summarize this whole section of a user manual for search indexing.
Section: {heading_path} ({page_span})

Return a JSON object with the keys: heading_path, overview, key_actions,
ui_terms, entities, synonyms, limitations, search_terms, retrieval_text.
All list values are arrays of short strings. retrieval_text is one dense
paragraph of the phrases a user might search for.

Section text:
{text}";

pub const ANSWER_SYSTEM: &str = "\
You answer questions about a product using only the manual excerpts provided.
Each excerpt starts with a header ending in a bracketed citation such as
[Export — p14]. After every statement, copy the citation of the excerpt that
supports it exactly as written. If the excerpts do not contain the answer,
say that the manual does not cover it.";

pub const ANSWER_USER: &str = "\
Question: {query}

Manual excerpts:
{context}

Answer:";

/// Replace each `{key}` in `template` with its value in one pass; braces
/// inside substituted values are left alone. Unknown keys stay as written.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            match vars.iter().find(|(k, _)| *k == key) {
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// System and user prompt joined into one generator prompt.
pub fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        "{}\n\n{}",
        ANSWER_SYSTEM,
        fill(ANSWER_USER, &[("query", query), ("context", context)])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_placeholders() {
        let p = fill(MULTI_QUERY_EXPAND, &[("n", "4"), ("query", "export formats?")]);
        assert!(p.contains("Write 4 alternative"));
        assert!(p.ends_with("Question: export formats?"));
        assert!(!p.contains('{'));
    }

    #[test]
    fn values_are_not_expanded_again() {
        let p = fill(SCORE_RELEVANCE, &[("query", "what is {text}?"), ("text", "CSV export")]);
        assert!(p.contains("Query: what is {text}?"));
        assert!(p.contains("Document: CSV export"));

        let p = answer_prompt("show {context}", "### Export [Export — p2]\nCSV");
        assert!(p.contains("show {context}"));
        assert_eq!(p.matches("CSV").count(), 1);
    }

    #[test]
    fn answer_prompt_carries_context() {
        let p = answer_prompt("q?", "### Export [Export — p2]\nCSV");
        assert!(p.starts_with(ANSWER_SYSTEM));
        assert!(p.contains("[Export — p2]"));
    }
}
