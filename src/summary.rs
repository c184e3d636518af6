//! Build-time summaries used to enrich indexing text.
//!
//! A manual phrases things procedurally ("Click File › Export…") while users
//! ask abstractly ("how do I get my data out?"). Summaries bridge that gap:
//! one per chunk and one per section, each parsed from the generator's JSON
//! into a typed [`Summary`]. Anything unparsable becomes an overview-only
//! summary; a failed call simply leaves that unit without one.

use std::collections::{BTreeMap, HashMap};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::generate::Generator;
use crate::models::Chunk;
use crate::progress::{BuildPhase, BuildProgressEvent, BuildProgressReporter};
use crate::prompts::{fill, SUMMARIZE_CHUNK, SUMMARIZE_SECTION};

/// In-flight generator calls while summarizing.
const SUMMARY_CONCURRENCY: usize = 4;
/// Section text sent to the generator is cut at this many characters.
const SECTION_TEXT_LIMIT: usize = 12_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summary {
    pub heading_path: String,
    pub overview: String,
    pub key_actions: Vec<String>,
    pub ui_terms: Vec<String>,
    pub entities: Vec<String>,
    pub synonyms: Vec<String>,
    pub limitations: Vec<String>,
    pub search_terms: Vec<String>,
    pub retrieval_text: String,
}

impl Summary {
    /// Unstructured fallback: the whole reply becomes the overview.
    pub fn from_text(heading_path: &str, text: &str) -> Self {
        Self {
            heading_path: heading_path.to_string(),
            overview: text.trim().to_string(),
            ..Default::default()
        }
    }

    /// Parse a generator reply. Tolerates code fences and prose around the
    /// JSON object. `None` for a blank reply.
    pub fn parse(heading_path: &str, reply: &str) -> Option<Self> {
        let reply = reply.trim();
        if reply.is_empty() {
            return None;
        }
        let parsed = match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str::<Summary>(&reply[start..=end]).ok(),
            _ => None,
        };
        let mut summary = parsed.unwrap_or_else(|| {
            debug!(section = heading_path, "summary reply is not JSON; keeping it as text");
            Self::from_text(heading_path, reply)
        });
        if summary.heading_path.is_empty() {
            summary.heading_path = heading_path.to_string();
        }
        Some(summary)
    }

    /// Text appended to a chunk's indexing text.
    pub fn retrieval_text(&self) -> String {
        if !self.retrieval_text.trim().is_empty() {
            return self.retrieval_text.trim().to_string();
        }
        let mut parts = vec![self.overview.trim().to_string()];
        for list in [&self.key_actions, &self.ui_terms, &self.synonyms, &self.search_terms] {
            if !list.is_empty() {
                parts.push(list.join(", "));
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }
}

/// Chunk summaries keyed by chunk id, section summaries keyed by numeral.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Summaries {
    pub chunks: HashMap<String, Summary>,
    pub sections: HashMap<String, Summary>,
}

impl Summaries {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.sections.is_empty()
    }

    /// Chunk text followed by its chunk and section retrieval text.
    pub fn indexing_text(&self, chunk: &Chunk) -> String {
        let mut text = chunk.text.clone();
        let extras = [
            self.chunks.get(&chunk.id),
            self.sections.get(&chunk.heading_num),
        ];
        for summary in extras.into_iter().flatten() {
            let extra = summary.retrieval_text();
            if !extra.is_empty() {
                text.push_str("\n\n");
                text.push_str(&extra);
            }
        }
        text
    }
}

fn page_span(start: u32, end: u32) -> String {
    if start == end {
        format!("p{}", start)
    } else {
        format!("pp{}–{}", start, end)
    }
}

/// One unit of summarization work.
struct Job {
    key: String,
    is_section: bool,
    prompt: String,
    heading_path: String,
}

/// Summarize every chunk, then every distinct section exactly once.
pub async fn build_summaries(
    chunks: &[Chunk],
    generator: &dyn Generator,
    progress: &dyn BuildProgressReporter,
) -> Summaries {
    let mut jobs: Vec<Job> = chunks
        .iter()
        .map(|c| Job {
            key: c.id.clone(),
            is_section: false,
            heading_path: c.toc_path.clone(),
            prompt: fill(
                SUMMARIZE_CHUNK,
                &[
                    ("heading_path", &c.toc_path),
                    ("page_span", &page_span(c.page_start, c.page_end)),
                    ("text", &c.text),
                ],
            ),
        })
        .collect();

    // Sections in document order, keyed by numeral.
    let mut sections: BTreeMap<usize, (&str, Vec<&Chunk>)> = BTreeMap::new();
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let slot = *first_seen.entry(chunk.heading_num.as_str()).or_insert(i);
        sections
            .entry(slot)
            .or_insert_with(|| (chunk.heading_num.as_str(), Vec::new()))
            .1
            .push(chunk);
    }
    for (numeral, members) in sections.values() {
        let first = members[0];
        let start = members.iter().map(|c| c.page_start).min().unwrap_or(first.page_start);
        let end = members.iter().map(|c| c.page_end).max().unwrap_or(first.page_end);
        let mut text = members.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n");
        if let Some((cut, _)) = text.char_indices().nth(SECTION_TEXT_LIMIT) {
            text.truncate(cut);
        }
        jobs.push(Job {
            key: numeral.to_string(),
            is_section: true,
            heading_path: first.toc_path.clone(),
            prompt: fill(
                SUMMARIZE_SECTION,
                &[
                    ("heading_path", &first.toc_path),
                    ("page_span", &page_span(start, end)),
                    ("text", &text),
                ],
            ),
        });
    }

    let total = jobs.len() as u64;
    let mut summaries = Summaries::default();
    let mut done = 0u64;
    let mut results = stream::iter(jobs.iter())
        .map(|job| async move { (job, generator.generate(&job.prompt).await) })
        .buffered(SUMMARY_CONCURRENCY);

    while let Some((job, result)) = results.next().await {
        done += 1;
        progress.report(BuildProgressEvent::Advanced {
            phase: BuildPhase::Summarizing,
            n: done,
            total,
        });
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(unit = %job.key, error = %e, "summary failed; indexing without it");
                continue;
            }
        };
        let Some(summary) = Summary::parse(&job.heading_path, &reply) else {
            continue;
        };
        if job.is_section {
            summaries.sections.insert(job.key.clone(), summary);
        } else {
            summaries.chunks.insert(job.key.clone(), summary);
        }
    }
    summaries
}
