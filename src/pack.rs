//! Greedy context packing under chunk-count and character budgets.

use std::collections::HashMap;

use crate::config::ContextConfig;
use crate::models::Chunk;

/// Keep chunks in `ordered` order while they fit.
///
/// Each chunk costs its text length plus `chunk_overhead`. Packing stops
/// once `max_chunks` are kept; a chunk too large for the remaining
/// character budget is skipped and later, smaller chunks are still
/// considered. Unknown ids are ignored.
pub fn pack_context<'a>(
    ordered: &[String],
    chunks: &'a HashMap<String, Chunk>,
    cfg: &ContextConfig,
) -> Vec<&'a Chunk> {
    let mut kept = Vec::new();
    let mut total = 0usize;

    for id in ordered {
        if kept.len() >= cfg.max_chunks {
            break;
        }
        let Some(chunk) = chunks.get(id) else {
            continue;
        };
        let size = chunk.text.chars().count() + cfg.chunk_overhead;
        if total + size > cfg.max_chars {
            continue;
        }
        kept.push(chunk);
        total += size;
    }
    kept
}
