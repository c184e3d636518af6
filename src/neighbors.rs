//! Neighborhood expansion of fused results.
//!
//! Answers in a manual often continue in the next passage or sit beside a
//! related subsection. Each fused chunk pulls in up to `radius` chunks on
//! either side along its own `prev_id`/`next_id` links and, optionally,
//! every chunk sharing its `parent_key`.

use std::collections::{HashMap, HashSet};

use crate::models::Chunk;

/// Insertion-ordered id set.
#[derive(Default)]
struct Collected {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl Collected {
    fn add(&mut self, id: &str) {
        if self.seen.insert(id.to_string()) {
            self.order.push(id.to_string());
        }
    }
}

/// Deduplicated expansion of `fused`. Base ids come first in their fused
/// order, followed by discovered ids in discovery order; the reranker
/// decides the final order. Ids unknown to `chunks` are kept but not
/// expanded.
pub fn expand_neighborhood(
    fused: &[String],
    chunks: &HashMap<String, Chunk>,
    siblings: &HashMap<String, Vec<String>>,
    radius: usize,
    include_siblings: bool,
) -> Vec<String> {
    let mut out = Collected::default();
    for id in fused {
        out.add(id);
    }

    for id in fused {
        let Some(base) = chunks.get(id) else {
            continue;
        };

        let mut cursor = base;
        for _ in 0..radius {
            let Some(prev) = cursor.prev_id.as_ref().and_then(|p| chunks.get(p)) else {
                break;
            };
            out.add(&prev.id);
            cursor = prev;
        }

        let mut cursor = base;
        for _ in 0..radius {
            let Some(next) = cursor.next_id.as_ref().and_then(|n| chunks.get(n)) else {
                break;
            };
            out.add(&next.id);
            cursor = next;
        }

        if include_siblings {
            for sibling in siblings.get(&base.parent_key).into_iter().flatten() {
                out.add(sibling);
            }
        }
    }
    out.order
}
