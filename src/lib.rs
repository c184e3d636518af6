//! # Manual RAG
//!
//! Structure-aware hybrid retrieval and grounded answering over product
//! manuals.
//!
//! A manual is split along its numbered headings into token-budgeted,
//! citation-tagged chunks. Every chunk is indexed twice (BM25 and dense
//! vectors) over the same text. Queries are paraphrased, searched on both
//! halves, fused with Reciprocal Rank Fusion, widened to neighbouring and
//! sibling passages, reranked, and packed into a bounded context for a
//! generator that must cite what it uses.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────────┐
//! │ PDF/text │──▶│ Headings │──▶│  Chunks  │──▶│ Hybrid index  │
//! │  pages   │   │  + TOC   │   │ + links  │   │ BM25 + dense  │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬────────┘
//!                                                     │
//!        query ─▶ expand ─▶ search ×N ─▶ RRF ─▶ neighbours ─▶ rerank ─▶ pack ─▶ answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mrag build --input manual.pdf --output ./index
//! mrag search "What export formats are supported?"
//! mrag ask "How do I reset my password?"
//! mrag inspect
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Pages, headings and chunks |
//! | [`extract`] | PDF / text page sources |
//! | [`headings`] | Heading and TOC detection, section slicing |
//! | [`chunk`] | Paragraph packing with overlap and document-order links |
//! | [`summary`] | Optional chunk and section summaries |
//! | [`embedding`] | Embedding capability and backends |
//! | [`generate`] | Text generation capability and backends |
//! | [`dense`] | Dense vector store |
//! | [`lexical`] | BM25 lexical index |
//! | [`index`] | Hybrid index build, save and load |
//! | [`expand`] | Multi-query expansion |
//! | [`fusion`] | Reciprocal Rank Fusion |
//! | [`neighbors`] | Positional and sibling expansion |
//! | [`rerank`] | Cross-encoder and generative reranking |
//! | [`pack`] | Context budget packing |
//! | [`answer`] | Context rendering and citation matching |
//! | [`search`] | Query engine and the search/ask commands |
//! | [`ingest`] | Build pipeline and the build command |
//! | [`stats`] | The inspect command |
//! | [`retry`] | Bounded retry with backoff for capability calls |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod expand;
pub mod extract;
pub mod fusion;
pub mod generate;
pub mod headings;
pub mod index;
pub mod ingest;
pub mod lexical;
pub mod logging;
pub mod models;
pub mod neighbors;
pub mod pack;
pub mod progress;
pub mod prompts;
pub mod rerank;
pub mod retry;
pub mod search;
pub mod stats;
pub mod summary;
