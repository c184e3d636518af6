//! Typed errors for the index and extraction layers.
//!
//! Application code wraps these in `anyhow::Error` with `.context()`;
//! callers that care about the variant (e.g. the CLI distinguishing a
//! missing index from a stale one) can `downcast_ref` them.

use std::path::PathBuf;

use thiserror::Error;

/// Failures loading or validating a persisted index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index artifact missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("index format version {found} is not supported (expected {expected}); rebuild the index")]
    IncompatibleVersion { found: u32, expected: u32 },

    #[error("index lookups are misaligned: {0}")]
    Misaligned(String),

    #[error("embedder mismatch: index was built with {persisted}, got {provided}")]
    EmbedderMismatch { persisted: String, provided: String },

    #[error("index has a dense half but no embedder was supplied")]
    EmbedderRequired,
}

/// Failures reading a source document.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source document not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },
}

/// Outcome classification for a capability call, consumed by [`crate::retry::RetryPolicy`].
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{0}")]
    Retryable(anyhow::Error),
    #[error("{0}")]
    Fatal(anyhow::Error),
}
