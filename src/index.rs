//! The hybrid index: dense and lexical halves over identical chunk text.
//!
//! # Build
//!
//! [`build_index`] derives one indexing text per chunk (chunk text plus any
//! chunk and section summary retrieval text), tokenizes it for BM25 and, when
//! an [`Embedder`] is supplied, embeds it into a [`FlatIndex`]. Both halves
//! keep an id lookup aligned to their internal insertion order. A sibling
//! map groups chunk ids by `parent_key` in document order.
//!
//! # Persistence
//!
//! ```text
//! <dir>/
//!   index.json          format version, config, chunks, lexical corpus,
//!                       dense descriptor, sibling map, summaries
//!   dense.bin           (dense half only)
//!   dense_payload.json  (dense half only)
//! ```
//!
//! [`save_index`] writes everything into a sibling temporary directory and
//! swaps it into place with renames, so a reader never sees a half-written
//! index. [`load_index`] rebuilds the lexical structure from the persisted
//! tokens and re-attaches the caller's embedder before reopening the dense
//! store; a missing file, an unknown format version, misaligned lookups or
//! a different embedder are all errors.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dense::{DensePayload, DenseStore, FlatIndex};
use crate::embedding::{descriptor, embed_batched, embed_query, Embedder};
use crate::error::IndexError;
use crate::lexical::{tokenize, LexicalIndex};
use crate::models::{Chunk, Page};
use crate::progress::{BuildPhase, BuildProgressEvent, BuildProgressReporter};
use crate::summary::Summaries;

pub const FORMAT_VERSION: u32 = 1;
pub const METADATA_FILE: &str = "index.json";

/// Embedder identity persisted with the dense half.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseDescriptor {
    pub backend: String,
    pub model: String,
    pub dims: usize,
    /// Chunk id at each dense insertion position.
    pub ids: Vec<String>,
}

impl DenseDescriptor {
    fn label(&self) -> String {
        format!("{}:{}/{}", self.backend, self.model, self.dims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LexicalPart {
    ids: Vec<String>,
    corpus: Vec<Vec<String>>,
}

/// Everything in `index.json`.
#[derive(Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    built_at: DateTime<Utc>,
    #[serde(default)]
    source_digest: Option<String>,
    config: Config,
    chunks: Vec<Chunk>,
    lexical: LexicalPart,
    #[serde(default)]
    dense: Option<DenseDescriptor>,
    siblings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    summaries: Summaries,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

struct DenseHalf {
    store: Box<dyn DenseStore>,
    descriptor: DenseDescriptor,
    embedder: Arc<dyn Embedder>,
}

/// A built or loaded index. Read-only; share it behind an `Arc` across
/// concurrent queries.
pub struct Index {
    config: Config,
    chunks: Vec<Chunk>,
    chunk_map: HashMap<String, Chunk>,
    lexical: LexicalIndex,
    dense: Option<DenseHalf>,
    siblings: HashMap<String, Vec<String>>,
    summaries: Summaries,
    source_digest: Option<String>,
    built_at: DateTime<Utc>,
}

impl Index {
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Chunks in document order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_map(&self) -> &HashMap<String, Chunk> {
        &self.chunk_map
    }

    pub fn siblings(&self) -> &HashMap<String, Vec<String>> {
        &self.siblings
    }

    pub fn summaries(&self) -> &Summaries {
        &self.summaries
    }

    pub fn source_digest(&self) -> Option<&str> {
        self.source_digest.as_deref()
    }

    /// Record the SHA-256 of the pages this index was built from.
    pub fn set_source_digest(&mut self, pages: &[Page]) {
        self.source_digest = Some(source_digest(pages));
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn has_dense(&self) -> bool {
        self.dense.is_some()
    }

    pub fn dense_descriptor(&self) -> Option<&DenseDescriptor> {
        self.dense.as_ref().map(|d| &d.descriptor)
    }

    /// Top `k` chunk ids by BM25.
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<String> {
        self.lexical
            .search(query, k)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Top `k` chunk ids by cosine similarity to the embedded query.
    /// Empty when the index has no dense half.
    pub async fn dense_search(&self, query: &str, k: usize) -> Result<Vec<String>> {
        let Some(dense) = &self.dense else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = embed_query(dense.embedder.as_ref(), query).await?;
        Ok(dense
            .store
            .search(&vector, k)
            .into_iter()
            .filter_map(|(pos, _)| dense.descriptor.ids.get(pos).cloned())
            .collect())
    }
}

/// Hex SHA-256 over page numbers and texts.
pub fn source_digest(pages: &[Page]) -> String {
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update(page.number.to_le_bytes());
        hasher.update(page.text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn sibling_map(chunks: &[Chunk]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for chunk in chunks {
        map.entry(chunk.parent_key.clone())
            .or_default()
            .push(chunk.id.clone());
    }
    map
}

fn chunk_map(chunks: &[Chunk]) -> Result<HashMap<String, Chunk>, IndexError> {
    let mut map = HashMap::with_capacity(chunks.len());
    for chunk in chunks {
        if map.insert(chunk.id.clone(), chunk.clone()).is_some() {
            return Err(IndexError::Misaligned(format!("duplicate chunk id {}", chunk.id)));
        }
    }
    Ok(map)
}

/// Build an index over `chunks` (document order). Without an embedder the
/// index has no dense half and retrieval is lexical-only.
pub async fn build_index(
    chunks: Vec<Chunk>,
    config: &Config,
    embedder: Option<Arc<dyn Embedder>>,
    summaries: Summaries,
    progress: &dyn BuildProgressReporter,
) -> Result<Index> {
    if chunks.is_empty() {
        bail!("No chunks to index; the source document has no text");
    }
    let chunk_map = chunk_map(&chunks)?;

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let texts: Vec<String> = chunks.iter().map(|c| summaries.indexing_text(c)).collect();

    let corpus = texts.iter().map(|t| tokenize(t)).collect();
    let lexical = LexicalIndex::new(ids.clone(), corpus)?;

    let dense = match embedder {
        Some(embedder) => {
            let total = texts.len() as u64;
            let vectors = embed_batched(
                embedder.as_ref(),
                &texts,
                config.embedding.batch_size,
                |done, _| {
                    progress.report(BuildProgressEvent::Advanced {
                        phase: BuildPhase::Embedding,
                        n: done as u64,
                        total,
                    })
                },
            )
            .await
            .context("Embedding chunks failed")?;

            let mut store = FlatIndex::new(embedder.dims());
            for (vector, chunk) in vectors.into_iter().zip(&chunks) {
                store.add(vector, DensePayload::from(chunk))?;
            }
            Some(DenseHalf {
                store: Box::new(store),
                descriptor: DenseDescriptor {
                    backend: embedder.backend().to_string(),
                    model: embedder.model_name().to_string(),
                    dims: embedder.dims(),
                    ids,
                },
                embedder,
            })
        }
        None => {
            debug!("no embedder configured; building a lexical-only index");
            None
        }
    };

    let siblings = sibling_map(&chunks);
    info!(
        chunks = chunks.len(),
        dense = dense.is_some(),
        summaries = summaries.chunks.len() + summaries.sections.len(),
        "index built"
    );

    Ok(Index {
        config: config.clone(),
        chunks,
        chunk_map,
        lexical,
        dense,
        siblings,
        summaries,
        source_digest: None,
        built_at: Utc::now(),
    })
}

/// Write `index` to `dir`, replacing any previous index there.
pub fn save_index(index: &Index, dir: &Path) -> Result<()> {
    if dir.exists() && !dir.join(METADATA_FILE).exists() && dir_has_entries(dir)? {
        bail!(
            "Refusing to overwrite {}: it exists and does not contain an index",
            dir.display()
        );
    }

    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid index path: {}", dir.display()))?;
    let parent = match dir.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let tag = uuid::Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{}.tmp-{}", name, tag));
    std::fs::create_dir(&staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;

    if let Err(e) = write_index_files(index, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let backup = parent.join(format!(".{}.old-{}", name, tag));
    let had_previous = dir.exists();
    if had_previous {
        std::fs::rename(dir, &backup)
            .with_context(|| format!("Failed to move aside {}", dir.display()))?;
    }
    if let Err(e) = std::fs::rename(&staging, dir) {
        if had_previous {
            let _ = std::fs::rename(&backup, dir);
        }
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e).with_context(|| format!("Failed to move index into {}", dir.display()));
    }
    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&backup) {
            warn!(path = %backup.display(), error = %e, "could not remove previous index");
        }
    }
    info!(path = %dir.display(), "index saved");
    Ok(())
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .next()
        .is_some())
}

fn write_index_files(index: &Index, dir: &Path) -> Result<()> {
    let file = IndexFile {
        format_version: FORMAT_VERSION,
        built_at: index.built_at,
        source_digest: index.source_digest.clone(),
        config: index.config.clone(),
        chunks: index.chunks.clone(),
        lexical: LexicalPart {
            ids: index.lexical.ids().to_vec(),
            corpus: index.lexical.corpus().to_vec(),
        },
        dense: index.dense.as_ref().map(|d| d.descriptor.clone()),
        siblings: index
            .siblings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        summaries: index.summaries.clone(),
    };
    let json = serde_json::to_vec(&file)?;
    std::fs::write(dir.join(METADATA_FILE), json)
        .with_context(|| format!("Failed to write {}", METADATA_FILE))?;
    if let Some(dense) = &index.dense {
        dense.store.save(dir)?;
    }
    Ok(())
}

/// Load an index written by [`save_index`]. An index with a dense half
/// needs an embedder matching the one it was built with.
pub fn load_index(dir: &Path, embedder: Option<Arc<dyn Embedder>>) -> Result<Index> {
    let meta_path = dir.join(METADATA_FILE);
    if !meta_path.exists() {
        return Err(IndexError::MissingArtifact(meta_path).into());
    }
    let raw = std::fs::read(&meta_path)
        .with_context(|| format!("Failed to read {}", meta_path.display()))?;

    let probe: VersionProbe = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse {}", meta_path.display()))?;
    if probe.format_version != FORMAT_VERSION {
        return Err(IndexError::IncompatibleVersion {
            found: probe.format_version,
            expected: FORMAT_VERSION,
        }
        .into());
    }
    let file: IndexFile = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse {}", meta_path.display()))?;

    let chunk_map = chunk_map(&file.chunks)?;
    check_ids("lexical", &file.lexical.ids, &chunk_map)?;
    let lexical = LexicalIndex::new(file.lexical.ids, file.lexical.corpus)?;

    let dense = match (file.dense, embedder) {
        (None, Some(_)) => {
            debug!("index has no dense half; ignoring the configured embedder");
            None
        }
        (None, None) => None,
        (Some(_), None) => return Err(IndexError::EmbedderRequired.into()),
        (Some(persisted), Some(embedder)) => {
            let provided = descriptor(embedder.as_ref());
            if provided != persisted.label() {
                return Err(IndexError::EmbedderMismatch {
                    persisted: persisted.label(),
                    provided,
                }
                .into());
            }
            check_ids("dense", &persisted.ids, &chunk_map)?;
            let store = FlatIndex::open(dir)?;
            check_store(&store, &persisted)?;
            Some(DenseHalf {
                store: Box::new(store),
                descriptor: persisted,
                embedder,
            })
        }
    };

    Ok(Index {
        config: file.config,
        siblings: file.siblings.into_iter().collect(),
        chunks: file.chunks,
        chunk_map,
        lexical,
        dense,
        summaries: file.summaries,
        source_digest: file.source_digest,
        built_at: file.built_at,
    })
}

/// Every chunk appears exactly once in a lookup.
fn check_ids(half: &str, ids: &[String], chunks: &HashMap<String, Chunk>) -> Result<(), IndexError> {
    if ids.len() != chunks.len() {
        return Err(IndexError::Misaligned(format!(
            "{} lookup has {} ids for {} chunks",
            half,
            ids.len(),
            chunks.len()
        )));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !chunks.contains_key(id) || !seen.insert(id) {
            return Err(IndexError::Misaligned(format!("{} lookup has unexpected id {}", half, id)));
        }
    }
    Ok(())
}

fn check_store(store: &FlatIndex, descriptor: &DenseDescriptor) -> Result<(), IndexError> {
    if store.dims() != descriptor.dims {
        return Err(IndexError::Misaligned(format!(
            "dense store has {} dims; descriptor says {}",
            store.dims(),
            descriptor.dims
        )));
    }
    if store.len() != descriptor.ids.len() {
        return Err(IndexError::Misaligned(format!(
            "dense store has {} vectors for {} ids",
            store.len(),
            descriptor.ids.len()
        )));
    }
    for (pos, id) in descriptor.ids.iter().enumerate() {
        if store.payload(pos).map(|p| &p.chunk_id) != Some(id) {
            return Err(IndexError::Misaligned(format!(
                "dense position {} does not hold chunk {}",
                pos, id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use async_trait::async_trait;

    fn chunk(id: &str, num: &str, text: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: text.into(),
            toc_path: format!("S{}", num),
            page_start: 1,
            page_end: 1,
            heading_num: num.into(),
            heading_title: format!("S{}", num),
            heading_level: crate::models::heading_level(num),
            ordinal_in_section: 0,
            parent_key: crate::models::parent_key(num),
            prev_id: None,
            next_id: None,
        }
    }

    fn sample() -> Vec<Chunk> {
        vec![
            chunk("a", "1", "Install the application from the installer."),
            chunk("b", "1.1", "Sign in with your account."),
            chunk("c", "1.2", "Configure a proxy server."),
            chunk("d", "2", "CSV and JSON are supported."),
        ]
    }

    /// Two-dim "embedding": counts of the letters e and s.
    struct Letters {
        model: &'static str,
    }

    #[async_trait]
    impl Embedder for Letters {
        fn backend(&self) -> &str {
            "test"
        }
        fn model_name(&self) -> &str {
            self.model
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let e = t.matches('e').count() as f32;
                    let s = t.matches('s').count() as f32;
                    vec![e + 0.1, s + 0.1]
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn sibling_map_groups_by_parent() {
        let index = build_index(sample(), &Config::default(), None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        assert_eq!(index.siblings()["1"], vec!["b", "c"]);
        assert_eq!(index.siblings()[""], vec!["a", "d"]);
        assert!(!index.has_dense());
    }

    #[tokio::test]
    async fn empty_chunk_list_is_an_error() {
        let result = build_index(Vec::new(), &Config::default(), None, Summaries::default(), &NoProgress).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn round_trip_with_dense_half() {
        let embedder: Arc<dyn Embedder> = Arc::new(Letters { model: "m1" });
        let mut index = build_index(
            sample(),
            &Config::default(),
            Some(embedder.clone()),
            Summaries::default(),
            &NoProgress,
        )
        .await
        .unwrap();
        index.set_source_digest(&[Page::new(1, "hello")]);

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("idx");
        save_index(&index, &dir).unwrap();
        let loaded = load_index(&dir, Some(embedder)).unwrap();

        assert_eq!(loaded.chunk_map(), index.chunk_map());
        assert_eq!(loaded.chunks(), index.chunks());
        assert_eq!(loaded.source_digest(), index.source_digest());
        assert_eq!(loaded.lexical_search("proxy server", 3), index.lexical_search("proxy server", 3));
        assert_eq!(
            loaded.dense_search("sessions", 3).await.unwrap(),
            index.dense_search("sessions", 3).await.unwrap()
        );
    }

    #[tokio::test]
    async fn load_checks_embedder() {
        let embedder: Arc<dyn Embedder> = Arc::new(Letters { model: "m1" });
        let index = build_index(sample(), &Config::default(), Some(embedder), Summaries::default(), &NoProgress)
            .await
            .unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("idx");
        save_index(&index, &dir).unwrap();

        let err = load_index(&dir, None).err().unwrap();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::EmbedderRequired)));

        let other: Arc<dyn Embedder> = Arc::new(Letters { model: "m2" });
        let err = load_index(&dir, Some(other)).err().unwrap();
        match err.downcast_ref::<IndexError>() {
            Some(IndexError::EmbedderMismatch { persisted, provided }) => {
                assert!(persisted.contains("m1"), "persisted: {}", persisted);
                assert!(provided.contains("m2"), "provided: {}", provided);
            }
            other => panic!("expected embedder mismatch, got {:?}", other),
        }

        let same: Arc<dyn Embedder> = Arc::new(Letters { model: "m1" });
        let loaded = load_index(&dir, Some(same)).unwrap();
        assert_eq!(loaded.dense_descriptor().map(|d| d.model.as_str()), Some("m1"));
    }

    #[tokio::test]
    async fn load_rejects_missing_and_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_index(tmp.path(), None).err().unwrap();
        assert!(matches!(err.downcast_ref::<IndexError>(), Some(IndexError::MissingArtifact(_))));

        let index = build_index(sample(), &Config::default(), None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        let dir = tmp.path().join("idx");
        save_index(&index, &dir).unwrap();
        let meta = dir.join(METADATA_FILE);
        let mut value: serde_json::Value = serde_json::from_slice(&std::fs::read(&meta).unwrap()).unwrap();
        value["format_version"] = serde_json::json!(FORMAT_VERSION + 1);
        std::fs::write(&meta, serde_json::to_vec(&value).unwrap()).unwrap();

        let err = load_index(&dir, None).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::IncompatibleVersion { .. })
        ));
    }

    #[tokio::test]
    async fn save_replaces_previous_index_and_leaves_no_temp_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("idx");
        let first = build_index(sample(), &Config::default(), None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        save_index(&first, &dir).unwrap();

        let second = build_index(sample()[..2].to_vec(), &Config::default(), None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        save_index(&second, &dir).unwrap();

        assert_eq!(load_index(&dir, None).unwrap().chunks().len(), 2);
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn save_refuses_foreign_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();
        let index = build_index(sample(), &Config::default(), None, Summaries::default(), &NoProgress)
            .await
            .unwrap();
        assert!(save_index(&index, tmp.path()).is_err());
        assert!(tmp.path().join("notes.txt").exists());
    }
}
