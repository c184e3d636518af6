//! Dense vector store.
//!
//! [`DenseStore`] is the seam between the hybrid index and whatever holds
//! the embedding vectors. [`FlatIndex`] is the bundled implementation: an
//! exhaustive cosine scan, which is plenty for a single manual.
//!
//! Search returns internal positions; the index maps them back to chunk ids
//! through its own lookup array. Each entry also carries a [`DensePayload`]
//! so the store's files are self-describing.
//!
//! # On-disk format
//!
//! ```text
//! dense.bin           "MRAGVEC1" | dims: u32 LE | count: u64 LE | count × dims × f32 LE
//! dense_payload.json  [DensePayload; count]
//! ```

use std::cmp::Ordering;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::Chunk;

pub const VECTORS_FILE: &str = "dense.bin";
pub const PAYLOAD_FILE: &str = "dense_payload.json";

const MAGIC: &[u8; 8] = b"MRAGVEC1";
const HEADER_LEN: usize = 8 + 4 + 8;

/// Structural metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensePayload {
    pub chunk_id: String,
    pub toc_path: String,
    pub heading_num: String,
    pub page_start: u32,
    pub page_end: u32,
}

impl From<&Chunk> for DensePayload {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            toc_path: chunk.toc_path.clone(),
            heading_num: chunk.heading_num.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
        }
    }
}

/// Nearest-neighbour search over embedding vectors.
pub trait DenseStore: Send + Sync {
    fn dims(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Payload stored at an insertion position.
    fn payload(&self, position: usize) -> Option<&DensePayload>;
    /// Top `k` `(position, similarity)` pairs, most similar first.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;
    /// Write the store's own files into `dir`.
    fn save(&self, dir: &Path) -> Result<()>;
}

/// Exhaustive cosine-similarity store.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
    payloads: Vec<DensePayload>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Vec::new(),
            payloads: Vec::new(),
        }
    }

    pub fn add(&mut self, vector: Vec<f32>, payload: DensePayload) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "vector for chunk {} has {} dims; store expects {}",
                payload.chunk_id,
                vector.len(),
                self.dims
            );
        }
        self.vectors.push(vector);
        self.payloads.push(payload);
        Ok(())
    }

    /// Read a store written by [`DenseStore::save`].
    pub fn open(dir: &Path) -> Result<Self> {
        let vectors_path = dir.join(VECTORS_FILE);
        let payload_path = dir.join(PAYLOAD_FILE);
        for path in [&vectors_path, &payload_path] {
            if !path.exists() {
                return Err(IndexError::MissingArtifact(path.clone()).into());
            }
        }

        let bytes = std::fs::read(&vectors_path)
            .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
        let (dims, vectors) = decode_vectors(&bytes)?;

        let payload_json = std::fs::read_to_string(&payload_path)
            .with_context(|| format!("Failed to read {}", payload_path.display()))?;
        let payloads: Vec<DensePayload> = serde_json::from_str(&payload_json)
            .with_context(|| format!("Failed to parse {}", payload_path.display()))?;

        if payloads.len() != vectors.len() {
            return Err(IndexError::Misaligned(format!(
                "{} vectors but {} dense payloads",
                vectors.len(),
                payloads.len()
            ))
            .into());
        }
        Ok(Self {
            dims,
            vectors,
            payloads,
        })
    }
}

impl DenseStore for FlatIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn payload(&self, position: usize) -> Option<&DensePayload> {
        self.payloads.get(position)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn save(&self, dir: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * self.dims * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(self.dims as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for v in &self.vectors {
            bytes.extend_from_slice(&vec_to_blob(v));
        }
        std::fs::write(dir.join(VECTORS_FILE), bytes)?;
        std::fs::write(dir.join(PAYLOAD_FILE), serde_json::to_vec(&self.payloads)?)?;
        Ok(())
    }
}

fn decode_vectors(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
        bail!("{} is not a dense vector file", VECTORS_FILE);
    }
    let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count.checked_mul(dims).and_then(|n| n.checked_mul(4));
    if expected != Some(body.len()) || (dims == 0 && count > 0) {
        bail!(
            "{} is truncated: expected {} vectors of {} dims",
            VECTORS_FILE,
            count,
            dims
        );
    }
    let vectors = if dims == 0 {
        vec![Vec::new(); count]
    } else {
        body.chunks_exact(dims * 4).map(blob_to_vec).collect()
    };
    Ok((dims, vectors))
}

/// Encode a float vector as little-endian bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str) -> DensePayload {
        DensePayload {
            chunk_id: id.into(),
            toc_path: "Export".into(),
            heading_num: "2".into(),
            page_start: 2,
            page_end: 2,
        }
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn search_orders_by_similarity() {
        let mut store = FlatIndex::new(2);
        store.add(vec![0.0, 1.0], payload("a")).unwrap();
        store.add(vec![1.0, 0.1], payload("b")).unwrap();
        store.add(vec![1.0, 1.0], payload("c")).unwrap();
        let hits = store.search(&[1.0, 0.0], 2);
        let positions: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn rejects_wrong_dims() {
        let mut store = FlatIndex::new(3);
        assert!(store.add(vec![1.0], payload("a")).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndex::new(2);
        store.add(vec![0.5, -1.5], payload("a")).unwrap();
        store.add(vec![3.0, 4.0], payload("b")).unwrap();
        store.save(dir.path()).unwrap();

        let loaded = FlatIndex::open(dir.path()).unwrap();
        assert_eq!(loaded.dims(), 2);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.payload(1).unwrap().chunk_id, "b");
        assert_eq!(loaded.search(&[3.0, 4.0], 1), store.search(&[3.0, 4.0], 1));
    }

    #[test]
    fn open_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = FlatIndex::open(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::MissingArtifact(_))
        ));
    }

    #[test]
    fn open_rejects_truncated_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FlatIndex::new(2);
        store.add(vec![1.0, 2.0], payload("a")).unwrap();
        store.save(dir.path()).unwrap();
        let path = dir.path().join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        std::fs::write(&path, bytes).unwrap();
        assert!(FlatIndex::open(dir.path()).is_err());
    }

    #[test]
    fn corrupt_header_counts_are_rejected() {
        let header = |dims: u32, count: u64| {
            let mut bytes = MAGIC.to_vec();
            bytes.extend_from_slice(&dims.to_le_bytes());
            bytes.extend_from_slice(&count.to_le_bytes());
            bytes
        };
        let err = decode_vectors(&header(u32::MAX, u64::MAX)).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        let err = decode_vectors(&header(0, 1 << 40)).unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(decode_vectors(&header(3, 0)).unwrap().1.is_empty());
    }
}
