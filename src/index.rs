//! Attachable similarity-index subsystem.
//!
//! Brute-force cosine scan over the vault's chunk vectors, held decrypted in
//! memory. The index is rebuilt from chunk rows at every open, so a crash
//! between a document insert and an index insert can never leave a document
//! permanently unsearchable — the next open repairs it.
//!
//! Scores are cosine similarity mapped to `[0, 1]` via `(cos + 1) / 2`.
//! Results are ordered descending by score with ties broken by insertion
//! order (entries are kept in insertion order and the sort is stable).

use tokio::sync::RwLock;

use crate::error::{Result, VaultError};

/// Compute cosine similarity between two vectors, in `[-1, 1]`.
/// Returns `0.0` for empty vectors or vectors of different lengths.
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

/// Map raw cosine similarity into the bounded `[0, 1]` score space.
pub fn similarity_score(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

struct IndexEntry {
    chunk_id: String,
    vector: Vec<f32>,
}

/// In-memory vector index over chunk embeddings.
pub struct VectorIndex {
    dims: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl VectorIndex {
    /// Attach the index subsystem. Fails when the configured dimension is
    /// zero (no usable vector space); callers decide whether that is fatal.
    pub fn attach(dims: usize) -> Result<Self> {
        if dims == 0 {
            return Err(VaultError::IndexUnavailable(
                "embedding dimension is 0".into(),
            ));
        }
        Ok(Self {
            dims,
            entries: RwLock::new(Vec::new()),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Insert one chunk vector. Width must match the index dimension.
    pub async fn insert(&self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dims {
            return Err(VaultError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        self.entries.write().await.push(IndexEntry {
            chunk_id: chunk_id.to_string(),
            vector,
        });
        Ok(())
    }

    /// Remove all entries whose chunk id is in `chunk_ids`.
    pub async fn remove(&self, chunk_ids: &[String]) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !chunk_ids.iter().any(|id| id == &e.chunk_id));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Rank chunk ids by similarity to `query`. Empty index yields an empty
    /// vec, never an error.
    pub async fn search(&self, query: &[f32], limit: usize, min_score: f32) -> Vec<(String, f32)> {
        let entries = self.entries.read().await;

        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .map(|e| {
                (
                    e.chunk_id.clone(),
                    similarity_score(cosine_similarity(query, &e.vector)),
                )
            })
            .filter(|(_, score)| *score >= min_score)
            .collect();

        // Stable sort keeps insertion order for equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}
