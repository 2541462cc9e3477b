//! Embedding gateway abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait the vault consumes, plus two
//! implementations:
//! - **[`NullProvider`]** — no model loaded; every call fails with a
//!   distinguishable [`VaultError::ModelNotLoaded`].
//! - **[`HashEmbedder`]** — deterministic bag-of-words feature hashing.
//!   No semantics beyond lexical overlap, but fast, offline, and stable
//!   across runs; used by tests and as a fallback when no model is wired up.
//!
//! Also provides the BLOB codec for storing `Vec<f32>` vectors in SQLite
//! (little-endian f32 bytes).

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{Result, VaultError};

/// Converts text into fixed-width numeric vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier for logging and store metadata.
    fn model_name(&self) -> &str;

    /// Vector dimensionality. Must match the store's configured dimension.
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Gateway with no model loaded. Always errors, distinguishably.
pub struct NullProvider;

#[async_trait]
impl EmbeddingProvider for NullProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(VaultError::ModelNotLoaded)
    }
}

/// Deterministic feature-hash embedder.
///
/// Tokens are lowercased alphanumeric runs with stopwords dropped and a
/// naive plural stem; each token is hashed into one of `dims` buckets and
/// the resulting count vector is L2-normalized.
pub struct HashEmbedder {
    dims: usize,
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "by", "can", "did", "do", "does", "for", "from", "how",
    "in", "is", "it", "of", "on", "or", "the", "to", "was", "were", "what", "which", "who", "with",
];

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
            .map(|t| {
                // Naive plural stem: "trucks" and "truck" share a bucket.
                if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                    t[..t.len() - 1].to_string()
                } else {
                    t.to_string()
                }
            })
            .collect()
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(word) % self.dims as u64) as usize
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dims];
        for token in Self::tokens(text) {
            v[self.bucket(&token)] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
