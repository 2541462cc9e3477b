//! Core data models used throughout docvault.
//!
//! These types represent the documents, chunks, sessions, and retrieval
//! results that flow through the ingestion and query pipelines. Documents and
//! chunks are owned exclusively by the [`store`](crate::store); retrieval
//! types are ephemeral and constructed fresh per query.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input to [`DocumentStore::add_document`](crate::store::DocumentStore::add_document)
/// before the store assigns an identity.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Full text content. Redacted by the store before persistence
    /// (redaction is idempotent, so pre-redacted input is fine).
    pub content: String,
    /// Source label, e.g. a filename or URL.
    pub source: String,
    /// Free-form key/value metadata.
    pub metadata: Value,
}

/// A stored document. Never mutated in place; replaced by delete + reinsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Redacted full text.
    pub content: String,
    pub source: String,
    pub metadata: Value,
    pub chunk_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A chunk ready for insertion: text plus its embedding vector.
///
/// The vector width must equal the store's configured dimension; violation
/// fails the whole `add_document` call.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub text: String,
    /// Ordinal index within the owning document.
    pub ordinal: i64,
    pub token_estimate: i64,
    pub embedding: Vec<f32>,
}

/// A stored chunk, cascade-deleted with its document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub ordinal: i64,
    pub token_estimate: i64,
    pub embedding: Vec<f32>,
    pub created_at: i64,
}

/// A named grouping of documents representing an active working set.
/// Deleting a session never deletes its member documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub last_accessed_at: i64,
}

/// One similarity-search result: chunk, owning document context, and a
/// similarity score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub source: String,
    pub token_estimate: i64,
    pub metadata: Value,
    pub score: f32,
}

/// A chunk excerpt chosen for a context bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub text: String,
    pub source: String,
    pub document_id: String,
    pub ordinal: i64,
    pub score: f32,
    pub token_estimate: i64,
    /// Document metadata, present only when the retrieval config asks for it.
    pub metadata: Option<Value>,
}

/// The ranked, budget-limited context bundle for one query.
/// Ephemeral — never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub query: String,
    pub chunks: Vec<ContextChunk>,
    /// Candidates considered before dedup/budget, 0 when retrieval degraded.
    pub total_candidates: usize,
    pub elapsed_ms: u64,
}

impl RetrievedContext {
    /// An empty bundle for a query. Used both for genuinely empty results
    /// and for graceful degradation when embedding or search fails.
    pub fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            chunks: Vec::new(),
            total_candidates: 0,
            elapsed_ms: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Sum of estimated token counts across the chosen chunks.
    pub fn total_tokens(&self) -> i64 {
        self.chunks.iter().map(|c| c.token_estimate).sum()
    }
}
