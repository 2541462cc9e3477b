//! End-to-end orchestration: ingestion and query pipelines.
//!
//! Each pipeline runs its stages in a spawned task and reports progress as
//! an ordered event stream over an mpsc channel, so callers (the CLI, an
//! embedding application) can render progress without polling. Stage order
//! is fixed; an `Error` event is always the last one emitted on failure.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::chunk::{chunk_text, ChunkingConfig};
use crate::embedding::EmbeddingProvider;
use crate::generation::{CancelHandle, GenerationParams, GenerationProvider};
use crate::models::{EmbeddedChunk, NewDocument};
use crate::retrieve::{format_context_for_prompt, RetrievalConfig, Retriever};
use crate::store::DocumentStore;

/// Progress events for one document ingestion, in stage order.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Reading,
    Chunking,
    /// One event per embedded chunk; `current` is 1-based.
    Embedding {
        current: usize,
        total: usize,
    },
    Storing,
    Complete {
        document_id: String,
        chunk_count: usize,
        duration_ms: u64,
    },
    Error(String),
}

/// Progress events for one question, in stage order. `Token` events carry
/// the generated answer incrementally.
#[derive(Debug, Clone)]
pub enum QueryEvent {
    Retrieving,
    /// Context found; carries the number of chunks in the bundle.
    ContextRetrieved(usize),
    /// Nothing relevant in the vault; generation proceeds ungrounded.
    NoContext,
    Generating,
    Token(String),
    Complete,
    Error(String),
}

/// Chunk, embed, redact, and store one document.
pub struct IngestPipeline {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
        }
    }

    /// Ingest a document, reporting progress on the returned channel. The
    /// channel closes after `Complete` or `Error`.
    pub fn ingest(&self, new: NewDocument) -> mpsc::Receiver<IngestEvent> {
        let (tx, rx) = mpsc::channel(32);
        let store = Arc::clone(&self.store);
        let embedder = Arc::clone(&self.embedder);
        let chunking = self.chunking.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let _ = tx.send(IngestEvent::Reading).await;

            let _ = tx.send(IngestEvent::Chunking).await;
            let segments = chunk_text(&new.content, &chunking);
            let total = segments.len();

            let mut chunks = Vec::with_capacity(total);
            for (i, segment) in segments.into_iter().enumerate() {
                let _ = tx
                    .send(IngestEvent::Embedding {
                        current: i + 1,
                        total,
                    })
                    .await;
                match embedder.embed(&segment.text).await {
                    Ok(embedding) => chunks.push(EmbeddedChunk {
                        text: segment.text,
                        ordinal: segment.ordinal,
                        token_estimate: segment.token_estimate as i64,
                        embedding,
                    }),
                    Err(e) => {
                        let _ = tx.send(IngestEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx.send(IngestEvent::Storing).await;
            match store.add_document(new, chunks).await {
                Ok(doc) => {
                    let _ = tx
                        .send(IngestEvent::Complete {
                            document_id: doc.id,
                            chunk_count: doc.chunk_count as usize,
                            duration_ms: started.elapsed().as_millis() as u64,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx.send(IngestEvent::Error(e.to_string())).await;
                }
            }
        });

        rx
    }
}

/// Retrieve context for a question and stream a grounded answer.
pub struct QueryPipeline {
    retriever: Arc<Retriever>,
    generator: Arc<dyn GenerationProvider>,
    retrieval: RetrievalConfig,
    generation: GenerationParams,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn GenerationProvider>,
        retrieval: RetrievalConfig,
        generation: GenerationParams,
    ) -> Self {
        Self {
            retriever,
            generator,
            retrieval,
            generation,
        }
    }

    /// Ask a question. Events arrive in stage order; answer tokens stream as
    /// `Token` events. The returned [`CancelHandle`] stops generation
    /// promptly; queries never write, so cancellation needs no cleanup.
    pub fn ask(&self, query: &str) -> (mpsc::Receiver<QueryEvent>, CancelHandle) {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancelHandle::new();

        let retriever = Arc::clone(&self.retriever);
        let generator = Arc::clone(&self.generator);
        let retrieval = self.retrieval.clone();
        let generation = self.generation.clone();
        let query = query.to_string();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let _ = tx.send(QueryEvent::Retrieving).await;
            let context = retriever.retrieve_context(&query, &retrieval).await;

            let prompt = if context.is_empty() {
                let _ = tx.send(QueryEvent::NoContext).await;
                query.clone()
            } else {
                let _ = tx
                    .send(QueryEvent::ContextRetrieved(context.chunks.len()))
                    .await;
                format_context_for_prompt(&context)
            };

            if task_cancel.is_cancelled() {
                let _ = tx.send(QueryEvent::Complete).await;
                return;
            }

            let _ = tx.send(QueryEvent::Generating).await;
            let mut tokens = match generator
                .stream_generate(&prompt, &generation, task_cancel)
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    let _ = tx.send(QueryEvent::Error(e.to_string())).await;
                    return;
                }
            };

            while let Some(token) = tokens.recv().await {
                match token {
                    Ok(t) => {
                        if tx.send(QueryEvent::Token(t)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(QueryEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx.send(QueryEvent::Complete).await;
        });

        (rx, cancel)
    }
}
