//! Query-time retrieval: embed a question, rank chunks, assemble a
//! token-budgeted context bundle.
//!
//! Retrieval is deliberately infallible at the public surface: any internal
//! failure (embedding, search, decryption) degrades to an empty
//! [`RetrievedContext`] with a warning, so a flaky index never takes the
//! whole query path down with it.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::models::{ContextChunk, RetrievedContext, SearchHit};
use crate::store::DocumentStore;

/// Tunables for one retrieval pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks to return after dedup and budgeting.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum similarity score, in `[0, 1]`.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Keep at most one chunk per `(document, ordinal)` position.
    #[serde(default = "default_true")]
    pub dedupe: bool,
    /// Attach document metadata to each context chunk.
    #[serde(default)]
    pub include_metadata: bool,
    /// Token budget for the assembled bundle. Chunks are taken greedily in
    /// rank order and the first one that does not fit stops assembly; chunks
    /// are never truncated.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_max_context_tokens() -> usize {
    2000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            dedupe: default_true(),
            include_metadata: false,
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

pub struct Retriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// Retrieve context for a query. Never fails: internal errors degrade to
    /// an empty bundle with a warning in the log.
    pub async fn retrieve_context(&self, query: &str, config: &RetrievalConfig) -> RetrievedContext {
        let started = Instant::now();
        match self.retrieve_inner(query, config).await {
            Ok((chunks, total_candidates)) => RetrievedContext {
                query: query.to_string(),
                chunks,
                total_candidates,
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => {
                tracing::warn!("retrieval degraded to empty context: {}", e);
                let mut empty = RetrievedContext::empty(query);
                empty.elapsed_ms = started.elapsed().as_millis() as u64;
                empty
            }
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<(Vec<ContextChunk>, usize)> {
        let query_vec = self.embedder.embed(query).await?;

        // Over-fetch so dedup and budgeting still have top_k candidates to
        // choose from.
        let fetch = config.top_k.saturating_mul(2).max(config.top_k);
        let hits = self
            .store
            .search_similar(&query_vec, fetch, config.min_score)
            .await?;
        let total_candidates = hits.len();

        Ok((select_chunks(hits, config), total_candidates))
    }

    /// Streaming variant of [`retrieve_context`](Self::retrieve_context):
    /// chunks arrive on the channel in the same order the batched call would
    /// return them.
    pub async fn retrieve_context_stream(
        self: &Arc<Self>,
        query: &str,
        config: &RetrievalConfig,
    ) -> mpsc::Receiver<ContextChunk> {
        let (tx, rx) = mpsc::channel(16);
        let retriever = Arc::clone(self);
        let query = query.to_string();
        let config = config.clone();

        tokio::spawn(async move {
            let bundle = retriever.retrieve_context(&query, &config).await;
            for chunk in bundle.chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        rx
    }
}

/// Pure selection over ranked hits: first-wins dedupe on
/// `(document_id, ordinal)`, top-k cap, and a greedy token budget that stops
/// at the first chunk that does not fit — chunks are never truncated.
fn select_chunks(hits: Vec<SearchHit>, config: &RetrievalConfig) -> Vec<ContextChunk> {
    let mut chunks = Vec::with_capacity(config.top_k);
    let mut seen: Vec<(String, i64)> = Vec::new();
    let mut used_tokens = 0usize;

    for hit in hits {
        if chunks.len() >= config.top_k {
            break;
        }
        if config.dedupe {
            let key = (hit.document_id.clone(), hit.ordinal);
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
        }

        let cost = hit.token_estimate.max(0) as usize;
        if used_tokens + cost > config.max_context_tokens {
            // Budget stop, not truncation.
            break;
        }
        used_tokens += cost;
        chunks.push(context_chunk(hit, config.include_metadata));
    }

    chunks
}

fn context_chunk(hit: SearchHit, include_metadata: bool) -> ContextChunk {
    ContextChunk {
        text: hit.text,
        source: hit.source,
        document_id: hit.document_id,
        ordinal: hit.ordinal,
        score: hit.score,
        token_estimate: hit.token_estimate,
        metadata: include_metadata.then_some(hit.metadata),
    }
}

/// Render a retrieved bundle as a grounding prompt for generation. An empty
/// bundle renders as the empty string so callers can detect the no-context
/// case.
pub fn format_context_for_prompt(context: &RetrievedContext) -> String {
    if context.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "Answer the question using only the context below. Cite sources by number.\n\n",
    );
    for (i, chunk) in context.chunks.iter().enumerate() {
        out.push_str(&format!(
            "[{}] (source: {}, relevance: {:.0}%)\n{}\n\n",
            i + 1,
            chunk.source,
            chunk.score * 100.0,
            chunk.text
        ));
    }
    out.push_str(&format!("Question: {}", context.query));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{EmbeddedChunk, NewDocument};
    use crate::store::StoreConfig;
    use tempfile::TempDir;

    const DIMS: usize = 256;

    async fn seeded(dir: &TempDir) -> (Arc<DocumentStore>, Arc<HashEmbedder>) {
        let store = DocumentStore::open(
            &dir.path().join("vault.db"),
            "pw",
            &StoreConfig {
                dims: DIMS,
                require_index: true,
            },
        )
        .await
        .unwrap();
        (Arc::new(store), Arc::new(HashEmbedder::new(DIMS)))
    }

    async fn add_text(store: &DocumentStore, embedder: &HashEmbedder, source: &str, text: &str) {
        let embedding = embedder.embed(text).await.unwrap();
        store
            .add_document(
                NewDocument {
                    content: text.to_string(),
                    source: source.to_string(),
                    metadata: serde_json::json!({"lang": "en"}),
                },
                vec![EmbeddedChunk {
                    text: text.to_string(),
                    ordinal: 0,
                    token_estimate: crate::chunk::estimate_tokens(text) as i64,
                    embedding,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retrieves_relevant_chunk_first() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        add_text(
            &store,
            &embedder,
            "dock-rules.txt",
            "Dock rules: trucks over 40 feet must use Dock 7 or Dock 8 between 6AM and 10AM.",
        )
        .await;
        add_text(
            &store,
            &embedder,
            "bread.txt",
            "Feed the sourdough starter twice daily with equal parts flour and water.",
        )
        .await;

        let retriever = Retriever::new(store, embedder);
        let ctx = retriever
            .retrieve_context(
                "Which dock should a 45-foot truck use at 8AM?",
                &RetrievalConfig {
                    top_k: 3,
                    min_score: 0.5,
                    ..Default::default()
                },
            )
            .await;

        assert!(!ctx.is_empty());
        assert_eq!(ctx.chunks[0].source, "dock-rules.txt");
        assert!(ctx.chunks[0].score >= 0.5);
    }

    #[tokio::test]
    async fn test_empty_store_degrades_to_empty_context() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        let retriever = Retriever::new(store, embedder);

        let ctx = retriever
            .retrieve_context("anything at all", &RetrievalConfig::default())
            .await;
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_candidates, 0);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_not_errors() {
        let dir = TempDir::new().unwrap();
        let (store, _) = seeded(&dir).await;
        let retriever = Retriever::new(store, Arc::new(crate::embedding::NullProvider));

        let ctx = retriever
            .retrieve_context("question", &RetrievalConfig::default())
            .await;
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_token_budget_stops_without_truncation() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;

        let long = "shipping dock schedule and truck routing manifest details ".repeat(20);
        add_text(&store, &embedder, "a.txt", &long).await;
        add_text(&store, &embedder, "b.txt", &long).await;

        let one_chunk = crate::chunk::estimate_tokens(&long);
        let retriever = Retriever::new(store, embedder);
        let ctx = retriever
            .retrieve_context(
                "truck dock schedule",
                &RetrievalConfig {
                    top_k: 5,
                    min_score: 0.0,
                    max_context_tokens: one_chunk + 2,
                    ..Default::default()
                },
            )
            .await;

        // Only one chunk fits; the second is dropped whole, never clipped.
        assert_eq!(ctx.chunks.len(), 1);
        assert_eq!(ctx.chunks[0].text, long);
        assert!(ctx.total_tokens() as usize <= one_chunk + 2);
    }

    #[tokio::test]
    async fn test_metadata_included_only_on_request() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        add_text(&store, &embedder, "m.txt", "warehouse inventory ledger").await;

        let retriever = Retriever::new(store, embedder);
        let without = retriever
            .retrieve_context(
                "warehouse inventory",
                &RetrievalConfig {
                    min_score: 0.0,
                    ..Default::default()
                },
            )
            .await;
        assert!(without.chunks[0].metadata.is_none());

        let with = retriever
            .retrieve_context(
                "warehouse inventory",
                &RetrievalConfig {
                    min_score: 0.0,
                    include_metadata: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(with.chunks[0].metadata.as_ref().unwrap()["lang"], "en");
    }

    #[tokio::test]
    async fn test_stream_matches_batch_order() {
        let dir = TempDir::new().unwrap();
        let (store, embedder) = seeded(&dir).await;
        add_text(&store, &embedder, "1.txt", "forklift safety checklist for dock workers").await;
        add_text(&store, &embedder, "2.txt", "dock worker forklift operating rules").await;

        let retriever = Arc::new(Retriever::new(store, embedder));
        let config = RetrievalConfig {
            min_score: 0.0,
            ..Default::default()
        };

        let batch = retriever.retrieve_context("forklift dock rules", &config).await;
        let mut rx = retriever
            .retrieve_context_stream("forklift dock rules", &config)
            .await;

        let mut streamed = Vec::new();
        while let Some(chunk) = rx.recv().await {
            streamed.push(chunk);
        }

        assert_eq!(streamed.len(), batch.chunks.len());
        for (s, b) in streamed.iter().zip(batch.chunks.iter()) {
            assert_eq!(s.document_id, b.document_id);
            assert_eq!(s.ordinal, b.ordinal);
        }
    }

    fn hit(document_id: &str, ordinal: i64, text: &str, score: f32) -> SearchHit {
        SearchHit {
            chunk_id: format!("{}#{}", document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text: text.to_string(),
            source: "s.txt".to_string(),
            token_estimate: crate::chunk::estimate_tokens(text) as i64,
            metadata: serde_json::Value::Null,
            score,
        }
    }

    #[test]
    fn test_select_drops_later_duplicate_position_first_wins() {
        let hits = vec![
            hit("d1", 0, "winning copy of the chunk", 0.9),
            hit("d1", 0, "losing copy of the chunk", 0.8),
            hit("d2", 0, "a different document", 0.7),
        ];
        let chunks = select_chunks(hits, &RetrievalConfig::default());

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "winning copy of the chunk");
        assert_eq!(chunks[1].document_id, "d2");
    }

    #[test]
    fn test_select_keeps_duplicates_when_dedupe_disabled() {
        let hits = vec![
            hit("d1", 0, "first", 0.9),
            hit("d1", 0, "second", 0.8),
        ];
        let config = RetrievalConfig {
            dedupe: false,
            ..Default::default()
        };
        assert_eq!(select_chunks(hits, &config).len(), 2);
    }

    #[test]
    fn test_select_caps_at_top_k() {
        let hits = (0..10)
            .map(|i| hit("d", i, "chunk text", 0.9))
            .collect::<Vec<_>>();
        let config = RetrievalConfig {
            top_k: 3,
            ..Default::default()
        };
        assert_eq!(select_chunks(hits, &config).len(), 3);
    }

    #[test]
    fn test_select_budget_stops_whole_chunks() {
        let long = "x".repeat(400); // 100 tokens
        let hits = vec![
            hit("d1", 0, &long, 0.9),
            hit("d2", 0, &long, 0.8),
            hit("d3", 0, &long, 0.7),
        ];
        let config = RetrievalConfig {
            top_k: 5,
            max_context_tokens: 150,
            ..Default::default()
        };
        let chunks = select_chunks(hits, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document_id, "d1");
        assert_eq!(chunks[0].text.len(), 400);
    }

    #[test]
    fn test_prompt_formatting() {
        let ctx = RetrievedContext {
            query: "which dock?".into(),
            chunks: vec![ContextChunk {
                text: "Use Dock 7.".into(),
                source: "rules.txt".into(),
                document_id: "d1".into(),
                ordinal: 0,
                score: 0.82,
                token_estimate: 3,
                metadata: None,
            }],
            total_candidates: 1,
            elapsed_ms: 1,
        };

        let prompt = format_context_for_prompt(&ctx);
        assert!(prompt.contains("[1] (source: rules.txt, relevance: 82%)"));
        assert!(prompt.contains("Use Dock 7."));
        assert!(prompt.ends_with("Question: which dock?"));
    }

    #[test]
    fn test_empty_context_formats_empty() {
        assert_eq!(
            format_context_for_prompt(&RetrievedContext::empty("q")),
            ""
        );
    }
}
