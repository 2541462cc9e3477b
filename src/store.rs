//! Encrypted SQLite persistence for documents, chunks, and sessions.
//!
//! One SQLite file holds everything; document bodies, chunk text, chunk
//! vectors, source labels, metadata, and session names are AEAD-sealed with
//! a passphrase-derived key before they hit disk (see [`crate::crypto`]).
//! Opening an existing vault with the wrong passphrase fails fast with
//! [`VaultError::BadPassphrase`] — never a silently empty or garbled store.
//!
//! Every piece of text is passed through the configured [`Redactor`] before
//! sealing. Redaction is idempotent, so content redacted upstream is not
//! double-masked.
//!
//! Writes to one document happen inside a single transaction (SQLite's
//! single-writer discipline serializes same-row writers); reads and writes
//! to unrelated documents proceed concurrently through the pool. The
//! similarity index lives in memory and is rebuilt from chunk rows at every
//! open, so a crash between a document commit and an index insert can never
//! leave a document permanently unsearchable.

use std::path::Path;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use crate::crypto::{derive_key, generate_salt, VaultCipher};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Result, VaultError};
use crate::index::VectorIndex;
use crate::models::{Chunk, Document, EmbeddedChunk, NewDocument, SearchHit, Session};
use crate::redact::{PatternRedactor, Redactor};

/// Store-wide settings fixed at open time.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Embedding dimension every chunk vector must match. `0` means no
    /// vector capability is configured; the index cannot attach.
    pub dims: usize,
    /// When true, a store that cannot attach its similarity index fails to
    /// open. When false it opens degraded: ingestion works, but
    /// `search_similar` always returns an empty result set.
    pub require_index: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dims: 256,
            require_index: true,
        }
    }
}

pub struct DocumentStore {
    pool: SqlitePool,
    cipher: VaultCipher,
    dims: usize,
    index: Option<VectorIndex>,
    redactor: Arc<dyn Redactor>,
}

impl DocumentStore {
    /// Open (or create) a vault with the default [`PatternRedactor`].
    ///
    /// The passphrase gate runs before anything else: key derivation and
    /// verifier check precede every other storage operation.
    pub async fn open(path: &Path, passphrase: &str, config: &StoreConfig) -> Result<Self> {
        Self::open_with_redactor(path, passphrase, config, Arc::new(PatternRedactor)).await
    }

    pub async fn open_with_redactor(
        path: &Path,
        passphrase: &str,
        config: &StoreConfig,
        redactor: Arc<dyn Redactor>,
    ) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(VaultError::Invalid("passphrase must not be empty".into()));
        }

        let pool = connect(path).await?;
        migrate(&pool).await?;

        let (cipher, dims) = unlock(&pool, passphrase, config.dims).await?;

        let index = match VectorIndex::attach(dims) {
            Ok(index) => Some(index),
            Err(e) if config.require_index => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "similarity index unavailable, continuing degraded \
                     (search returns empty): {}",
                    e
                );
                None
            }
        };

        let store = Self {
            pool,
            cipher,
            dims,
            index,
            redactor,
        };
        store.rebuild_index().await?;
        Ok(store)
    }

    /// True when the similarity index could not be attached and searches
    /// return empty results.
    pub fn is_degraded(&self) -> bool {
        self.index.is_none()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Reload the in-memory index from chunk rows. Runs at every open; this
    /// is the crash-recovery policy for documents whose index insert was
    /// lost.
    async fn rebuild_index(&self) -> Result<()> {
        let Some(index) = &self.index else {
            return Ok(());
        };
        index.clear().await;

        let rows = sqlx::query("SELECT id, embedding FROM chunks ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut skipped = 0usize;
        for row in &rows {
            let chunk_id: String = row.get("id");
            let sealed: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&self.cipher.open(&sealed)?);
            if vector.len() != index.dims() {
                skipped += 1;
                continue;
            }
            index.insert(&chunk_id, vector).await?;
        }

        if skipped > 0 {
            tracing::warn!(
                "{} chunk vectors skipped during index rebuild (width mismatch)",
                skipped
            );
        }
        tracing::debug!("similarity index rebuilt: {} entries", index.len().await);
        Ok(())
    }

    // ============ Documents ============

    /// Persist a document and its chunks as a single logical unit.
    ///
    /// All chunk vectors are validated against the store dimension before
    /// any write; the first mismatch fails the whole call with no partial
    /// insert. Text is redacted (idempotently) before sealing.
    pub async fn add_document(
        &self,
        new: NewDocument,
        chunks: Vec<EmbeddedChunk>,
    ) -> Result<Document> {
        if self.dims > 0 {
            for chunk in &chunks {
                if chunk.embedding.len() != self.dims {
                    return Err(VaultError::DimensionMismatch {
                        expected: self.dims,
                        got: chunk.embedding.len(),
                    });
                }
            }
        }

        let (content, content_changed) = self.redactor.redact_with_report(&new.content);
        if content_changed {
            tracing::info!(source = %new.source, "redacted PII from document content");
        }

        let now = chrono::Utc::now().timestamp();
        let doc_id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&new.metadata)
            .map_err(|e| VaultError::Invalid(format!("unserializable metadata: {}", e)))?;

        let sealed_content = self.cipher.seal_str(&content)?;
        let sealed_source = self.cipher.seal_str(&new.source)?;
        let sealed_metadata = self.cipher.seal_str(&metadata_json)?;

        // Seal chunks up front so the transaction below only writes.
        let mut sealed_chunks = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let (text, changed) = self.redactor.redact_with_report(&chunk.text);
            if changed {
                tracing::info!(
                    source = %new.source,
                    ordinal = chunk.ordinal,
                    "redacted PII from chunk text"
                );
            }
            sealed_chunks.push((
                Uuid::new_v4().to_string(),
                self.cipher.seal_str(&text)?,
                self.cipher.seal(&vec_to_blob(&chunk.embedding))?,
                chunk.ordinal,
                chunk.token_estimate,
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, content, source, metadata, chunk_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc_id)
        .bind(&sealed_content)
        .bind(&sealed_source)
        .bind(&sealed_metadata)
        .bind(chunks.len() as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (chunk_id, sealed_text, sealed_vec, ordinal, token_estimate) in &sealed_chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, ordinal, token_estimate, text, embedding, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(&doc_id)
            .bind(ordinal)
            .bind(token_estimate)
            .bind(sealed_text)
            .bind(sealed_vec)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        // Index after commit; a crash here is repaired by rebuild at open.
        if let Some(index) = &self.index {
            for ((chunk_id, ..), chunk) in sealed_chunks.iter().zip(chunks.iter()) {
                index.insert(chunk_id, chunk.embedding.clone()).await?;
            }
        }

        Ok(Document {
            id: doc_id,
            content,
            source: new.source,
            metadata: new.metadata,
            chunk_count: chunks.len() as i64,
            created_at: now,
            updated_at: now,
        })
    }

    /// Delete a document, cascading to its chunks, index entries, and
    /// session memberships. Returns false when the id is unknown.
    pub async fn remove_document(&self, id: &str) -> Result<bool> {
        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if let Some(index) = &self.index {
            index.remove(&chunk_ids).await;
        }

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, content, source, metadata, chunk_count, created_at, updated_at
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.document_from_row(&r)).transpose()
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, content, source, metadata, chunk_count, created_at, updated_at
             FROM documents ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| self.document_from_row(r)).collect()
    }

    /// A document's chunks in ordinal order, decrypted.
    pub async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, document_id, ordinal, token_estimate, text, embedding, created_at
             FROM chunks WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in &rows {
            let sealed_text: Vec<u8> = row.get("text");
            let sealed_vec: Vec<u8> = row.get("embedding");
            chunks.push(Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                ordinal: row.get("ordinal"),
                token_estimate: row.get("token_estimate"),
                text: self.cipher.open_str(&sealed_text)?,
                embedding: blob_to_vec(&self.cipher.open(&sealed_vec)?),
                created_at: row.get("created_at"),
            });
        }
        Ok(chunks)
    }

    pub async fn document_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    // ============ Similarity search ============

    /// Rank chunks by similarity to `query_vec`. Scores are cosine mapped to
    /// `[0, 1]`, descending, ties stable by insertion order. An empty store
    /// yields an empty list; a degraded store always yields an empty list.
    pub async fn search_similar(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<SearchHit>> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };

        let ranked = index.search(query_vec, limit, min_score).await;
        let mut hits = Vec::with_capacity(ranked.len());

        for (chunk_id, score) in ranked {
            let row = sqlx::query(
                "SELECT c.id AS chunk_id, c.document_id, c.ordinal, c.token_estimate, c.text,
                        d.source, d.metadata
                 FROM chunks c JOIN documents d ON d.id = c.document_id
                 WHERE c.id = ?",
            )
            .bind(&chunk_id)
            .fetch_optional(&self.pool)
            .await?;

            // An index entry without a row means a concurrent delete; skip.
            let Some(row) = row else { continue };

            let sealed_text: Vec<u8> = row.get("text");
            let sealed_source: Vec<u8> = row.get("source");
            let sealed_metadata: Vec<u8> = row.get("metadata");
            let metadata_json = self.cipher.open_str(&sealed_metadata)?;

            hits.push(SearchHit {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                ordinal: row.get("ordinal"),
                text: self.cipher.open_str(&sealed_text)?,
                source: self.cipher.open_str(&sealed_source)?,
                token_estimate: row.get("token_estimate"),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::Value::Null),
                score,
            });
        }

        Ok(hits)
    }

    // ============ Sessions ============

    pub async fn create_session(&self, name: &str, description: Option<&str>) -> Result<Session> {
        let now = chrono::Utc::now().timestamp();
        let id = Uuid::new_v4().to_string();

        let sealed_name = self.cipher.seal_str(name)?;
        let sealed_desc = description.map(|d| self.cipher.seal_str(d)).transpose()?;

        sqlx::query(
            "INSERT INTO sessions (id, name, description, created_at, last_accessed_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&sealed_name)
        .bind(&sealed_desc)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Session {
            id,
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
            created_at: now,
            last_accessed_at: now,
        })
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, name, description, created_at, last_accessed_at
             FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| self.session_from_row(&r)).transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, name, description, created_at, last_accessed_at
             FROM sessions ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| self.session_from_row(r)).collect()
    }

    /// Delete a session and its membership rows. Member documents are never
    /// deleted. Returns false when the id is unknown.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_document_to_session(&self, session_id: &str, document_id: &str) -> Result<()> {
        if self.get_session(session_id).await?.is_none() {
            return Err(VaultError::Invalid(format!(
                "unknown session: {}",
                session_id
            )));
        }
        if self.get_document(document_id).await?.is_none() {
            return Err(VaultError::Invalid(format!(
                "unknown document: {}",
                document_id
            )));
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO session_documents (session_id, document_id, added_at)
             VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(document_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.touch_session(session_id, now).await
    }

    pub async fn remove_document_from_session(
        &self,
        session_id: &str,
        document_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM session_documents WHERE session_id = ? AND document_id = ?",
        )
        .bind(session_id)
        .bind(document_id)
        .execute(&self.pool)
        .await?;

        self.touch_session(session_id, chrono::Utc::now().timestamp())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Documents belonging to a session, in membership insertion order.
    pub async fn session_documents(&self, session_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT d.id, d.content, d.source, d.metadata, d.chunk_count, d.created_at, d.updated_at
             FROM session_documents sd JOIN documents d ON d.id = sd.document_id
             WHERE sd.session_id = ?
             ORDER BY sd.added_at, d.id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        self.touch_session(session_id, chrono::Utc::now().timestamp())
            .await?;
        rows.iter().map(|r| self.document_from_row(r)).collect()
    }

    async fn touch_session(&self, session_id: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_accessed_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ============ Row decoding ============

    fn document_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let sealed_content: Vec<u8> = row.get("content");
        let sealed_source: Vec<u8> = row.get("source");
        let sealed_metadata: Vec<u8> = row.get("metadata");
        let metadata_json = self.cipher.open_str(&sealed_metadata)?;

        Ok(Document {
            id: row.get("id"),
            content: self.cipher.open_str(&sealed_content)?,
            source: self.cipher.open_str(&sealed_source)?,
            metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
            chunk_count: row.get("chunk_count"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn session_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
        let sealed_name: Vec<u8> = row.get("name");
        let sealed_desc: Option<Vec<u8>> = row.get("description");

        Ok(Session {
            id: row.get("id"),
            name: self.cipher.open_str(&sealed_name)?,
            description: sealed_desc
                .map(|d| self.cipher.open_str(&d))
                .transpose()?,
            created_at: row.get("created_at"),
            last_accessed_at: row.get("last_accessed_at"),
        })
    }
}

// ============ Connection, schema, unlock ============

async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VaultError::Invalid(format!("cannot create vault dir: {}", e)))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vault_meta (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            content BLOB NOT NULL,
            source BLOB NOT NULL,
            metadata BLOB NOT NULL,
            chunk_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            token_estimate INTEGER NOT NULL,
            text BLOB NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            name BLOB NOT NULL,
            description BLOB,
            created_at INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_documents (
            session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (session_id, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Derive the key and check it against the stored verifier, creating the
/// salt + verifier for a fresh vault. Also reconciles the configured
/// embedding dimension with the one recorded at creation.
async fn unlock(
    pool: &SqlitePool,
    passphrase: &str,
    configured_dims: usize,
) -> Result<(VaultCipher, usize)> {
    let salt_row: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT value FROM vault_meta WHERE key = 'salt'")
            .fetch_optional(pool)
            .await?;

    match salt_row {
        Some(salt) => {
            let cipher = VaultCipher::new(&derive_key(passphrase, &salt)?);

            let verifier: Vec<u8> =
                sqlx::query_scalar("SELECT value FROM vault_meta WHERE key = 'verifier'")
                    .fetch_one(pool)
                    .await?;
            cipher.check_verifier(&verifier)?;

            let dims_raw: Vec<u8> =
                sqlx::query_scalar("SELECT value FROM vault_meta WHERE key = 'dims'")
                    .fetch_one(pool)
                    .await?;
            let stored_dims: usize = String::from_utf8_lossy(&dims_raw)
                .parse()
                .map_err(|_| VaultError::Crypto("corrupt dims metadata".into()))?;

            let dims = if stored_dims == 0 && configured_dims > 0 {
                // A vault created without vector capability gains it now.
                set_meta(pool, "dims", configured_dims.to_string().as_bytes()).await?;
                configured_dims
            } else if configured_dims > 0 && configured_dims != stored_dims {
                return Err(VaultError::DimensionMismatch {
                    expected: stored_dims,
                    got: configured_dims,
                });
            } else {
                stored_dims
            };

            Ok((cipher, dims))
        }
        None => {
            let salt = generate_salt();
            let cipher = VaultCipher::new(&derive_key(passphrase, &salt)?);
            let verifier = cipher.make_verifier()?;

            let mut tx = pool.begin().await?;
            for (key, value) in [
                ("salt", salt.to_vec()),
                ("verifier", verifier),
                ("dims", configured_dims.to_string().into_bytes()),
            ] {
                sqlx::query("INSERT INTO vault_meta (key, value) VALUES (?, ?)")
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            Ok((cipher, configured_dims))
        }
    }
}

async fn set_meta(pool: &SqlitePool, key: &str, value: &[u8]) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO vault_meta (key, value) VALUES (?, ?)")
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}
