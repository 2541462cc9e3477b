//! # docvault
//!
//! A private, on-device document knowledge store for retrieval-augmented
//! generation. Documents are chunked, scrubbed of PII, embedded, and sealed
//! into an encrypted SQLite vault; questions are answered by ranking chunks
//! with cosine similarity and assembling a token-budgeted context bundle for
//! a local generation model.
//!
//! Everything runs on-device: no document content, chunk text, or query ever
//! leaves the process, and nothing reaches disk unredacted or unencrypted.
//!
//! ## Module map
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`chunk`] | Overlapping, boundary-respecting text chunker |
//! | [`redact`] | Ordered-pattern PII redaction |
//! | [`embedding`] | Embedding gateway trait + hash embedder |
//! | [`generation`] | Token-streaming generation gateway trait |
//! | [`crypto`] | Passphrase-derived AEAD record sealing |
//! | [`index`] | In-memory cosine similarity index |
//! | [`store`] | Encrypted SQLite document/session store |
//! | [`retrieve`] | Similarity retrieval and context assembly |
//! | [`pipeline`] | Ingestion and query orchestration |
//! | [`extract`] | PDF text extraction |
//! | [`config`] | TOML configuration loading and validation |

pub mod chunk;
pub mod config;
pub mod crypto;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod redact;
pub mod retrieve;
pub mod store;

pub use error::{Result, VaultError};
