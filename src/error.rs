//! Error taxonomy for the vault.
//!
//! Configuration errors ([`VaultError::DimensionMismatch`],
//! [`VaultError::BadPassphrase`]) are fatal and surfaced immediately.
//! Transient database/crypto failures abort the current operation and leave
//! previously committed data untouched. Degraded capability (similarity index
//! unavailable in non-strict mode) is *not* an error — the store keeps
//! working with empty search results. "No results found" is always a
//! successful empty value, never an error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// A chunk's embedding width disagrees with the store-wide dimension.
    /// Never silently truncated or padded.
    #[error("embedding dimension mismatch: store expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The supplied passphrase does not open this vault.
    #[error("passphrase does not match this vault")]
    BadPassphrase,

    /// The similarity index could not be attached and the store was opened
    /// with `require_index = true`.
    #[error("similarity index unavailable: {0}")]
    IndexUnavailable(String),

    /// The embedding gateway has no model loaded.
    #[error("no embedding model loaded")]
    ModelNotLoaded,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl VaultError {
    /// True for configuration errors that must never be retried automatically.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::DimensionMismatch { .. }
                | VaultError::BadPassphrase
                | VaultError::IndexUnavailable(_)
        )
    }
}
