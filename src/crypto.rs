//! Passphrase-derived record sealing for the vault.
//!
//! The store never writes plaintext content: document bodies, chunk text,
//! and embedding vectors are sealed with AES-256-GCM before they reach
//! SQLite. The key is derived from the caller's passphrase with Argon2id and
//! a per-store random salt, and is held only in memory — key material is
//! never stored alongside the data.
//!
//! A sealed verifier written at vault creation lets a reopen fail fast and
//! loudly on a wrong passphrase instead of producing garbage reads.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{Result, VaultError};

/// Salt length for Argon2id key derivation.
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length; prepended to every sealed record.
const NONCE_LEN: usize = 12;

/// Known plaintext sealed at creation time and checked on every open.
const KEY_CHECK: &[u8] = b"docvault key check v1";

/// Generate a fresh random salt for a new vault.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a passphrase and salt with Argon2id defaults.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

/// Seals and opens individual records with a vault-wide key.
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encrypt a record. Output layout: `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| VaultError::Crypto("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a record sealed by [`seal`](Self::seal).
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN {
            return Err(VaultError::Crypto("sealed record too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Crypto("decryption failed".into()))
    }

    pub fn seal_str(&self, plaintext: &str) -> Result<Vec<u8>> {
        self.seal(plaintext.as_bytes())
    }

    pub fn open_str(&self, sealed: &[u8]) -> Result<String> {
        let bytes = self.open(sealed)?;
        String::from_utf8(bytes)
            .map_err(|_| VaultError::Crypto("decrypted record is not UTF-8".into()))
    }

    /// Produce the sealed key-check verifier for a new vault.
    pub fn make_verifier(&self) -> Result<Vec<u8>> {
        self.seal(KEY_CHECK)
    }

    /// Check a stored verifier. A wrong passphrase fails AEAD authentication
    /// (or, in a pathological collision, the constant-time compare) and maps
    /// to [`VaultError::BadPassphrase`].
    pub fn check_verifier(&self, sealed: &[u8]) -> Result<()> {
        let plain = self.open(sealed).map_err(|_| VaultError::BadPassphrase)?;
        if bool::from(plain.as_slice().ct_eq(KEY_CHECK)) {
            Ok(())
        } else {
            Err(VaultError::BadPassphrase)
        }
    }
}
