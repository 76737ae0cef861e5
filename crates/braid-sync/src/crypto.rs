//! Crypto provider seam.
//!
//! Payload encryption is opaque to the merge algorithm: the engine hands
//! plaintext bytes to the provider and ships the resulting [`Sealed`] pair,
//! never inspecting either. The provider owns its key material.
//!
//! [`CryptoError::Integrity`] is the one distinguished signal: it means
//! decryption produced bytes that fail authentication, and the whole sync
//! pass aborts rather than feeding suspect data to the resolver.

use async_trait::async_trait;
use thiserror::Error;

/// An encrypted payload: ciphertext plus the header needed to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext bytes.
    pub cipher: Vec<u8>,
    /// Opaque header (nonce, key id, algorithm tag — provider-defined).
    pub header: Vec<u8>,
}

/// Errors surfaced by the crypto provider.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication failed on decrypt. Fatal to the sync pass.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Any other provider failure; the affected entity is skipped.
    #[error("crypto failure: {0}")]
    Other(String),
}

/// Payload encryption capability.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Encrypt plaintext bytes.
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError>;

    /// Decrypt a sealed payload.
    async fn decrypt(&self, sealed: &Sealed) -> Result<Vec<u8>, CryptoError>;
}
