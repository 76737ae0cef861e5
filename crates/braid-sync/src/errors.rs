//! Error taxonomy for sync passes.
//!
//! Mirrors the failure-handling policy of the engine:
//!
//! - transient per-entity errors never surface here — they are logged and
//!   the entity skipped;
//! - [`SyncError::Unauthorized`] and [`SyncError::Integrity`] are fatal to
//!   the whole pass (the caller reacts with logout / alarm);
//! - everything else fails the pull or push phase it occurred in without
//!   aborting the other.

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::gateway::GatewayError;
use crate::wire::DecodeError;

/// Errors that abort a sync phase or the whole pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote rejected our credentials. Fatal to the pass; the caller
    /// triggers logout.
    #[error("unauthorized by remote")]
    Unauthorized,

    /// Cryptographic integrity failure. Fatal to the pass — a suspect
    /// crypto layer cannot be trusted to feed the merge algorithm.
    #[error("cryptographic integrity failure: {0}")]
    Integrity(String),

    /// Non-integrity crypto failure while sealing an outgoing entity.
    /// Fails the affected session's push only.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Failed to encode an outgoing record.
    #[error("codec error: {0}")]
    Codec(#[from] DecodeError),

    /// Remote gateway failure (transport-level, not per-entity).
    #[error("gateway error: {0}")]
    Gateway(GatewayError),

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] braid_store::StoreError),
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unauthorized => Self::Unauthorized,
            other => Self::Gateway(other),
        }
    }
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Integrity(message) => Self::Integrity(message),
            CryptoError::Other(message) => Self::Crypto(message),
        }
    }
}

/// Convenience type alias for sync results.
pub type Result<T> = std::result::Result<T, SyncError>;
