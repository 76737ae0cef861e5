//! Remote entity gateway seam.
//!
//! The gateway is the transport adapter pulling paginated diffs and
//! upserting sealed entities. The engine never sees a wire format beyond
//! [`DiffPage`] and [`SealedEntity`]; payload encryption happens before
//! anything reaches the gateway.

use async_trait::async_trait;
use braid_core::{MessageId, SessionId};
use thiserror::Error;

use crate::wire::SealedEntity;

/// Errors surfaced by the remote gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credentials rejected. Aborts the whole pass.
    #[error("unauthorized")]
    Unauthorized,

    /// Entity not found. On deletes this counts as success.
    #[error("not found")]
    NotFound,

    /// Transient transport failure; retried on the next pass.
    #[error("transient gateway failure: {message}")]
    Transient {
        /// Error description.
        message: String,
    },
}

/// One page of the remote diff since a cursor.
///
/// A page holding fewer than `limit` items total is the last one.
#[derive(Debug, Default)]
pub struct DiffPage {
    /// Changed session entities, still sealed.
    pub sessions: Vec<SealedEntity>,
    /// Changed message entities, still sealed.
    pub messages: Vec<SealedEntity>,
    /// Sessions deleted remotely.
    pub session_tombstones: Vec<SessionId>,
    /// Messages deleted remotely.
    pub message_tombstones: Vec<MessageId>,
    /// Cursor for the next page (last-seen remote logical time).
    pub next_cursor: i64,
}

impl DiffPage {
    /// Total number of items on the page, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
            + self.messages.len()
            + self.session_tombstones.len()
            + self.message_tombstones.len()
    }

    /// Whether the page carries nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport adapter for the remote replica.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Fetch one bounded page of changes since `cursor`.
    async fn get_diff(&self, cursor: i64, limit: u32) -> Result<DiffPage, GatewayError>;

    /// Upsert a sealed session entity.
    ///
    /// Returns the remote revision handle for the stored entity when the
    /// transport exposes one; it is persisted as the session's
    /// `remote_rev` after the push completes.
    async fn upsert_session(&self, entity: &SealedEntity) -> Result<Option<String>, GatewayError>;

    /// Upsert a sealed message entity.
    async fn upsert_message(&self, entity: &SealedEntity) -> Result<(), GatewayError>;

    /// Delete a session remotely. `NotFound` counts as success.
    async fn delete_session(&self, id: &SessionId) -> Result<(), GatewayError>;

    /// Delete a message remotely. `NotFound` counts as success.
    async fn delete_message(&self, id: &MessageId) -> Result<(), GatewayError>;
}
