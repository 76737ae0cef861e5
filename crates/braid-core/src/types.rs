//! Core data model: messages, sessions, attachments, and the total order.
//!
//! A conversation is a set of [`Session`]s sharing a `root_id` (the
//! "conversation family"). Each session owns a linear-ish slice of the
//! message DAG; branches created at divergence points carry
//! `branch_from_message_id` pointing at the shared ancestor.
//!
//! The total order used everywhere (head selection, sorting, path
//! construction) is `created_at` ascending, then id lexicographic
//! ascending. `created_at` is a logical timestamp; collisions are
//! expected and broken by the id.

use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentId, MessageId, SessionId};

/// Who authored a message, relative to the local user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    /// Composed by the local user (on any of their devices).
    #[serde(rename = "self")]
    Own,
    /// Received from the conversation counterpart.
    #[serde(rename = "other")]
    Other,
}

/// Upload lifecycle of an attachment binary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Not yet submitted for upload.
    #[default]
    None,
    /// Upload in flight.
    Uploading,
    /// Binary is durable on the remote store.
    Uploaded,
    /// Upload failed; retried on a later pass.
    Failed,
}

/// Reference to an attachment binary held by the external attachment store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Attachment ID.
    pub id: AttachmentId,
    /// Upload lifecycle state.
    #[serde(default)]
    pub upload_state: UploadState,
}

/// A single message node in the conversation DAG.
///
/// `id` and `parent_id` are immutable after creation; only `text` may be
/// edited in place. `parent_id` is `None` only for a branch's first
/// message. Parent pointers may cross a session boundary at a branch
/// point, and remote input is not trusted to be acyclic — every walk over
/// these pointers is cycle-guarded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Globally unique message ID.
    pub id: MessageId,
    /// Session this message currently belongs to.
    pub session_id: SessionId,
    /// Predecessor in the DAG, if any.
    pub parent_id: Option<MessageId>,
    /// Author, relative to the local user.
    pub sender: Sender,
    /// Message body.
    pub text: String,
    /// Ordered attachment references (possibly empty).
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
    /// Logical creation timestamp. Collisions are possible.
    pub created_at: i64,
}

impl Message {
    /// Whether every attachment binary is durable on the remote store.
    ///
    /// Messages with no attachments are trivially clear to send.
    #[must_use]
    pub fn attachments_uploaded(&self) -> bool {
        self.attachments
            .iter()
            .all(|a| a.upload_state == UploadState::Uploaded)
    }
}

/// Sync bookkeeping carried on each session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Opaque remote handle/revision, if the session has ever been pushed.
    pub remote_rev: Option<String>,
    /// Whether local changes are awaiting push.
    pub dirty: bool,
}

/// A session: one branch of a conversation family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID.
    pub id: SessionId,
    /// Conversation-family identifier; equals `id` for the original session.
    pub root_id: SessionId,
    /// Divergence point, if this session was branched off another.
    pub branch_from_message_id: Option<MessageId>,
    /// Display title.
    pub title: String,
    /// Logical creation timestamp.
    pub created_at: i64,
    /// Logical last-touched timestamp.
    pub updated_at: i64,
    /// Cached id of the most-recent message by total order.
    ///
    /// Recomputed by the sync engine after any structural change.
    pub head: Option<MessageId>,
    /// Sync bookkeeping.
    #[serde(default)]
    pub sync_state: SyncState,
}

impl Session {
    /// Create a fresh local session (its own conversation root).
    #[must_use]
    pub fn new_root(title: impl Into<String>, now: i64) -> Self {
        let id = SessionId::new();
        Self {
            root_id: id.clone(),
            id,
            branch_from_message_id: None,
            title: title.into(),
            created_at: now,
            updated_at: now,
            head: None,
            sync_state: SyncState {
                remote_rev: None,
                dirty: true,
            },
        }
    }
}

/// Kind tag for the pending-deletion queue and tombstones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A session tombstone (cascades to its messages).
    Session,
    /// A single-message tombstone.
    Message,
}

/// Total-order key for a message: `(created_at, id)` ascending.
#[must_use]
pub fn order_key(message: &Message) -> (i64, &str) {
    (message.created_at, message.id.as_str())
}

/// Stable-sort a message slice into total order.
pub fn sort_by_order(messages: &mut [Message]) {
    messages.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
