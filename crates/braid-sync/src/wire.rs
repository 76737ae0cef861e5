//! Wire model: sealed entity envelopes and the records they decrypt into.
//!
//! A [`SealedEntity`] is what travels through the gateway: an id, an
//! opaque base64 cipher/header pair, and a remote logical timestamp. Its
//! plaintext is a JSON-encoded [`RemoteRecord`] — a union of the entity
//! shapes multiplexed by a `"type"` tag, each carrying a schema version.
//! Decoding rejects unknown tags, malformed JSON, and versions newer than
//! this build understands; the engine logs and skips such entities.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use braid_core::{
    AttachmentId, AttachmentRef, Message, MessageId, Sender, Session, SessionId, SyncState,
    UploadState,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::Sealed;

/// Highest record schema version this build can decode.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors decoding a sealed entity's plaintext into a typed record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON for any known record shape.
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    /// Envelope carries invalid base64.
    #[error("invalid base64 in envelope: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Record schema is newer than this build understands.
    #[error("unsupported schema version {found} (max {SCHEMA_VERSION})")]
    UnsupportedVersion {
        /// Version found on the record.
        found: u32,
    },
}

/// Encrypted entity envelope as carried by the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedEntity {
    /// Entity id (session or message id, matching the record inside).
    pub id: String,
    /// Base64 ciphertext.
    pub cipher: String,
    /// Base64 opaque crypto header.
    pub header: String,
    /// Remote logical timestamp of the change.
    pub updated_at: i64,
}

impl SealedEntity {
    /// Wrap a sealed payload into an envelope.
    #[must_use]
    pub fn new(id: impl Into<String>, sealed: &Sealed, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            cipher: BASE64.encode(&sealed.cipher),
            header: BASE64.encode(&sealed.header),
            updated_at,
        }
    }

    /// Recover the sealed payload from the envelope.
    pub fn sealed(&self) -> Result<Sealed, DecodeError> {
        Ok(Sealed {
            cipher: BASE64.decode(&self.cipher)?,
            header: BASE64.decode(&self.header)?,
        })
    }
}

fn schema_version_default() -> u32 {
    SCHEMA_VERSION
}

/// Session record as it appears on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    /// Record schema version.
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    /// Session id.
    pub id: SessionId,
    /// Conversation-family id.
    pub root_id: SessionId,
    /// Divergence point, for branch sessions.
    pub branch_from_message_id: Option<MessageId>,
    /// Display title.
    pub title: String,
    /// Logical creation timestamp.
    pub created_at: i64,
    /// Logical last-touched timestamp.
    pub updated_at: i64,
}

impl RemoteSession {
    /// Materialize as a local session (clean, head recomputed later).
    #[must_use]
    pub fn into_session(self) -> Session {
        Session {
            id: self.id,
            root_id: self.root_id,
            branch_from_message_id: self.branch_from_message_id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            head: None,
            sync_state: SyncState::default(),
        }
    }

    /// Build the wire record for a local session.
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: session.id.clone(),
            root_id: session.root_id.clone(),
            branch_from_message_id: session.branch_from_message_id.clone(),
            title: session.title.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

/// Message record as it appears on the wire.
///
/// Only attachment ids travel; binaries live in the attachment store, and
/// push gating guarantees they are durable before the referencing message
/// is sent. Pulled attachments therefore materialize as `Uploaded`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    /// Record schema version.
    #[serde(default = "schema_version_default")]
    pub schema_version: u32,
    /// Message id.
    pub id: MessageId,
    /// Owning session id.
    pub session_id: SessionId,
    /// Predecessor in the DAG.
    pub parent_id: Option<MessageId>,
    /// Author relative to the record's creator.
    pub sender: Sender,
    /// Message body.
    pub text: String,
    /// Ordered attachment ids.
    #[serde(default)]
    pub attachment_ids: Vec<AttachmentId>,
    /// Logical creation timestamp.
    pub created_at: i64,
}

impl RemoteMessage {
    /// Materialize as a local message.
    #[must_use]
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            session_id: self.session_id,
            parent_id: self.parent_id,
            sender: self.sender,
            text: self.text,
            attachments: self
                .attachment_ids
                .into_iter()
                .map(|id| AttachmentRef {
                    id,
                    upload_state: UploadState::Uploaded,
                })
                .collect(),
            created_at: self.created_at,
        }
    }

    /// Build the wire record for a local message.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: message.id.clone(),
            session_id: message.session_id.clone(),
            parent_id: message.parent_id.clone(),
            sender: message.sender,
            text: message.text.clone(),
            attachment_ids: message.attachments.iter().map(|a| a.id.clone()).collect(),
            created_at: message.created_at,
        }
    }
}

/// The tagged union of entity shapes a sealed payload decodes into.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteRecord {
    /// A session record.
    Session(RemoteSession),
    /// A message record.
    Message(RemoteMessage),
}

impl RemoteRecord {
    /// Schema version carried by the record.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        match self {
            Self::Session(s) => s.schema_version,
            Self::Message(m) => m.schema_version,
        }
    }
}

/// Encode a record to plaintext bytes (pre-encryption).
pub fn encode_record(record: &RemoteRecord) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(record)?)
}

/// Decode plaintext bytes (post-decryption) into a typed record.
///
/// Rejects unknown `"type"` tags, malformed JSON, and schema versions
/// newer than [`SCHEMA_VERSION`].
pub fn decode_record(bytes: &[u8]) -> Result<RemoteRecord, DecodeError> {
    let record: RemoteRecord = serde_json::from_slice(bytes)?;
    let found = record.schema_version();
    if found > SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion { found });
    }
    Ok(record)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
