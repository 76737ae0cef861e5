//! Message repository — DAG nodes and their needs-sync flag.
//!
//! Attachment references are stored as a JSON column; the `sender` enum is
//! stored under its wire tag (`self` / `other`).

use braid_core::{AttachmentRef, Message, MessageId, Sender, SessionId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};

/// Message repository — stateless, every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert or replace a message row.
    pub fn upsert(conn: &Connection, message: &Message, needs_sync: bool) -> Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        let _ = conn.execute(
            "INSERT INTO messages (id, session_id, parent_id, sender, text, attachments,
             created_at, needs_sync)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
               session_id = excluded.session_id,
               text = excluded.text,
               attachments = excluded.attachments,
               needs_sync = excluded.needs_sync",
            params![
                message.id.as_str(),
                message.session_id.as_str(),
                message.parent_id.as_ref().map(MessageId::as_str),
                sender_tag(message.sender),
                message.text,
                attachments,
                message.created_at,
                needs_sync,
            ],
        )?;
        Ok(())
    }

    /// Get a message by id.
    pub fn get(conn: &Connection, id: &MessageId) -> Result<Option<Message>> {
        conn.query_row(
            "SELECT id, session_id, parent_id, sender, text, attachments, created_at
             FROM messages WHERE id = ?1",
            params![id.as_str()],
            Self::map_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// All messages belonging to a session, in total order.
    pub fn by_session(conn: &Connection, session_id: &SessionId) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, parent_id, sender, text, attachments, created_at
             FROM messages WHERE session_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], Self::map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Messages in a session awaiting push, in total order.
    pub fn needing_sync(conn: &Connection, session_id: &SessionId) -> Result<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, parent_id, sender, text, attachments, created_at
             FROM messages WHERE session_id = ?1 AND needs_sync = 1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id.as_str()], Self::map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Edit the message text in place (id/parent immutable) and mark it
    /// for push.
    pub fn set_text(conn: &Connection, id: &MessageId, text: &str) -> Result<()> {
        let n = conn.execute(
            "UPDATE messages SET text = ?2, needs_sync = 1 WHERE id = ?1",
            params![id.as_str(), text],
        )?;
        if n == 0 {
            return Err(StoreError::MessageNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Apply a remote in-place text edit. Unlike [`Self::set_text`] this
    /// does not flag the message for push — the remote copy is already the
    /// edited one.
    pub fn apply_remote_text(conn: &Connection, id: &MessageId, text: &str) -> Result<bool> {
        let n = conn.execute(
            "UPDATE messages SET text = ?2, needs_sync = 0 WHERE id = ?1",
            params![id.as_str(), text],
        )?;
        Ok(n > 0)
    }

    /// Persist updated attachment upload states.
    pub fn set_attachments(
        conn: &Connection,
        id: &MessageId,
        attachments: &[AttachmentRef],
    ) -> Result<()> {
        let json = serde_json::to_string(attachments)?;
        let _ = conn.execute(
            "UPDATE messages SET attachments = ?2 WHERE id = ?1",
            params![id.as_str(), json],
        )?;
        Ok(())
    }

    /// Clear the needs-sync flag after a successful push.
    pub fn mark_synced(conn: &Connection, id: &MessageId) -> Result<()> {
        let _ = conn.execute(
            "UPDATE messages SET needs_sync = 0 WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    /// Physically move a message into another session (branch creation).
    pub fn reassign_session(
        conn: &Connection,
        id: &MessageId,
        session_id: &SessionId,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE messages SET session_id = ?2 WHERE id = ?1",
            params![id.as_str(), session_id.as_str()],
        )?;
        Ok(())
    }

    /// Delete a message row. Returns whether a row was deleted.
    pub fn delete(conn: &Connection, id: &MessageId) -> Result<bool> {
        let n = conn.execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        Ok(n > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
        let sender_tag: String = row.get(3)?;
        let attachments_json: String = row.get(5)?;
        Ok(Message {
            id: MessageId::from_string(row.get(0)?),
            session_id: SessionId::from_string(row.get(1)?),
            parent_id: row.get::<_, Option<String>>(2)?.map(MessageId::from_string),
            sender: sender_from_tag(&sender_tag),
            text: row.get(4)?,
            attachments: serde_json::from_str(&attachments_json).unwrap_or_default(),
            created_at: row.get(6)?,
        })
    }
}

fn sender_tag(sender: Sender) -> &'static str {
    match sender {
        Sender::Own => "self",
        Sender::Other => "other",
    }
}

fn sender_from_tag(tag: &str) -> Sender {
    match tag {
        "self" => Sender::Own,
        _ => Sender::Other,
    }
}
