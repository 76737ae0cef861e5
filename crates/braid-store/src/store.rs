//! High-level transactional `LocalStore` API.
//!
//! Composes the repository layer into atomic, session-centric methods.
//! Every write method runs inside a single `SQLite` transaction — callers
//! never observe partial state. This is the only write path into the
//! database, which is what lets the sync engine assume serialized writes.
//!
//! Two families of methods live here:
//!
//! - **Local mutations** (create/edit/delete from the UI): mark the touched
//!   session dirty and flag messages `needs_sync` so the next push picks
//!   them up; deletes also queue a tombstone.
//! - **Sync materialization** (called by the engine): insert pulled
//!   messages as already-synced, apply in-place remote edits, create
//!   branch sessions, apply tombstones, and maintain cached heads.

use braid_core::{
    AttachmentRef, EntityKind, Message, MessageId, Sender, Session, SessionId, heads,
};
use rusqlite::Connection;
use tracing::debug;

use crate::connection::{ConnectionConfig, ConnectionPool, PooledConnection, new_in_memory};
use crate::errors::{Result, StoreError};
use crate::migrations::run_migrations;
use crate::repositories::{DeletionRepo, MessageRepo, MetaRepo, PendingDeletion, SessionRepo};

/// Current logical time in milliseconds.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// High-level `LocalStore` wrapping a connection pool and all repositories.
pub struct LocalStore {
    pool: ConnectionPool,
}

impl LocalStore {
    /// Create a store over the given pool, running pending migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let store = Self { pool };
        let conn = store.conn()?;
        let _ = run_migrations(&conn)?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(new_in_memory(&ConnectionConfig::default())?)
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Create a fresh local session (its own conversation root).
    pub fn create_session(&self, title: &str) -> Result<Session> {
        let session = Session::new_root(title, now_ms());
        let conn = self.conn()?;
        SessionRepo::upsert(&conn, &session)?;
        Ok(session)
    }

    /// Get a session by id.
    pub fn session(&self, id: &SessionId) -> Result<Option<Session>> {
        let conn = self.conn()?;
        SessionRepo::get(&conn, id)
    }

    /// All sessions, most recently updated first.
    pub fn sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        SessionRepo::list(&conn)
    }

    /// Sessions with local changes awaiting push.
    pub fn dirty_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn()?;
        SessionRepo::dirty(&conn)
    }

    /// Materialize or update a session pulled from the remote.
    ///
    /// A locally-dirty session keeps its dirty flag so in-flight edits are
    /// still pushed on the next pass.
    pub fn upsert_remote_session(&self, incoming: &Session) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let mut session = incoming.clone();
        if let Some(existing) = SessionRepo::get(&tx, &incoming.id)? {
            session.sync_state.dirty = session.sync_state.dirty || existing.sync_state.dirty;
            session.head = existing.head;
        }
        SessionRepo::upsert(&tx, &session)?;
        tx.commit()?;
        Ok(())
    }

    /// Ensure a session row exists for pulled messages whose session record
    /// hasn't arrived yet (cross-page hydration). The placeholder is its
    /// own root and not dirty; a later session record fills in the rest.
    pub fn ensure_session(&self, id: &SessionId) -> Result<Session> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let session = match SessionRepo::get(&tx, id)? {
            Some(existing) => existing,
            None => {
                let now = now_ms();
                let placeholder = Session {
                    id: id.clone(),
                    root_id: id.clone(),
                    branch_from_message_id: None,
                    title: String::new(),
                    created_at: now,
                    updated_at: now,
                    head: None,
                    sync_state: braid_core::SyncState::default(),
                };
                SessionRepo::upsert(&tx, &placeholder)?;
                placeholder
            }
        };
        tx.commit()?;
        Ok(session)
    }

    /// Delete a session locally (messages cascade) and queue a tombstone
    /// for remote flush.
    pub fn delete_session_local(&self, id: &SessionId) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        if !SessionRepo::delete(&tx, id)? {
            return Err(StoreError::SessionNotFound(id.to_string()));
        }
        DeletionRepo::queue(&tx, EntityKind::Session, id.as_str(), now_ms())?;
        tx.commit()?;
        Ok(())
    }

    /// Apply an incoming session tombstone: delete outright, no re-queue.
    pub fn apply_session_tombstone(&self, id: &SessionId) -> Result<bool> {
        let conn = self.conn()?;
        SessionRepo::delete(&conn, id)
    }

    /// Record the remote revision after a push and clear the dirty flag,
    /// unless messages still need sync.
    ///
    /// The pending re-check runs inside the transaction: a local message
    /// created while the push's network calls were in flight keeps the
    /// session dirty so the next pass picks it up.
    pub fn mark_session_pushed(&self, id: &SessionId, remote_rev: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(mut session) = SessionRepo::get(&tx, id)? else {
            return Err(StoreError::SessionNotFound(id.to_string()));
        };
        session.sync_state.dirty = !MessageRepo::needing_sync(&tx, id)?.is_empty();
        if let Some(rev) = remote_rev {
            session.sync_state.remote_rev = Some(rev.to_owned());
        }
        SessionRepo::upsert(&tx, &session)?;
        tx.commit()?;
        Ok(())
    }

    /// Recompute and persist the cached head for a session.
    pub fn recompute_head(&self, id: &SessionId) -> Result<Option<MessageId>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let head = Self::recompute_head_tx(&tx, id)?;
        tx.commit()?;
        Ok(head)
    }

    fn recompute_head_tx(conn: &Connection, id: &SessionId) -> Result<Option<MessageId>> {
        let messages = MessageRepo::by_session(conn, id)?;
        let head = heads(&messages).last().map(|m| m.id.clone());
        SessionRepo::set_head(conn, id, head.as_ref(), now_ms())?;
        Ok(head)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────

    /// Create a local message, flag it for push, and dirty its session.
    ///
    /// The parent defaults to the session's current head.
    pub fn create_message(
        &self,
        session_id: &SessionId,
        parent_id: Option<MessageId>,
        sender: Sender,
        text: &str,
        attachments: Vec<AttachmentRef>,
    ) -> Result<Message> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(session) = SessionRepo::get(&tx, session_id)? else {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        };
        let message = Message {
            id: MessageId::new(),
            session_id: session_id.clone(),
            parent_id: parent_id.or(session.head),
            sender,
            text: text.to_owned(),
            attachments,
            created_at: now_ms(),
        };
        MessageRepo::upsert(&tx, &message, true)?;
        SessionRepo::set_dirty(&tx, session_id, true)?;
        let _ = Self::recompute_head_tx(&tx, session_id)?;
        tx.commit()?;
        Ok(message)
    }

    /// Get a message by id.
    pub fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        let conn = self.conn()?;
        MessageRepo::get(&conn, id)
    }

    /// All messages of a session, in total order.
    pub fn messages_by_session(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        MessageRepo::by_session(&conn, session_id)
    }

    /// Messages of a session awaiting push, in total order.
    pub fn messages_needing_sync(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        MessageRepo::needing_sync(&conn, session_id)
    }

    /// Edit a message's text locally and dirty its session.
    pub fn edit_message_text(&self, id: &MessageId, text: &str) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(message) = MessageRepo::get(&tx, id)? else {
            return Err(StoreError::MessageNotFound(id.to_string()));
        };
        MessageRepo::set_text(&tx, id, text)?;
        SessionRepo::set_dirty(&tx, &message.session_id, true)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a message locally, queue its tombstone, and recompute the
    /// session head.
    pub fn delete_message_local(&self, id: &MessageId) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(message) = MessageRepo::get(&tx, id)? else {
            return Err(StoreError::MessageNotFound(id.to_string()));
        };
        let _ = MessageRepo::delete(&tx, id)?;
        DeletionRepo::queue(&tx, EntityKind::Message, id.as_str(), now_ms())?;
        let _ = Self::recompute_head_tx(&tx, &message.session_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Apply a remote in-place text edit without flagging for push.
    /// Unknown ids are a no-op.
    pub fn apply_remote_edit(&self, id: &MessageId, text: &str) -> Result<bool> {
        let conn = self.conn()?;
        MessageRepo::apply_remote_text(&conn, id, text)
    }

    /// Apply an incoming message tombstone: delete outright, recompute the
    /// owning session's head. Unknown ids are a no-op.
    pub fn apply_message_tombstone(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(message) = MessageRepo::get(&tx, id)? else {
            return Ok(false);
        };
        let deleted = MessageRepo::delete(&tx, id)?;
        let _ = Self::recompute_head_tx(&tx, &message.session_id)?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Persist updated attachment upload states for a message.
    pub fn update_attachment_states(
        &self,
        id: &MessageId,
        attachments: &[AttachmentRef],
    ) -> Result<()> {
        let conn = self.conn()?;
        MessageRepo::set_attachments(&conn, id, attachments)
    }

    /// Clear the needs-sync flag on pushed messages.
    pub fn mark_messages_synced(&self, ids: &[MessageId]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for id in ids {
            MessageRepo::mark_synced(&tx, id)?;
        }
        tx.commit()?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Edit-plan materialization
    // ─────────────────────────────────────────────────────────────────────

    /// Append pulled messages to a session in place (fast-forward) and
    /// recompute its head. The messages arrive parent-first and are stored
    /// as already-synced.
    pub fn apply_fast_forward(&self, session_id: &SessionId, to_append: &[Message]) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for message in to_append {
            let mut message = message.clone();
            message.session_id = session_id.clone();
            MessageRepo::upsert(&tx, &message, false)?;
        }
        let _ = Self::recompute_head_tx(&tx, session_id)?;
        tx.commit()?;
        debug!(session = %session_id, appended = to_append.len(), "fast-forward applied");
        Ok(())
    }

    /// Materialize a divergence: create a branch session holding the
    /// diverging local messages, and append the remote continuation to the
    /// original session.
    ///
    /// The branch session shares the original's `root_id` (same
    /// conversation family), records the divergence point, and is born
    /// dirty — its reassigned messages still carry `needs_sync` and must
    /// be pushed under their new session.
    pub fn apply_branch(
        &self,
        session_id: &SessionId,
        from_ancestor_id: Option<&MessageId>,
        to_append: &[Message],
        to_branch: &[Message],
    ) -> Result<Session> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let Some(original) = SessionRepo::get(&tx, session_id)? else {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        };

        let now = now_ms();
        let branch = Session {
            id: SessionId::new(),
            root_id: original.root_id.clone(),
            branch_from_message_id: from_ancestor_id.cloned(),
            title: original.title.clone(),
            created_at: now,
            updated_at: now,
            head: None,
            sync_state: braid_core::SyncState {
                remote_rev: None,
                dirty: true,
            },
        };
        SessionRepo::upsert(&tx, &branch)?;

        // Physically move the diverging local-only messages into the branch.
        for message in to_branch {
            MessageRepo::reassign_session(&tx, &message.id, &branch.id)?;
        }
        // Append the remote continuation to the original session.
        for message in to_append {
            let mut message = message.clone();
            message.session_id = session_id.clone();
            MessageRepo::upsert(&tx, &message, false)?;
        }

        let _ = Self::recompute_head_tx(&tx, session_id)?;
        let _ = Self::recompute_head_tx(&tx, &branch.id)?;
        tx.commit()?;
        debug!(
            original = %session_id,
            branch = %branch.id,
            moved = to_branch.len(),
            appended = to_append.len(),
            "branch applied"
        );
        Ok(branch)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Deletion queue & cursor
    // ─────────────────────────────────────────────────────────────────────

    /// All queued remote deletions, oldest first.
    pub fn pending_deletions(&self) -> Result<Vec<PendingDeletion>> {
        let conn = self.conn()?;
        DeletionRepo::all(&conn)
    }

    /// Remove a deletion-queue entry after a successful remote delete.
    pub fn clear_deletion(&self, kind: EntityKind, entity_id: &str) -> Result<()> {
        let conn = self.conn()?;
        DeletionRepo::clear(&conn, kind, entity_id)
    }

    /// The persisted pull cursor, or 0 if the store has never pulled.
    pub fn pull_cursor(&self) -> Result<i64> {
        let conn = self.conn()?;
        MetaRepo::pull_cursor(&conn)
    }

    /// Persist the pull cursor.
    pub fn set_pull_cursor(&self, cursor: i64) -> Result<()> {
        let conn = self.conn()?;
        MetaRepo::set_pull_cursor(&conn, cursor)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
