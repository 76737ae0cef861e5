//! Session repository — session rows and sync bookkeeping flags.

use braid_core::{MessageId, Session, SessionId, SyncState};
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Session repository — stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert or replace a session row.
    pub fn upsert(conn: &Connection, session: &Session) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO sessions (id, root_id, branch_from_message_id, title, created_at,
             updated_at, head_message_id, remote_rev, dirty)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
               root_id = excluded.root_id,
               branch_from_message_id = excluded.branch_from_message_id,
               title = excluded.title,
               updated_at = excluded.updated_at,
               head_message_id = excluded.head_message_id,
               remote_rev = excluded.remote_rev,
               dirty = excluded.dirty",
            params![
                session.id.as_str(),
                session.root_id.as_str(),
                session.branch_from_message_id.as_ref().map(MessageId::as_str),
                session.title,
                session.created_at,
                session.updated_at,
                session.head.as_ref().map(MessageId::as_str),
                session.sync_state.remote_rev,
                session.sync_state.dirty,
            ],
        )?;
        Ok(())
    }

    /// Get a session by id.
    pub fn get(conn: &Connection, id: &SessionId) -> Result<Option<Session>> {
        let row = conn
            .query_row(
                "SELECT id, root_id, branch_from_message_id, title, created_at, updated_at,
                        head_message_id, remote_rev, dirty
                 FROM sessions WHERE id = ?1",
                params![id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All sessions, most recently updated first.
    pub fn list(conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare(
            "SELECT id, root_id, branch_from_message_id, title, created_at, updated_at,
                    head_message_id, remote_rev, dirty
             FROM sessions ORDER BY updated_at DESC, id ASC",
        )?;
        let rows = stmt.query_map([], Self::map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Sessions with local changes awaiting push.
    pub fn dirty(conn: &Connection) -> Result<Vec<Session>> {
        let mut stmt = conn.prepare(
            "SELECT id, root_id, branch_from_message_id, title, created_at, updated_at,
                    head_message_id, remote_rev, dirty
             FROM sessions WHERE dirty = 1 ORDER BY updated_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], Self::map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Set or clear the dirty flag.
    pub fn set_dirty(conn: &Connection, id: &SessionId, dirty: bool) -> Result<()> {
        let _ = conn.execute(
            "UPDATE sessions SET dirty = ?2 WHERE id = ?1",
            params![id.as_str(), dirty],
        )?;
        Ok(())
    }

    /// Update the cached head pointer and touch `updated_at`.
    pub fn set_head(
        conn: &Connection,
        id: &SessionId,
        head: Option<&MessageId>,
        updated_at: i64,
    ) -> Result<()> {
        let _ = conn.execute(
            "UPDATE sessions SET head_message_id = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), head.map(MessageId::as_str), updated_at],
        )?;
        Ok(())
    }

    /// Delete a session row; messages cascade via foreign key.
    ///
    /// Returns whether a row was deleted.
    pub fn delete(conn: &Connection, id: &SessionId) -> Result<bool> {
        let n = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id.as_str()])?;
        Ok(n > 0)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
        Ok(Session {
            id: SessionId::from_string(row.get(0)?),
            root_id: SessionId::from_string(row.get(1)?),
            branch_from_message_id: row.get::<_, Option<String>>(2)?.map(MessageId::from_string),
            title: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            head: row.get::<_, Option<String>>(6)?.map(MessageId::from_string),
            sync_state: SyncState {
                remote_rev: row.get(7)?,
                dirty: row.get(8)?,
            },
        })
    }
}
