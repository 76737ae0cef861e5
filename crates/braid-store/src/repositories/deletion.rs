//! Pending-deletion queue — tombstones awaiting remote flush.
//!
//! Local deletes are applied to the store immediately and queued here as
//! `(kind, id)`; the sync engine flushes the queue opportunistically on
//! each push. The queue is idempotent: re-queueing an entry is a no-op.

use braid_core::EntityKind;
use rusqlite::{Connection, params};

use crate::errors::Result;

/// A queued remote deletion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingDeletion {
    /// Which table the entity belonged to.
    pub kind: EntityKind,
    /// The deleted entity's id.
    pub entity_id: String,
    /// Logical time the deletion was queued.
    pub queued_at: i64,
}

/// Deletion-queue repository — stateless, every method takes `&Connection`.
pub struct DeletionRepo;

impl DeletionRepo {
    /// Queue a deletion for remote flush. Re-queueing is a no-op.
    pub fn queue(conn: &Connection, kind: EntityKind, entity_id: &str, queued_at: i64) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR IGNORE INTO pending_deletions (entity_kind, entity_id, queued_at)
             VALUES (?1, ?2, ?3)",
            params![kind_tag(kind), entity_id, queued_at],
        )?;
        Ok(())
    }

    /// All queued deletions, oldest first.
    pub fn all(conn: &Connection) -> Result<Vec<PendingDeletion>> {
        let mut stmt = conn.prepare(
            "SELECT entity_kind, entity_id, queued_at FROM pending_deletions
             ORDER BY queued_at ASC, entity_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let tag: String = row.get(0)?;
            Ok(PendingDeletion {
                kind: kind_from_tag(&tag),
                entity_id: row.get(1)?,
                queued_at: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Remove a queue entry after a successful remote delete.
    pub fn clear(conn: &Connection, kind: EntityKind, entity_id: &str) -> Result<()> {
        let _ = conn.execute(
            "DELETE FROM pending_deletions WHERE entity_kind = ?1 AND entity_id = ?2",
            params![kind_tag(kind), entity_id],
        )?;
        Ok(())
    }
}

fn kind_tag(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Session => "session",
        EntityKind::Message => "message",
    }
}

fn kind_from_tag(tag: &str) -> EntityKind {
    match tag {
        "session" => EntityKind::Session,
        _ => EntityKind::Message,
    }
}
