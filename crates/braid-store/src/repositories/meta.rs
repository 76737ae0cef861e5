//! Sync metadata key/value table.
//!
//! Holds small durable sync state, currently just the pull cursor (the
//! last-seen remote logical time), so a restart resumes where the previous
//! pass left off.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

const PULL_CURSOR: &str = "pull_cursor";

/// Metadata repository — stateless, every method takes `&Connection`.
pub struct MetaRepo;

impl MetaRepo {
    /// The persisted pull cursor, or 0 if the store has never pulled.
    pub fn pull_cursor(conn: &Connection) -> Result<i64> {
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![PULL_CURSOR],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    /// Persist the pull cursor.
    pub fn set_pull_cursor(conn: &Connection, cursor: i64) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![PULL_CURSOR, cursor.to_string()],
        )?;
        Ok(())
    }
}
