//! Sync engine configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the sync engine. Deserializable so hosts can layer it into
/// their own settings files; every field has a compiled default.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Maximum items (entities + tombstones) per diff page.
    pub page_limit: u32,
    /// Logical-time window within which same-signature sibling messages
    /// collapse as duplicates.
    pub dedupe_window_ms: i64,
    /// Upload attempts per attachment before the engine stops driving it.
    /// The referencing message stays blocked (and its session dirty).
    pub max_upload_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_limit: 100,
            dedupe_window_ms: 5_000,
            max_upload_attempts: 5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: SyncConfig = serde_json::from_str("{\"pageLimit\": 25}").unwrap();
        assert_eq!(config.page_limit, 25);
        assert_eq!(config.dedupe_window_ms, 5_000);
        assert_eq!(config.max_upload_attempts, 5);
    }
}
