//! The sync engine: one `Idle -> Pulling -> Applying -> Pushing -> Idle`
//! pass at a time.
//!
//! A pass pulls paginated diffs from the gateway, decrypts and decodes
//! each entity, groups remote messages by session, runs the conflict
//! resolver per session, and materializes the resulting edit plan against
//! the local store. It then pushes: flushes queued tombstones, and per
//! dirty session drives attachment uploads, computes the attachment-gated
//! safe-to-send subset, and upserts sealed entities parent-first.
//!
//! Failure policy (see [`crate::errors`]): per-entity decode/decrypt
//! problems are logged and skipped; per-session push failures are isolated;
//! an unauthorized response or a crypto integrity failure aborts the whole
//! pass. A trigger while a pass is running is a no-op — the next natural
//! trigger covers outstanding work.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use braid_core::{
    AttachmentId, EntityKind, Message, MessageId, Resolution, Session, SessionId, UploadState,
    resolve, sync_order,
};
use braid_store::LocalStore;
use tracing::{debug, info, warn};

use crate::attachments::AttachmentStore;
use crate::config::SyncConfig;
use crate::crypto::{CryptoError, CryptoProvider};
use crate::errors::{Result, SyncError};
use crate::gateway::{DiffPage, GatewayError, RemoteGateway};
use crate::wire::{self, RemoteMessage, RemoteRecord, RemoteSession, SealedEntity};

/// Phase of the per-pass state machine. Tracked for observability; mutual
/// exclusion comes from the pass guard, not from this value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Pulling,
    Applying,
    Pushing,
}

/// Aggregate result of a foreground sync pass.
#[derive(Clone, Copy, Debug)]
pub struct SyncReport {
    /// Whether the pull phase completed without error.
    pub pull_ok: bool,
    /// Whether the push phase completed with every session pushed.
    pub push_ok: bool,
}

impl SyncReport {
    /// Aggregate success boolean reported to the user.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.pull_ok && self.push_ok
    }
}

/// The sync engine, generic over its three external seams.
pub struct SyncEngine<G, C, A> {
    store: Arc<LocalStore>,
    gateway: G,
    crypto: C,
    attachments: A,
    config: SyncConfig,
    /// Single in-flight pass guard; `try_lock` makes busy triggers no-ops.
    pass_guard: tokio::sync::Mutex<()>,
    phase: parking_lot::Mutex<Phase>,
    /// Upload attempts per attachment, bounded by
    /// `config.max_upload_attempts`. Cleared on success.
    upload_attempts: parking_lot::Mutex<HashMap<AttachmentId, u32>>,
}

impl<G, C, A> SyncEngine<G, C, A>
where
    G: RemoteGateway,
    C: CryptoProvider,
    A: AttachmentStore,
{
    /// Create an engine over the given store and external adapters.
    pub fn new(store: Arc<LocalStore>, gateway: G, crypto: C, attachments: A, config: SyncConfig) -> Self {
        Self {
            store,
            gateway,
            crypto,
            attachments,
            config,
            pass_guard: tokio::sync::Mutex::new(()),
            phase: parking_lot::Mutex::new(Phase::Idle),
            upload_attempts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Run one foreground sync pass.
    ///
    /// Returns `Ok(None)` if another pass is already in flight (the
    /// trigger is dropped, not queued). Unauthorized and integrity
    /// failures abort the pass as errors; any other phase failure is
    /// reflected in the report's flags.
    pub async fn sync(&self) -> Result<Option<SyncReport>> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("sync pass already running, ignoring trigger");
            return Ok(None);
        };
        let result = self.run_pass().await;
        self.set_phase(Phase::Idle);
        result.map(Some)
    }

    /// Fire-and-forget background pass; failures are logged, not surfaced.
    pub fn sync_in_background(self: &Arc<Self>)
    where
        G: 'static,
        C: 'static,
        A: 'static,
    {
        let engine = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            match engine.sync().await {
                Ok(Some(report)) if !report.is_success() => {
                    warn!(
                        pull_ok = report.pull_ok,
                        push_ok = report.push_ok,
                        "background sync pass completed with failures"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "background sync pass aborted"),
            }
        });
    }

    async fn run_pass(&self) -> Result<SyncReport> {
        let pull_ok = match self.pull().await {
            Ok(()) => true,
            Err(e @ (SyncError::Unauthorized | SyncError::Integrity(_))) => return Err(e),
            Err(e) => {
                warn!(error = %e, "pull phase failed");
                false
            }
        };
        let push_ok = match self.push().await {
            Ok(clean) => clean,
            Err(e @ (SyncError::Unauthorized | SyncError::Integrity(_))) => return Err(e),
            Err(e) => {
                warn!(error = %e, "push phase failed");
                false
            }
        };
        Ok(SyncReport { pull_ok, push_ok })
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
        debug!(?phase, "sync phase");
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────

    async fn pull(&self) -> Result<()> {
        self.set_phase(Phase::Pulling);
        let limit = self.config.page_limit;
        let mut cursor = self.store.pull_cursor()?;

        loop {
            let page = self.gateway.get_diff(cursor, limit).await.map_err(SyncError::from)?;
            let page_len = page.len();
            let next_cursor = page.next_cursor;
            debug!(cursor, page_len, next_cursor, "pulled diff page");

            self.set_phase(Phase::Applying);
            self.apply_page(page).await?;

            let full_page = page_len >= limit as usize;
            if full_page && next_cursor <= cursor {
                // A full page that fails to advance the cursor would loop
                // forever; stop and let the next pass retry.
                warn!(cursor, "pagination stalled on a full page, stopping pull");
                break;
            }
            if next_cursor > cursor {
                cursor = next_cursor;
                self.store.set_pull_cursor(cursor)?;
            }
            if !full_page {
                break;
            }
            self.set_phase(Phase::Pulling);
        }
        Ok(())
    }

    async fn apply_page(&self, page: DiffPage) -> Result<()> {
        // Sessions first so message application finds their rows.
        for entity in &page.sessions {
            match self.open_record(entity).await? {
                Some(RemoteRecord::Session(remote)) => {
                    self.store.upsert_remote_session(&remote.into_session())?;
                }
                Some(RemoteRecord::Message(_)) => {
                    warn!(id = %entity.id, "message record in session diff, skipping");
                }
                None => {}
            }
        }

        let mut by_session: HashMap<SessionId, Vec<Message>> = HashMap::new();
        for entity in &page.messages {
            match self.open_record(entity).await? {
                Some(RemoteRecord::Message(remote)) => {
                    let message = remote.into_message();
                    by_session.entry(message.session_id.clone()).or_default().push(message);
                }
                Some(RemoteRecord::Session(_)) => {
                    warn!(id = %entity.id, "session record in message diff, skipping");
                }
                None => {}
            }
        }
        for (session_id, incoming) in by_session {
            self.apply_session_messages(&session_id, incoming)?;
        }

        for id in &page.session_tombstones {
            if self.store.apply_session_tombstone(id)? {
                info!(session = %id, "applied session tombstone");
            }
        }
        for id in &page.message_tombstones {
            if self.store.apply_message_tombstone(id)? {
                debug!(message = %id, "applied message tombstone");
            }
        }
        Ok(())
    }

    /// Decrypt and decode one sealed entity. Per-entity problems are
    /// logged and skipped (`None`); an integrity failure aborts the pass.
    async fn open_record(&self, entity: &SealedEntity) -> Result<Option<RemoteRecord>> {
        let sealed = match entity.sealed() {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(id = %entity.id, error = %e, "bad envelope, skipping entity");
                return Ok(None);
            }
        };
        let plaintext = match self.crypto.decrypt(&sealed).await {
            Ok(plaintext) => plaintext,
            Err(CryptoError::Integrity(message)) => return Err(SyncError::Integrity(message)),
            Err(e) => {
                warn!(id = %entity.id, error = %e, "decrypt failed, skipping entity");
                return Ok(None);
            }
        };
        match wire::decode_record(&plaintext) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(id = %entity.id, error = %e, "undecodable record, skipping entity");
                Ok(None)
            }
        }
    }

    /// Reconcile one session's pulled messages against local history.
    fn apply_session_messages(&self, session_id: &SessionId, incoming: Vec<Message>) -> Result<()> {
        // A message can arrive before its session record (cross-page
        // hydration); materialize a placeholder row first.
        let _ = self.store.ensure_session(session_id)?;
        let local = self.store.messages_by_session(session_id)?;
        let local_ids: HashSet<&str> = local.iter().map(|m| m.id.as_str()).collect();

        // Ids we already hold are in-place text edits (id/parent immutable
        // post-creation); everything else goes through the resolver.
        let mut fresh: Vec<Message> = Vec::with_capacity(incoming.len());
        for message in incoming {
            if local_ids.contains(message.id.as_str()) {
                let edited = local
                    .iter()
                    .find(|l| l.id == message.id)
                    .is_some_and(|l| l.text != message.text);
                if edited {
                    let _ = self.store.apply_remote_edit(&message.id, &message.text)?;
                }
            } else {
                fresh.push(message);
            }
        }

        match resolve(&local, &fresh, self.config.dedupe_window_ms) {
            Resolution::NoChange => {}
            Resolution::FastForward { to_append } => {
                info!(session = %session_id, appended = to_append.len(), "fast-forward");
                self.store.apply_fast_forward(session_id, &to_append)?;
            }
            Resolution::Branch {
                from_ancestor_id,
                to_append,
                to_branch,
            } => {
                info!(
                    session = %session_id,
                    ancestor = from_ancestor_id.as_ref().map_or("none", |id| id.as_str()),
                    appended = to_append.len(),
                    moved = to_branch.len(),
                    "divergence, branching"
                );
                let _ = self.store.apply_branch(
                    session_id,
                    from_ancestor_id.as_ref(),
                    &to_append,
                    &to_branch,
                )?;
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Push
    // ─────────────────────────────────────────────────────────────────────

    /// Push phase. `Ok(true)` means every queued deletion and dirty
    /// session was flushed; per-session failures clear the flag but don't
    /// stop the loop.
    async fn push(&self) -> Result<bool> {
        self.set_phase(Phase::Pushing);
        let mut clean = self.flush_deletions().await?;

        for session in self.store.dirty_sessions()? {
            match self.push_session(&session).await {
                Ok(()) => {}
                Err(e @ (SyncError::Unauthorized | SyncError::Integrity(_))) => return Err(e),
                Err(e) => {
                    warn!(session = %session.id, error = %e, "session push failed, continuing");
                    clean = false;
                }
            }
        }
        Ok(clean)
    }

    async fn flush_deletions(&self) -> Result<bool> {
        let mut clean = true;
        for pending in self.store.pending_deletions()? {
            let result = match pending.kind {
                EntityKind::Session => {
                    self.gateway
                        .delete_session(&SessionId::from(pending.entity_id.as_str()))
                        .await
                }
                EntityKind::Message => {
                    self.gateway
                        .delete_message(&MessageId::from(pending.entity_id.as_str()))
                        .await
                }
            };
            match result {
                // A remote "not found" means the delete already took
                // effect — idempotent success.
                Ok(()) | Err(GatewayError::NotFound) => {
                    self.store.clear_deletion(pending.kind, &pending.entity_id)?;
                }
                Err(GatewayError::Unauthorized) => return Err(SyncError::Unauthorized),
                Err(e) => {
                    warn!(entity = %pending.entity_id, error = %e, "remote delete failed, keeping queued");
                    clean = false;
                }
            }
        }
        Ok(clean)
    }

    async fn push_session(&self, session: &Session) -> Result<()> {
        let pending = self.store.messages_needing_sync(&session.id)?;
        let blocked = self.drive_attachments(&pending).await?;
        let safe: Vec<Message> = sync_order(&pending, &blocked).into_iter().cloned().collect();

        // Session record first, so messages never reference an unknown
        // session remotely.
        let record = RemoteRecord::Session(RemoteSession::from_session(session));
        let entity = self.seal(session.id.as_str(), &record, session.updated_at).await?;
        let remote_rev = self.gateway.upsert_session(&entity).await.map_err(SyncError::from)?;

        let mut sent: Vec<MessageId> = Vec::with_capacity(safe.len());
        for message in &safe {
            let record = RemoteRecord::Message(RemoteMessage::from_message(message));
            let entity = self.seal(message.id.as_str(), &record, message.created_at).await?;
            self.gateway.upsert_message(&entity).await.map_err(SyncError::from)?;
            sent.push(message.id.clone());
        }
        self.store.mark_messages_synced(&sent)?;

        // The store re-checks pending messages under its own transaction:
        // anything still flagged (blocked by attachments, or created
        // locally while the upserts above were in flight) keeps the
        // session dirty for the next pass.
        self.store
            .mark_session_pushed(&session.id, remote_rev.as_deref())?;

        if sent.len() == pending.len() {
            debug!(session = %session.id, sent = sent.len(), "session pushed");
        } else {
            debug!(
                session = %session.id,
                sent = sent.len(),
                held_back = pending.len() - sent.len(),
                "messages held back by attachments"
            );
        }
        Ok(())
    }

    /// Drive pending attachment uploads and persist their new states.
    /// Returns the set of messages blocked by a not-yet-durable binary.
    async fn drive_attachments(&self, pending: &[Message]) -> Result<HashSet<MessageId>> {
        let mut blocked: HashSet<MessageId> = HashSet::new();
        for message in pending {
            if message.attachments.is_empty() {
                continue;
            }
            let mut refs = message.attachments.clone();
            let mut changed = false;
            for att in &mut refs {
                let next = match att.upload_state {
                    UploadState::Uploaded => UploadState::Uploaded,
                    UploadState::Uploading => match self.attachments.upload_state(&att.id).await {
                        Ok(state) => state,
                        Err(e) => {
                            warn!(attachment = %att.id, error = %e, "upload state poll failed");
                            UploadState::Uploading
                        }
                    },
                    UploadState::None | UploadState::Failed => {
                        if self.consume_upload_attempt(&att.id) {
                            match self.attachments.upload(&att.id).await {
                                Ok(state) => state,
                                Err(e) => {
                                    warn!(attachment = %att.id, error = %e, "attachment upload failed");
                                    UploadState::Failed
                                }
                            }
                        } else {
                            debug!(attachment = %att.id, "upload retry budget spent, leaving parked");
                            UploadState::Failed
                        }
                    }
                };
                if next == UploadState::Uploaded {
                    let _ = self.upload_attempts.lock().remove(&att.id);
                }
                if next != att.upload_state {
                    att.upload_state = next;
                    changed = true;
                }
            }
            if changed {
                self.store.update_attachment_states(&message.id, &refs)?;
            }
            if refs.iter().any(|a| a.upload_state != UploadState::Uploaded) {
                let _ = blocked.insert(message.id.clone());
            }
        }
        Ok(blocked)
    }

    /// Record one upload attempt against the retry budget. Returns `false`
    /// once the budget is spent; the attachment stays parked as failed.
    fn consume_upload_attempt(&self, id: &AttachmentId) -> bool {
        let mut attempts = self.upload_attempts.lock();
        let count = attempts.entry(id.clone()).or_insert(0);
        if *count >= self.config.max_upload_attempts {
            return false;
        }
        *count += 1;
        true
    }

    async fn seal(&self, id: &str, record: &RemoteRecord, updated_at: i64) -> Result<SealedEntity> {
        let plaintext = wire::encode_record(record)?;
        let sealed = self.crypto.encrypt(&plaintext).await.map_err(SyncError::from)?;
        Ok(SealedEntity::new(id, &sealed, updated_at))
    }
}
