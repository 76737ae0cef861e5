//! End-to-end sync engine tests over in-process fakes: a scripted gateway,
//! a passthrough crypto provider, and a scriptable attachment store.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use braid_core::{
    AttachmentId, AttachmentRef, Message, MessageId, Sender, Session, SessionId, UploadState,
};
use braid_store::LocalStore;
use braid_sync::wire::{self, RemoteMessage, RemoteRecord, RemoteSession};
use braid_sync::{
    AttachmentError, AttachmentStore, CryptoError, CryptoProvider, DiffPage, GatewayError,
    RemoteGateway, Sealed, SealedEntity, SyncConfig, SyncEngine, SyncError,
};
use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GatewayState {
    pages: VecDeque<DiffPage>,
    diff_calls: usize,
    upserted_sessions: Vec<SealedEntity>,
    upserted_messages: Vec<SealedEntity>,
    deleted_sessions: Vec<SessionId>,
    deleted_messages: Vec<MessageId>,
    unauthorized: bool,
    delete_says_not_found: bool,
    /// When set, each session upsert writes a local message into this
    /// session, emulating the user typing while a push is in flight.
    type_during_push: Option<(Arc<LocalStore>, SessionId)>,
}

#[derive(Clone, Default)]
struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    fn push_page(&self, page: DiffPage) {
        self.state.lock().pages.push_back(page);
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn get_diff(&self, _cursor: i64, _limit: u32) -> Result<DiffPage, GatewayError> {
        let mut state = self.state.lock();
        if state.unauthorized {
            return Err(GatewayError::Unauthorized);
        }
        state.diff_calls += 1;
        Ok(state.pages.pop_front().unwrap_or_default())
    }

    async fn upsert_session(&self, entity: &SealedEntity) -> Result<Option<String>, GatewayError> {
        let mut state = self.state.lock();
        if let Some((store, session_id)) = &state.type_during_push {
            let _ = store
                .create_message(session_id, None, Sender::Own, "typed mid-push", Vec::new())
                .expect("mid-push local edit");
        }
        state.upserted_sessions.push(entity.clone());
        Ok(Some(format!("rev-{}", state.upserted_sessions.len())))
    }

    async fn upsert_message(&self, entity: &SealedEntity) -> Result<(), GatewayError> {
        self.state.lock().upserted_messages.push(entity.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if state.delete_says_not_found {
            return Err(GatewayError::NotFound);
        }
        state.deleted_sessions.push(id.clone());
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        if state.delete_says_not_found {
            return Err(GatewayError::NotFound);
        }
        state.deleted_messages.push(id.clone());
        Ok(())
    }
}

/// Passthrough crypto: ciphertext is the plaintext.
struct PlainCrypto;

#[async_trait]
impl CryptoProvider for PlainCrypto {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        Ok(Sealed {
            cipher: plaintext.to_vec(),
            header: Vec::new(),
        })
    }

    async fn decrypt(&self, sealed: &Sealed) -> Result<Vec<u8>, CryptoError> {
        Ok(sealed.cipher.clone())
    }
}

/// Crypto whose decrypt always fails authentication.
struct PoisonedCrypto;

#[async_trait]
impl CryptoProvider for PoisonedCrypto {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
        Ok(Sealed {
            cipher: plaintext.to_vec(),
            header: Vec::new(),
        })
    }

    async fn decrypt(&self, _sealed: &Sealed) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Integrity("tag mismatch".into()))
    }
}

#[derive(Clone, Default)]
struct MockAttachments {
    /// State returned for known ids; unknown ids upload successfully.
    states: Arc<Mutex<HashMap<AttachmentId, UploadState>>>,
    upload_calls: Arc<Mutex<usize>>,
}

impl MockAttachments {
    fn set(&self, id: &str, state: UploadState) {
        let _ = self.states.lock().insert(AttachmentId::from(id), state);
    }
}

#[async_trait]
impl AttachmentStore for MockAttachments {
    async fn upload(&self, id: &AttachmentId) -> Result<UploadState, AttachmentError> {
        *self.upload_calls.lock() += 1;
        Ok(*self
            .states
            .lock()
            .get(id)
            .unwrap_or(&UploadState::Uploaded))
    }

    async fn upload_state(&self, id: &AttachmentId) -> Result<UploadState, AttachmentError> {
        Ok(*self
            .states
            .lock()
            .get(id)
            .unwrap_or(&UploadState::Uploaded))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

type Engine = SyncEngine<MockGateway, PlainCrypto, MockAttachments>;

struct Harness {
    store: Arc<LocalStore>,
    gateway: MockGateway,
    attachments: MockAttachments,
    engine: Engine,
}

fn harness() -> Harness {
    harness_with_config(SyncConfig::default())
}

fn harness_with_config(config: SyncConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let store = Arc::new(LocalStore::in_memory().expect("in-memory store"));
    let gateway = MockGateway::default();
    let attachments = MockAttachments::default();
    let engine = SyncEngine::new(
        Arc::clone(&store),
        gateway.clone(),
        PlainCrypto,
        attachments.clone(),
        config,
    );
    Harness {
        store,
        gateway,
        attachments,
        engine,
    }
}

fn msg(id: &str, session: &SessionId, parent: Option<&str>, t: i64, text: &str) -> Message {
    Message {
        id: MessageId::from(id),
        session_id: session.clone(),
        parent_id: parent.map(MessageId::from),
        sender: Sender::Other,
        text: text.to_owned(),
        attachments: Vec::new(),
        created_at: t,
    }
}

fn sealed_message(message: &Message) -> SealedEntity {
    let record = RemoteRecord::Message(RemoteMessage::from_message(message));
    let bytes = wire::encode_record(&record).expect("encode");
    SealedEntity::new(
        message.id.as_str(),
        &Sealed {
            cipher: bytes,
            header: Vec::new(),
        },
        message.created_at,
    )
}

fn sealed_session(session: &Session) -> SealedEntity {
    let record = RemoteRecord::Session(RemoteSession::from_session(session));
    let bytes = wire::encode_record(&record).expect("encode");
    SealedEntity::new(
        session.id.as_str(),
        &Sealed {
            cipher: bytes,
            header: Vec::new(),
        },
        session.updated_at,
    )
}

fn decode_entity(entity: &SealedEntity) -> RemoteRecord {
    wire::decode_record(&entity.sealed().expect("envelope").cipher).expect("decode")
}

// ─────────────────────────────────────────────────────────────────────────────
// Pull
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pull_appends_remote_continuation_and_moves_head() {
    let h = harness();
    let session = h.store.create_session("chat").unwrap();
    h.store.mark_session_pushed(&session.id, None).unwrap();

    // Local history a -> b, already synced.
    let a = msg("a", &session.id, None, 0, "first");
    let b = msg("b", &session.id, Some("a"), 1, "second");
    h.store
        .apply_fast_forward(&session.id, &[a.clone(), b.clone()])
        .unwrap();

    // Remote diff replays a, b and adds c.
    let c = msg("c", &session.id, Some("b"), 2, "third");
    h.gateway.push_page(DiffPage {
        messages: vec![sealed_message(&a), sealed_message(&b), sealed_message(&c)],
        next_cursor: 2,
        ..Default::default()
    });

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.is_success());

    let msgs = h.store.messages_by_session(&session.id).unwrap();
    let ids: Vec<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);

    let reloaded = h.store.session(&session.id).unwrap().unwrap();
    assert_eq!(reloaded.head, Some(MessageId::from("c")));
    assert_eq!(h.store.pull_cursor().unwrap(), 2);
}

#[tokio::test]
async fn pull_divergence_creates_branch_with_local_messages() {
    let h = harness();
    let session = h.store.create_session("chat").unwrap();

    // Local a -> b synced, plus a local-only continuation c ("x").
    let a = msg("a", &session.id, None, 0, "first");
    let b = msg("b", &session.id, Some("a"), 1, "second");
    h.store
        .apply_fast_forward(&session.id, &[a.clone(), b.clone()])
        .unwrap();
    let c = h
        .store
        .create_message(&session.id, None, Sender::Own, "x", Vec::new())
        .unwrap();
    assert_eq!(c.parent_id, Some(MessageId::from("b")));

    // Remote continued b with d ("y") instead.
    let d = msg("d", &session.id, Some("b"), 2, "y");
    h.gateway.push_page(DiffPage {
        messages: vec![sealed_message(&a), sealed_message(&b), sealed_message(&d)],
        next_cursor: 3,
        ..Default::default()
    });

    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    // Original session became a -> b -> d.
    let original: Vec<String> = h
        .store
        .messages_by_session(&session.id)
        .unwrap()
        .iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(original, ["a", "b", "d"]);
    let reloaded = h.store.session(&session.id).unwrap().unwrap();
    assert_eq!(reloaded.head, Some(MessageId::from("d")));

    // A branch session now holds c, forked from b.
    let sessions = h.store.sessions().unwrap();
    let branch = sessions
        .iter()
        .find(|s| s.id != session.id)
        .expect("branch session created");
    assert_eq!(branch.root_id, session.root_id);
    assert_eq!(branch.branch_from_message_id, Some(MessageId::from("b")));
    let branch_msgs = h.store.messages_by_session(&branch.id).unwrap();
    assert_eq!(branch_msgs.len(), 1);
    assert_eq!(branch_msgs[0].id, c.id);
}

#[tokio::test]
async fn pull_materializes_sessions_and_applies_remote_edits() {
    let h = harness();

    let remote_session = Session {
        id: SessionId::from("s-remote"),
        root_id: SessionId::from("s-remote"),
        branch_from_message_id: None,
        title: "from another device".into(),
        created_at: 1,
        updated_at: 5,
        head: None,
        sync_state: braid_core::SyncState::default(),
    };
    let m = msg("m1", &remote_session.id, None, 2, "original");
    h.gateway.push_page(DiffPage {
        sessions: vec![sealed_session(&remote_session)],
        messages: vec![sealed_message(&m)],
        next_cursor: 5,
        ..Default::default()
    });
    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    let hydrated = h.store.session(&remote_session.id).unwrap().unwrap();
    assert_eq!(hydrated.title, "from another device");
    assert!(!hydrated.sync_state.dirty);

    // Second pass carries an in-place text edit of m1.
    let edited = msg("m1", &remote_session.id, None, 2, "edited");
    h.gateway.push_page(DiffPage {
        messages: vec![sealed_message(&edited)],
        next_cursor: 6,
        ..Default::default()
    });
    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    let msgs = h.store.messages_by_session(&remote_session.id).unwrap();
    assert_eq!(msgs.len(), 1, "edit must not fork");
    assert_eq!(msgs[0].text, "edited");
}

#[tokio::test]
async fn pull_drains_pagination_in_expected_calls() {
    let h = harness_with_config(SyncConfig {
        page_limit: 2,
        ..SyncConfig::default()
    });

    // Three full pages (2 tombstones each), then an implicit empty page.
    for i in 0..3 {
        h.gateway.push_page(DiffPage {
            message_tombstones: vec![
                MessageId::from(format!("ghost-{i}-0").as_str()),
                MessageId::from(format!("ghost-{i}-1").as_str()),
            ],
            next_cursor: i + 1,
            ..Default::default()
        });
    }

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.is_success());
    assert_eq!(h.gateway.state.lock().diff_calls, 4);
    assert_eq!(h.store.pull_cursor().unwrap(), 3);
}

#[tokio::test]
async fn pull_stall_guard_terminates_loop() {
    let h = harness_with_config(SyncConfig {
        page_limit: 1,
        ..SyncConfig::default()
    });
    // A full page that never advances the cursor.
    h.gateway.push_page(DiffPage {
        message_tombstones: vec![MessageId::from("ghost")],
        next_cursor: 0,
        ..Default::default()
    });

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.pull_ok, "stall is a documented fallback, not an error");
    assert_eq!(h.gateway.state.lock().diff_calls, 1);
}

#[tokio::test]
async fn pull_tombstones_delete_entities() {
    let h = harness();
    let session = h.store.create_session("chat").unwrap();
    h.store
        .apply_fast_forward(
            &session.id,
            &[
                msg("a", &session.id, None, 0, "a"),
                msg("b", &session.id, Some("a"), 1, "b"),
            ],
        )
        .unwrap();

    h.gateway.push_page(DiffPage {
        message_tombstones: vec![MessageId::from("b")],
        next_cursor: 1,
        ..Default::default()
    });
    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    assert!(h.store.message(&MessageId::from("b")).unwrap().is_none());
    let reloaded = h.store.session(&session.id).unwrap().unwrap();
    assert_eq!(reloaded.head, Some(MessageId::from("a")));
}

#[tokio::test]
async fn undecodable_entities_are_skipped_not_fatal() {
    let h = harness();
    let session = h.store.create_session("chat").unwrap();
    h.store.mark_session_pushed(&session.id, None).unwrap();

    let garbage = SealedEntity::new(
        "junk",
        &Sealed {
            cipher: b"not json".to_vec(),
            header: Vec::new(),
        },
        1,
    );
    let good = msg("a", &session.id, None, 0, "fine");
    h.gateway.push_page(DiffPage {
        messages: vec![garbage, sealed_message(&good)],
        next_cursor: 1,
        ..Default::default()
    });

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.pull_ok);
    assert_eq!(h.store.messages_by_session(&session.id).unwrap().len(), 1);
}

#[tokio::test]
async fn second_pull_of_same_diff_is_a_no_op() {
    let h = harness();
    let session = h.store.create_session("chat").unwrap();
    h.store.mark_session_pushed(&session.id, None).unwrap();

    let a = msg("a", &session.id, None, 0, "a");
    let b = msg("b", &session.id, Some("a"), 1, "b");
    for _ in 0..2 {
        h.gateway.push_page(DiffPage {
            messages: vec![sealed_message(&a), sealed_message(&b)],
            next_cursor: 1,
            ..Default::default()
        });
        let _ = h.engine.sync().await.unwrap().expect("pass ran");
    }

    assert_eq!(h.store.messages_by_session(&session.id).unwrap().len(), 2);
    assert_eq!(h.store.sessions().unwrap().len(), 1, "no spurious branch");
}

// ─────────────────────────────────────────────────────────────────────────────
// Push
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn push_sends_dirty_session_and_messages_parent_first() {
    let h = harness();
    let session = h.store.create_session("outgoing").unwrap();
    let first = h
        .store
        .create_message(&session.id, None, Sender::Own, "one", Vec::new())
        .unwrap();
    let second = h
        .store
        .create_message(&session.id, None, Sender::Own, "two", Vec::new())
        .unwrap();

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.is_success());

    let state = h.gateway.state.lock();
    assert_eq!(state.upserted_sessions.len(), 1);
    let record = decode_entity(&state.upserted_sessions[0]);
    let s = assert_matches!(record, RemoteRecord::Session(s) => s);
    assert_eq!(s.id, session.id);

    let pushed: Vec<MessageId> = state
        .upserted_messages
        .iter()
        .map(|e| {
            let m = assert_matches!(decode_entity(e), RemoteRecord::Message(m) => m);
            m.id
        })
        .collect();
    assert_eq!(pushed, vec![first.id.clone(), second.id.clone()]);
    drop(state);

    assert!(h.store.messages_needing_sync(&session.id).unwrap().is_empty());
    assert!(h.store.dirty_sessions().unwrap().is_empty());

    // The gateway's revision handle lands on the session.
    let reloaded = h.store.session(&session.id).unwrap().unwrap();
    assert_eq!(reloaded.sync_state.remote_rev.as_deref(), Some("rev-1"));
}

#[tokio::test]
async fn message_typed_during_push_is_sent_on_the_next_pass() {
    let h = harness();
    let session = h.store.create_session("busy").unwrap();
    let first = h
        .store
        .create_message(&session.id, None, Sender::Own, "one", Vec::new())
        .unwrap();

    // The gateway emulates the user typing while the push's network calls
    // are in flight.
    h.gateway.state.lock().type_during_push =
        Some((Arc::clone(&h.store), session.id.clone()));
    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    // Only the snapshot was sent; the mid-push message must keep the
    // session dirty rather than being stranded in a "clean" session.
    assert_eq!(h.gateway.state.lock().upserted_messages.len(), 1);
    assert_eq!(h.store.messages_needing_sync(&session.id).unwrap().len(), 1);
    assert_eq!(
        h.store.dirty_sessions().unwrap().len(),
        1,
        "session went clean with a message still pending"
    );

    h.gateway.state.lock().type_during_push = None;
    let _ = h.engine.sync().await.unwrap().expect("pass ran");

    let state = h.gateway.state.lock();
    assert_eq!(state.upserted_messages.len(), 2);
    let last = assert_matches!(
        decode_entity(state.upserted_messages.last().unwrap()),
        RemoteRecord::Message(m) => m
    );
    assert_eq!(last.text, "typed mid-push");
    assert_eq!(last.parent_id, Some(first.id));
    drop(state);
    assert!(h.store.dirty_sessions().unwrap().is_empty());
}

#[tokio::test]
async fn push_holds_back_messages_with_pending_attachments() {
    let h = harness();
    h.attachments.set("att-stuck", UploadState::Uploading);

    let session = h.store.create_session("gated").unwrap();
    let gated = h
        .store
        .create_message(
            &session.id,
            None,
            Sender::Own,
            "with attachment",
            vec![AttachmentRef {
                id: AttachmentId::from("att-stuck"),
                upload_state: UploadState::Uploading,
            }],
        )
        .unwrap();
    // A reply under the gated message is transitively held back too.
    let reply = h
        .store
        .create_message(&session.id, None, Sender::Own, "reply", Vec::new())
        .unwrap();
    assert_eq!(reply.parent_id, Some(gated.id.clone()));

    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.is_success(), "holdback is not a failure");

    assert!(h.gateway.state.lock().upserted_messages.is_empty());
    assert_eq!(
        h.store.dirty_sessions().unwrap().len(),
        1,
        "session stays dirty until attachments land"
    );

    // Attachment completes; next pass sends both messages in order.
    h.attachments.set("att-stuck", UploadState::Uploaded);
    let _ = h.engine.sync().await.unwrap().expect("pass ran");
    let state = h.gateway.state.lock();
    assert_eq!(state.upserted_messages.len(), 2);
    drop(state);
    assert!(h.store.dirty_sessions().unwrap().is_empty());
}

#[tokio::test]
async fn upload_attempts_stop_at_the_budget() {
    let h = harness_with_config(SyncConfig {
        max_upload_attempts: 2,
        ..SyncConfig::default()
    });
    // Every upload attempt for this binary fails.
    h.attachments.set("att-bad", UploadState::Failed);

    let session = h.store.create_session("stuck").unwrap();
    let _ = h
        .store
        .create_message(
            &session.id,
            None,
            Sender::Own,
            "cannot leave yet",
            vec![AttachmentRef {
                id: AttachmentId::from("att-bad"),
                upload_state: UploadState::None,
            }],
        )
        .unwrap();

    for _ in 0..4 {
        let _ = h.engine.sync().await.unwrap().expect("pass ran");
    }

    assert_eq!(
        *h.attachments.upload_calls.lock(),
        2,
        "attempts past the budget"
    );
    assert!(h.gateway.state.lock().upserted_messages.is_empty());
    assert_eq!(
        h.store.dirty_sessions().unwrap().len(),
        1,
        "parked attachment must keep the message blocked"
    );
}

#[tokio::test]
async fn deletion_queue_flushes_and_treats_not_found_as_success() {
    let h = harness();
    let session = h.store.create_session("doomed").unwrap();
    let message = h
        .store
        .create_message(&session.id, None, Sender::Own, "bye", Vec::new())
        .unwrap();
    h.store.delete_message_local(&message.id).unwrap();
    h.store.delete_session_local(&session.id).unwrap();

    h.gateway.state.lock().delete_says_not_found = true;
    let report = h.engine.sync().await.unwrap().expect("pass ran");
    assert!(report.push_ok, "remote not-found is idempotent success");
    assert!(h.store.pending_deletions().unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Fail-fast conditions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_aborts_the_whole_pass() {
    let h = harness();
    h.gateway.state.lock().unauthorized = true;
    let err = h.engine.sync().await.unwrap_err();
    assert_matches!(err, SyncError::Unauthorized);
}

#[tokio::test]
async fn integrity_failure_aborts_the_whole_pass() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let gateway = MockGateway::default();
    let session = store.create_session("chat").unwrap();
    store.mark_session_pushed(&session.id, None).unwrap();
    gateway.push_page(DiffPage {
        messages: vec![sealed_message(&msg(
            "a",
            &session.id,
            None,
            0,
            "tampered",
        ))],
        next_cursor: 1,
        ..Default::default()
    });

    let engine = SyncEngine::new(
        Arc::clone(&store),
        gateway,
        PoisonedCrypto,
        MockAttachments::default(),
        SyncConfig::default(),
    );
    let err = engine.sync().await.unwrap_err();
    assert_matches!(err, SyncError::Integrity(_));
    // Nothing was materialized from the suspect page.
    assert!(store.messages_by_session(&session.id).unwrap().is_empty());
}
