//! End-to-end pipeline scenarios.
//!
//! These drive the session manager with adapter-shaped events and
//! detached providers, so no relay traffic is involved: what is under
//! test is policy evaluation, the approval state machine, persistence,
//! and restart recovery.

use intercessio_core::activity::{ActivityKind, ActivityLog};
use intercessio_core::approval::{ApprovalManager, TaskStatus};
use intercessio_core::config::{now_ms, Config};
use intercessio_core::keystore::{KeyMetadata, MetadataStore};
use intercessio_core::notify::Notifier;
use intercessio_core::provider::{Decider, Provider, ProviderActivity, ProviderConfig, ProviderEvent, SignDraft};
use intercessio_core::session::record::{SessionRecord, SessionStatus, SessionType};
use intercessio_core::session::SessionManager;
use intercessio_core::store::{SessionStore, StoreConfig};
use intercessio_core::vault::Vault;
use nostr_sdk::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    store: Arc<TokioMutex<SessionStore>>,
    metadata: Arc<MetadataStore>,
    vault: Arc<Vault>,
    activity: Arc<ActivityLog>,
    approvals: Arc<ApprovalManager>,
    manager: Arc<SessionManager>,
}

fn harness(approval_ttl: Duration) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::new(dir.path());
    build(dir, config, approval_ttl)
}

fn build(dir: tempfile::TempDir, config: Config, approval_ttl: Duration) -> Harness {
    config.ensure_dir().expect("config dir");
    let store = Arc::new(TokioMutex::new(
        SessionStore::open(&StoreConfig::at(config.db_path())).expect("store"),
    ));
    let metadata = Arc::new(MetadataStore::open(&config).expect("metadata"));
    let vault = Arc::new(Vault::open(&config).expect("vault"));
    let activity = Arc::new(ActivityLog::new());
    let approvals = Arc::new(ApprovalManager::new(
        Arc::clone(&store),
        Arc::new(Notifier::disabled()),
    ));
    let (manager, events_rx) = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&metadata),
        Arc::clone(&vault),
        Arc::clone(&approvals),
        Arc::clone(&activity),
        approval_ttl,
    );
    tokio::spawn(Arc::clone(&manager).run_event_loop(events_rx));

    Harness {
        _dir: dir,
        config,
        store,
        metadata,
        vault,
        activity,
        approvals,
        manager,
    }
}

/// Register a key in the metadata store and vault, as key generation does.
fn register_key(h: &Harness, id: &str) -> Keys {
    let keys = Keys::generate();
    let account = format!("key-{}", id);
    let storage_kind = h
        .vault
        .put(&account, &keys.secret_key().to_secret_hex())
        .expect("vault put");
    h.metadata
        .add_key(KeyMetadata {
            id: id.to_string(),
            label: format!("key {}", id),
            npub: keys.public_key().to_bech32().expect("npub"),
            created_at: chrono::Utc::now().to_rfc3339(),
            vault_account: account,
            storage_kind,
        })
        .expect("add key");
    keys
}

/// Persist a session record and attach a detached provider for it.
async fn make_session(
    h: &Harness,
    kind: SessionType,
    template: &str,
    auto_approve: bool,
) -> SessionRecord {
    let keys = Keys::generate();
    let now = now_ms();
    let record = SessionRecord {
        id: Uuid::new_v4().to_string(),
        kind,
        key_id: "k1".into(),
        alias: "test session".into(),
        relays: vec!["wss://relay.example.com".into()],
        secret: matches!(kind, SessionType::Bunker).then(|| "pair-secret".to_string()),
        uri: None,
        auto_approve,
        status: SessionStatus::Waiting,
        last_client: None,
        created_at: now,
        updated_at: now,
        active: true,
        template: template.to_string(),
    };
    h.store.lock().await.upsert_session(&record).expect("persist");

    let provider = Provider::detached(
        keys,
        ProviderConfig {
            session_id: record.id.clone(),
            relays: record.relays.clone(),
            secret: record.secret.clone(),
            events: h.manager.events_sender(),
        },
    );
    h.manager.attach(record.clone(), provider).await;
    record
}

fn draft(kind: u16, content: &str) -> SignDraft {
    let raw = format!(
        r#"{{"kind":{},"content":"{}","created_at":{},"tags":[]}}"#,
        kind,
        content,
        now_ms() / 1000
    );
    SignDraft::parse(&raw).expect("draft")
}

async fn submit_sign_request(
    h: &Harness,
    session_id: &str,
    kind: u16,
    content: &str,
) -> tokio::sync::oneshot::Receiver<bool> {
    let (decider, rx) = Decider::channel();
    h.manager
        .handle_provider_event(ProviderEvent {
            session_id: session_id.to_string(),
            activity: ProviderActivity::SignRequest {
                client: "c0ffee".repeat(10) + "beef",
                draft: draft(kind, content),
                decider,
            },
        })
        .await;
    rx
}

async fn wait_for_pending_task(h: &Harness, session_id: &str) -> intercessio_core::approval::ApprovalTask {
    for _ in 0..100 {
        let pending = h.approvals.list_pending().await.expect("list");
        if let Some(task) = pending.into_iter().find(|t| t.session_id == session_id) {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no pending task appeared for session {}", session_id);
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[tokio::test]
async fn auto_sign_policy_signs_without_referral() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;

    let rx = submit_sign_request(&h, &session.id, 1, "hi").await;
    assert!(rx.await.expect("decision"));

    // No approval row was created.
    assert!(h.approvals.list_pending().await.expect("list").is_empty());
    assert!(h
        .store
        .lock()
        .await
        .list_tasks(None)
        .expect("tasks")
        .is_empty());

    // The request itself was observed.
    let entries = h.activity.list();
    assert!(entries.iter().any(|e| e.kind == ActivityKind::SignRequest));
}

#[tokio::test]
async fn reject_policy_denies_without_referral() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "online_login", false).await;

    let rx = submit_sign_request(&h, &session.id, 1, "note").await;
    assert!(!rx.await.expect("decision"));
    assert!(h.store.lock().await.list_tasks(None).expect("tasks").is_empty());

    // Login events still pass the same policy.
    let rx = submit_sign_request(&h, &session.id, 22242, "").await;
    assert!(rx.await.expect("decision"));
}

#[tokio::test]
async fn refer_then_approve_signs_exactly_once() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "login_and_publish", false).await;

    let rx = submit_sign_request(&h, &session.id, 4, "psst").await;

    let task = wait_for_pending_task(&h, &session.id).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.event_kind, 4);
    assert_eq!(task.policy_id, "login_and_publish");
    assert!(task.expires_at > task.created_at);

    h.approvals.resolve(&task.id, true).await.expect("resolve");
    assert!(rx.await.expect("decision"));

    let stored = h.approvals.get(&task.id).await.expect("get").expect("exists");
    assert_eq!(stored.status, TaskStatus::Approved);

    // The decision is terminal.
    assert!(h.approvals.resolve(&task.id, false).await.is_err());
}

#[tokio::test]
async fn refer_then_expire_denies() {
    let h = harness(Duration::from_millis(50));
    let session = make_session(&h, SessionType::Bunker, "login_and_publish", false).await;

    let rx = submit_sign_request(&h, &session.id, 4, "psst").await;
    let task = wait_for_pending_task(&h, &session.id).await;

    // The waiter resolves to deny without outside help.
    assert!(!rx.await.expect("decision"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stored = h.approvals.get(&task.id).await.expect("get").expect("exists");
    assert_eq!(stored.status, TaskStatus::Expired);
}

#[tokio::test]
async fn auto_approve_flag_bypasses_policy() {
    let h = harness(Duration::from_secs(60));
    // The policy alone would reject notes.
    let session = make_session(&h, SessionType::Bunker, "online_login", true).await;

    let rx = submit_sign_request(&h, &session.id, 1, "note").await;
    assert!(rx.await.expect("decision"));
    assert!(h.store.lock().await.list_tasks(None).expect("tasks").is_empty());
}

#[tokio::test]
async fn template_swap_governs_next_request_only() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "login_auto_review", false).await;

    // First request is referred under the original policy.
    let first_rx = submit_sign_request(&h, &session.id, 1, "first").await;
    let task = wait_for_pending_task(&h, &session.id).await;
    assert_eq!(task.policy_id, "login_auto_review");

    // Swap the template while the referral is in flight.
    h.manager
        .update_template(&session.id, "auto_sign")
        .await
        .expect("update template");

    // The next request signs without a new referral.
    let second_rx = submit_sign_request(&h, &session.id, 1, "second").await;
    assert!(second_rx.await.expect("decision"));
    assert_eq!(h.approvals.list_pending().await.expect("list").len(), 1);

    // The in-flight task kept its original policy identification and
    // still resolves on its own terms.
    let pending = h.approvals.get(&task.id).await.expect("get").expect("exists");
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(pending.policy_label, "Login auto, others review");

    h.approvals.resolve(&task.id, true).await.expect("resolve");
    assert!(first_rx.await.expect("decision"));
}

#[tokio::test]
async fn unknown_template_on_record_falls_back_to_default() {
    let h = harness(Duration::from_secs(60));
    // "auto_allow_everything" is not in the catalog; the default policy
    // (sign logins, refer the rest) takes over.
    let session = make_session(&h, SessionType::Bunker, "auto_allow_everything", false).await;

    let rx = submit_sign_request(&h, &session.id, 22242, "").await;
    assert!(rx.await.expect("decision"));

    let rx = submit_sign_request(&h, &session.id, 1, "note").await;
    let task = wait_for_pending_task(&h, &session.id).await;
    h.approvals.resolve(&task.id, false).await.expect("resolve");
    assert!(!rx.await.expect("decision"));
}

#[tokio::test]
async fn explicit_unknown_template_selection_fails() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;

    let err = h
        .manager
        .update_template(&session.id, "no_such_policy")
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("unknown policy"));
}

#[tokio::test]
async fn stop_rejects_in_flight_referrals() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "login_and_publish", false).await;

    let rx = submit_sign_request(&h, &session.id, 4, "psst").await;
    let task = wait_for_pending_task(&h, &session.id).await;

    h.manager.stop(&session.id, false).await.expect("stop");

    assert!(!rx.await.expect("decision"));
    let stored = h.approvals.get(&task.id).await.expect("get").expect("exists");
    assert_eq!(stored.status, TaskStatus::Rejected);

    let record = h
        .store
        .lock()
        .await
        .get_session(&session.id)
        .expect("get")
        .expect("exists");
    assert!(!record.active);
    assert!(!h.manager.is_running(&session.id).await);

    // Stopping again is fine.
    h.manager.stop(&session.id, false).await.expect("stop again");
}

#[tokio::test]
async fn delete_removes_the_row() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;

    h.manager.stop(&session.id, true).await.expect("delete");
    assert!(h.store.lock().await.get_session(&session.id).expect("get").is_none());
}

#[tokio::test]
async fn first_client_connect_transitions_waiting_to_connected() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;
    assert_eq!(session.status, SessionStatus::Waiting);

    let client = Keys::generate().public_key().to_hex();
    h.manager
        .handle_provider_event(ProviderEvent {
            session_id: session.id.clone(),
            activity: ProviderActivity::ClientConnected { client: client.clone() },
        })
        .await;

    let record = h
        .store
        .lock()
        .await
        .get_session(&session.id)
        .expect("get")
        .expect("exists");
    assert_eq!(record.status, SessionStatus::Connected);
    assert_eq!(record.last_client.as_deref(), Some(client.as_str()));
    assert!(record.active);
}

#[tokio::test]
async fn disconnect_does_not_deactivate() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;
    let client = Keys::generate().public_key().to_hex();

    h.manager
        .handle_provider_event(ProviderEvent {
            session_id: session.id.clone(),
            activity: ProviderActivity::ClientConnected { client: client.clone() },
        })
        .await;
    h.manager
        .handle_provider_event(ProviderEvent {
            session_id: session.id.clone(),
            activity: ProviderActivity::ClientDisconnected { client },
        })
        .await;

    let record = h
        .store
        .lock()
        .await
        .get_session(&session.id)
        .expect("get")
        .expect("exists");
    assert!(record.active, "transient disconnects must survive");
    let entries = h.activity.list();
    assert!(entries.iter().any(|e| e.kind == ActivityKind::ProviderDisconnect));
}

#[tokio::test]
async fn restart_resumes_active_sessions_and_pending_approvals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config::new(dir.path());

    // First life: a key, two active sessions, one pending approval.
    let h = build(dir, config.clone(), Duration::from_secs(60));
    register_key(&h, "k1");

    let bunker = make_session(&h, SessionType::Bunker, "login_and_publish", false).await;
    let mut connect = make_session(&h, SessionType::NostrConnect, "auto_sign", false).await;
    connect.status = SessionStatus::Connected;
    connect.last_client = Some(Keys::generate().public_key().to_hex());
    h.store.lock().await.upsert_session(&connect).expect("persist");

    // An inactive session and a record with a vanished key must be skipped.
    let stopped = make_session(&h, SessionType::Bunker, "auto_sign", false).await;
    h.manager.stop(&stopped.id, false).await.expect("stop");
    let mut orphaned = make_session(&h, SessionType::Bunker, "auto_sign", false).await;
    orphaned.key_id = "ghost".into();
    h.store.lock().await.upsert_session(&orphaned).expect("persist");

    let rx = submit_sign_request(&h, &bunker.id, 4, "psst").await;
    let task = wait_for_pending_task(&h, &bunker.id).await;
    let original_expiry = task.expires_at;

    // Kill the first life: providers stop, records stay active, the
    // pending waiter dies with the process.
    h.manager.shutdown_all().await;
    drop(rx);

    // Second life over the same files.
    let dir2 = h._dir;
    let h2 = build(dir2, config, Duration::from_secs(60));
    h2.approvals.restore_timers_on_boot().await.expect("restore approvals");
    h2.manager.restore_on_boot().await.expect("restore sessions");

    assert!(h2.manager.is_running(&bunker.id).await);
    assert!(h2.manager.is_running(&connect.id).await);
    assert!(!h2.manager.is_running(&stopped.id).await);
    assert!(!h2.manager.is_running(&orphaned.id).await);
    assert_eq!(h2.manager.runtime_count().await, 2);

    // The pending approval is still listed with its original deadline.
    let pending = h2.approvals.list_pending().await.expect("list");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, task.id);
    assert_eq!(pending[0].expires_at, original_expiry);

    // Resumed records kept their fields.
    let record = h2
        .store
        .lock()
        .await
        .get_session(&connect.id)
        .expect("get")
        .expect("exists");
    assert_eq!(record.status, SessionStatus::Connected);
    assert_eq!(record.last_client, connect.last_client);
}

#[tokio::test]
async fn rename_updates_record_and_runtime() {
    let h = harness(Duration::from_secs(60));
    let session = make_session(&h, SessionType::Bunker, "auto_sign", false).await;

    h.manager.rename(&session.id, "kitchen tablet").await.expect("rename");

    let record = h
        .store
        .lock()
        .await
        .get_session(&session.id)
        .expect("get")
        .expect("exists");
    assert_eq!(record.alias, "kitchen tablet");
    assert!(record.updated_at >= session.updated_at);
}

#[tokio::test]
async fn secrets_never_reach_activity_or_responses() {
    let h = harness(Duration::from_secs(60));
    register_key(&h, "k1");
    let session = make_session(&h, SessionType::Bunker, "login_and_publish", false).await;

    let _rx = submit_sign_request(&h, &session.id, 4, "psst").await;
    wait_for_pending_task(&h, &session.id).await;

    let secret_hex = {
        let meta = h.metadata.get_key("k1").expect("get").expect("exists");
        h.vault.get(&meta.vault_account).expect("vault").as_str().to_string()
    };

    let activity_json = serde_json::to_string(&h.activity.list()).expect("serialize");
    assert!(!activity_json.contains(&secret_hex));
    assert!(!activity_json.contains("pair-secret"));

    let sessions_json =
        serde_json::to_string(&h.manager.list(false).await.expect("list")).expect("serialize");
    assert!(!sessions_json.contains(&secret_hex));
    assert!(!sessions_json.contains("pair-secret"));

    // The database never sees the signing key either.
    let db = std::fs::read(h.config.db_path()).expect("read db");
    let needle = secret_hex.as_bytes();
    assert!(!db.windows(needle.len()).any(|w| w == needle));
}
