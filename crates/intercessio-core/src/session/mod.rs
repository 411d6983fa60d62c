//! Session manager: the coordinator.
//!
//! Owns every runtime session, binds each to a provider, a key, and a
//! policy, routes provider activity into the signing pipeline and the
//! approval flow, and persists all state transitions through the session
//! store. Record writes for a session are serialized here; policy
//! evaluation never does I/O; a handler suspended on an approval decision
//! does not block any other session's traffic.

pub mod record;

use crate::activity::{ActivityEntry, ActivityKind, ActivityLog};
use crate::approval::{ApprovalManager, NewApproval};
use crate::error::{Error, Result};
use crate::keystore::MetadataStore;
use crate::logging::{kind_label, short_pubkey};
use crate::policy::{self, Decision, Policy, PolicyContext, SessionSummary};
use crate::provider::{
    parse_nostr_connect_uri, Decider, Provider, ProviderActivity, ProviderConfig, ProviderEvent,
    SignDraft,
};
use crate::relays::normalize_relays;
use crate::store::SessionStore;
use crate::vault::Vault;
use nostr_sdk::prelude::*;
use record::{SessionRecord, SessionStatus, SessionType};
use serde_json::json;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as TokioMutex, RwLock as TokioRwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Length of a generated bunker pairing secret, in bytes (hex-encoded).
const PAIRING_SECRET_LEN: usize = 16;

/// One live session: its current record, its provider, and a swappable
/// policy handle so template updates apply to the next request without a
/// provider restart.
pub struct RuntimeSession {
    /// Current record copy. The store stays authoritative.
    pub record: SessionRecord,
    /// The session's Nostr Connect provider.
    pub provider: Arc<Provider>,
    /// Currently selected policy.
    pub policy: Arc<StdRwLock<&'static Policy>>,
}

/// Parameters for starting a bunker session.
#[derive(Debug, Clone)]
pub struct StartBunker {
    /// Key to sign with.
    pub key_id: String,
    /// Display alias.
    pub alias: String,
    /// Relay URLs (normalized here).
    pub relays: Vec<String>,
    /// Pairing secret; generated when absent.
    pub secret: Option<String>,
    /// Bypass the policy for sign requests.
    pub auto_approve: bool,
    /// Policy template id; unknown or absent ids use the default.
    pub template: Option<String>,
}

/// Parameters for starting a nostr-connect session.
#[derive(Debug, Clone)]
pub struct StartNostrConnect {
    /// Key to sign with.
    pub key_id: String,
    /// Display alias.
    pub alias: String,
    /// Relay URLs in addition to those named by the URI.
    pub relays: Vec<String>,
    /// The client's `nostrconnect://` URI.
    pub uri: String,
    /// Bypass the policy for sign requests.
    pub auto_approve: bool,
    /// Policy template id; unknown or absent ids use the default.
    pub template: Option<String>,
}

/// The coordinator owning all runtime sessions.
pub struct SessionManager {
    store: Arc<TokioMutex<SessionStore>>,
    metadata: Arc<MetadataStore>,
    vault: Arc<Vault>,
    approvals: Arc<ApprovalManager>,
    activity: Arc<ActivityLog>,
    sessions: TokioRwLock<HashMap<String, RuntimeSession>>,
    events_tx: mpsc::Sender<ProviderEvent>,
    approval_ttl: Duration,
}

impl SessionManager {
    /// Create the manager. The returned receiver carries every provider
    /// event; feed it to [`SessionManager::run_event_loop`].
    pub fn new(
        store: Arc<TokioMutex<SessionStore>>,
        metadata: Arc<MetadataStore>,
        vault: Arc<Vault>,
        approvals: Arc<ApprovalManager>,
        activity: Arc<ActivityLog>,
        approval_ttl: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<ProviderEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let manager = Arc::new(Self {
            store,
            metadata,
            vault,
            approvals,
            activity,
            sessions: TokioRwLock::new(HashMap::new()),
            events_tx,
            approval_ttl,
        });
        (manager, events_rx)
    }

    /// Sender handle providers deliver their events on.
    pub fn events_sender(&self) -> mpsc::Sender<ProviderEvent> {
        self.events_tx.clone()
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Start a bunker session and return `(session_id, bunker_uri)`.
    pub async fn start_bunker(self: &Arc<Self>, params: StartBunker) -> Result<(String, String)> {
        let keys = self.keys_for(&params.key_id)?;
        let relays = normalize_relays(&params.relays)?;
        let template = resolve_template_id(params.template.as_deref());
        let secret = params.secret.unwrap_or_else(generate_pairing_secret);

        let now = crate::config::now_ms();
        let mut record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            kind: SessionType::Bunker,
            key_id: params.key_id,
            alias: params.alias,
            relays,
            secret: Some(secret),
            uri: None,
            auto_approve: params.auto_approve,
            status: SessionStatus::Waiting,
            last_client: None,
            created_at: now,
            updated_at: now,
            active: true,
            template,
        };
        self.store.lock().await.upsert_session(&record)?;

        let provider = match Provider::start_bunker(keys, self.provider_config(&record)).await {
            Ok(provider) => provider,
            Err(e) => {
                record.active = false;
                record.touch();
                if let Err(persist) = self.store.lock().await.upsert_session(&record) {
                    warn!(session = %record.id, error = %persist, "failed to mark session inactive");
                }
                return Err(e);
            }
        };

        let uri = provider.bunker_uri();
        record.uri = Some(uri.clone());
        record.touch();
        self.store.lock().await.upsert_session(&record)?;

        self.activity.record(
            ActivityEntry::new(
                ActivityKind::SessionStart,
                format!("bunker session '{}' started", record.display_name()),
            )
            .session(record.id.clone(), record.display_name()),
        );
        info!(session = %record.id, "bunker session started");

        let id = record.id.clone();
        self.attach(record, provider).await;
        Ok((id, uri))
    }

    /// Start a nostr-connect session and return its id.
    pub async fn start_nostr_connect(self: &Arc<Self>, params: StartNostrConnect) -> Result<String> {
        let keys = self.keys_for(&params.key_id)?;
        let target = parse_nostr_connect_uri(&params.uri)?;

        let mut relay_inputs = params.relays.clone();
        relay_inputs.extend(target.relays.clone());
        let relays = normalize_relays(&relay_inputs)?;
        let template = resolve_template_id(params.template.as_deref());

        let now = crate::config::now_ms();
        let mut record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            kind: SessionType::NostrConnect,
            key_id: params.key_id,
            alias: params.alias,
            relays,
            secret: None,
            uri: Some(params.uri.clone()),
            auto_approve: params.auto_approve,
            status: SessionStatus::Waiting,
            last_client: None,
            created_at: now,
            updated_at: now,
            active: true,
            template,
        };
        self.store.lock().await.upsert_session(&record)?;

        let start = Provider::start_nostr_connect(keys, self.provider_config(&record), &params.uri);
        let (provider, client) = match start.await {
            Ok(done) => done,
            Err(e) => {
                record.active = false;
                record.touch();
                if let Err(persist) = self.store.lock().await.upsert_session(&record) {
                    warn!(session = %record.id, error = %persist, "failed to mark session inactive");
                }
                return Err(e);
            }
        };

        // Pairing completes during start.
        record.status = SessionStatus::Connected;
        record.last_client = Some(client);
        record.touch();
        self.store.lock().await.upsert_session(&record)?;

        self.activity.record(
            ActivityEntry::new(
                ActivityKind::SessionStart,
                format!("nostr-connect session '{}' started", record.display_name()),
            )
            .session(record.id.clone(), record.display_name()),
        );
        info!(session = %record.id, "nostr-connect session started");

        let id = record.id.clone();
        self.attach(record, provider).await;
        Ok(id)
    }

    /// Stop a session: drop the runtime, reject its pending approvals,
    /// mark the record inactive, and delete the row when `remove` is set.
    /// Stopping an already-stopped session is fine.
    pub async fn stop(&self, session_id: &str, remove: bool) -> Result<()> {
        let runtime = self.sessions.write().await.remove(session_id);
        if let Some(runtime) = &runtime {
            runtime.provider.stop().await;
        }

        self.approvals.reject_for_session(session_id).await?;

        let record = self.store.lock().await.get_session(session_id)?;
        let Some(mut record) = record else {
            if runtime.is_some() {
                return Ok(());
            }
            return Err(Error::NotFound(format!("session '{}'", session_id)));
        };

        if remove {
            self.store.lock().await.delete_session(session_id)?;
            self.activity.record(
                ActivityEntry::new(
                    ActivityKind::SessionStop,
                    format!("session '{}' deleted", record.display_name()),
                )
                .session(record.id.clone(), record.display_name()),
            );
            info!(session = %session_id, "session deleted");
        } else {
            record.active = false;
            record.touch();
            self.store.lock().await.upsert_session(&record)?;
            self.activity.record(
                ActivityEntry::new(
                    ActivityKind::SessionStop,
                    format!("session '{}' stopped", record.display_name()),
                )
                .session(record.id.clone(), record.display_name()),
            );
            info!(session = %session_id, "session stopped");
        }
        Ok(())
    }

    /// Change a session's alias.
    pub async fn rename(&self, session_id: &str, alias: &str) -> Result<()> {
        let mut record = self
            .store
            .lock()
            .await
            .get_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session '{}'", session_id)))?;

        record.alias = alias.to_string();
        record.touch();
        self.store.lock().await.upsert_session(&record)?;

        if let Some(runtime) = self.sessions.write().await.get_mut(session_id) {
            runtime.record.alias = alias.to_string();
            runtime.record.updated_at = record.updated_at;
        }

        self.activity.record(
            ActivityEntry::new(
                ActivityKind::SessionUpdate,
                format!("session renamed to '{}'", alias),
            )
            .session(record.id.clone(), record.display_name()),
        );
        Ok(())
    }

    /// Select a different policy template. Unknown ids are an error here;
    /// the swap is observable to the next inbound request, while in-flight
    /// referrals keep their original policy label.
    pub async fn update_template(&self, session_id: &str, template: &str) -> Result<()> {
        let selected =
            policy::get(template).ok_or_else(|| Error::UnknownPolicy(template.to_string()))?;

        let mut record = self
            .store
            .lock()
            .await
            .get_session(session_id)?
            .ok_or_else(|| Error::NotFound(format!("session '{}'", session_id)))?;

        record.template = template.to_string();
        record.touch();
        self.store.lock().await.upsert_session(&record)?;

        if let Some(runtime) = self.sessions.write().await.get_mut(session_id) {
            runtime.record.template = template.to_string();
            runtime.record.updated_at = record.updated_at;
            *runtime.policy.write().unwrap_or_else(PoisonError::into_inner) = selected;
        }

        self.activity.record(
            ActivityEntry::new(
                ActivityKind::SessionUpdate,
                format!("session policy set to '{}'", selected.label),
            )
            .session(record.id.clone(), record.display_name()),
        );
        Ok(())
    }

    /// List session records from the store.
    pub async fn list(&self, active_only: bool) -> Result<Vec<SessionRecord>> {
        self.store.lock().await.list_sessions(active_only)
    }

    /// Number of live runtime sessions.
    pub async fn runtime_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether a runtime session exists for the id.
    pub async fn is_running(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Re-register every active record after a restart. A record whose
    /// key no longer resolves, or whose provider fails to start, is
    /// logged and skipped; the others proceed.
    pub async fn restore_on_boot(self: &Arc<Self>) -> Result<()> {
        let records = self.store.lock().await.list_sessions(true)?;
        info!(count = records.len(), "restoring sessions");

        for record in records {
            let keys = match self.keys_for(&record.key_id) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(session = %record.id, key = %record.key_id, error = %e, "skipping restore: key unavailable");
                    continue;
                }
            };

            let provider = match Provider::start_bunker(keys, self.provider_config(&record)).await {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(session = %record.id, error = %e, "skipping restore: provider failed");
                    continue;
                }
            };

            if let Some(client) = &record.last_client {
                if let Err(e) = provider.resume_client(client).await {
                    warn!(session = %record.id, error = %e, "client resume failed");
                }
            }

            info!(session = %record.id, "session restored");
            self.attach(record, provider).await;
        }
        Ok(())
    }

    /// Register a runtime session. Used by the start paths and by test
    /// harnesses driving the pipeline with detached providers.
    pub async fn attach(&self, record: SessionRecord, provider: Arc<Provider>) {
        let policy = Arc::new(StdRwLock::new(policy::resolve(&record.template)));
        let id = record.id.clone();
        self.sessions
            .write()
            .await
            .insert(id, RuntimeSession { record, provider, policy });
    }

    /// Stop every provider without touching records, as part of a
    /// graceful daemon shutdown. Records stay active so the next boot
    /// resumes them.
    pub async fn shutdown_all(&self) {
        let mut map = self.sessions.write().await;
        for (id, runtime) in map.drain() {
            debug!(session = %id, "stopping provider");
            runtime.provider.stop().await;
        }
    }

    // ------------------------------------------------------------------
    // Provider event routing
    // ------------------------------------------------------------------

    /// Consume provider events until the channel closes.
    pub async fn run_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<ProviderEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_provider_event(event).await;
        }
        debug!("provider event loop ended");
    }

    /// Route one provider event.
    pub async fn handle_provider_event(self: &Arc<Self>, event: ProviderEvent) {
        let session_id = event.session_id;
        match event.activity {
            ProviderActivity::ConnectRequest { client, decider } => {
                // Pairing authorization only; never persisted as a decision.
                self.record_session_activity(
                    &session_id,
                    ActivityKind::ProviderConnect,
                    format!("pairing request from {}", short_pubkey(&client)),
                    Some(&client),
                )
                .await;
                decider.resolve(true);
            }
            ProviderActivity::ClientConnected { client } => {
                self.on_client_connected(&session_id, &client).await;
            }
            ProviderActivity::ClientDisconnected { client } => {
                // Transient; the record stays active until explicit stop.
                self.record_session_activity(
                    &session_id,
                    ActivityKind::ProviderDisconnect,
                    format!("client {} disconnected", short_pubkey(&client)),
                    Some(&client),
                )
                .await;
            }
            ProviderActivity::SignRequest { client, draft, decider } => {
                let manager = Arc::clone(self);
                tokio::spawn(async move {
                    manager.sign_pipeline(session_id, client, draft, decider).await;
                });
            }
            ProviderActivity::SignDecision { client, approved, event_kind } => {
                let verdict = if approved { "signed" } else { "denied" };
                self.record_session_activity_with(
                    &session_id,
                    ActivityKind::SignResult,
                    format!("{} {}", kind_label(event_kind), verdict),
                    Some(&client),
                    Some(json!({ "approved": approved, "kind": event_kind })),
                )
                .await;
            }
            ProviderActivity::Nip04 { client, op } => {
                self.record_session_activity(
                    &session_id,
                    ActivityKind::Nip04,
                    format!("nip-04 {} for {}", op.as_str(), short_pubkey(&client)),
                    Some(&client),
                )
                .await;
            }
            ProviderActivity::Nip44 { client, op } => {
                self.record_session_activity(
                    &session_id,
                    ActivityKind::Nip44,
                    format!("nip-44 {} for {}", op.as_str(), short_pubkey(&client)),
                    Some(&client),
                )
                .await;
            }
        }
    }

    /// The signing pipeline for one inbound request.
    async fn sign_pipeline(
        self: Arc<Self>,
        session_id: String,
        client: String,
        draft: SignDraft,
        decider: Decider,
    ) {
        let Some((record, policy)) = self.runtime_snapshot(&session_id).await else {
            warn!(session = %session_id, "sign request for unknown session");
            decider.resolve(false);
            return;
        };

        self.activity.record(
            ActivityEntry::new(ActivityKind::SignRequest, draft.summary())
                .session(record.id.clone(), record.display_name())
                .client(client.clone()),
        );

        let approved = if record.auto_approve {
            true
        } else {
            let selected: &'static Policy =
                *policy.read().unwrap_or_else(PoisonError::into_inner);
            let ctx = PolicyContext {
                kind: draft.kind,
                content: draft.content.clone(),
                client: client.clone(),
                session: SessionSummary {
                    id: record.id.clone(),
                    alias: record.alias.clone(),
                    kind: record.kind,
                },
            };

            let decision = catch_unwind(AssertUnwindSafe(|| selected.evaluate(&ctx)))
                .unwrap_or_else(|_| {
                    warn!(session = %record.id, policy = selected.id, "policy evaluation panicked");
                    Decision::Reject
                });

            match decision {
                Decision::Sign => true,
                Decision::Reject => false,
                Decision::Refer => {
                    let new = NewApproval {
                        session_id: record.id.clone(),
                        session_alias: record.alias.clone(),
                        session_type: record.kind,
                        client: client.clone(),
                        draft,
                        policy_id: selected.id.to_string(),
                        policy_label: selected.label.to_string(),
                    };
                    match self.approvals.create(new, self.approval_ttl).await {
                        Ok((_task_id, future)) => future.wait().await,
                        Err(e) => {
                            warn!(session = %record.id, error = %e, "failed to open approval");
                            false
                        }
                    }
                }
            }
        };

        decider.resolve(approved);
    }

    async fn on_client_connected(&self, session_id: &str, client: &str) {
        let record = {
            let map = self.sessions.read().await;
            map.get(session_id).map(|rt| rt.record.clone())
        };
        let record = match record {
            Some(record) => Some(record),
            None => match self.store.lock().await.get_session(session_id) {
                Ok(found) => found,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "failed to load session record");
                    None
                }
            },
        };
        let Some(mut record) = record else {
            warn!(session = %session_id, "client connected for unknown session");
            return;
        };

        record.status = SessionStatus::Connected;
        record.last_client = Some(client.to_string());
        record.active = true;
        record.touch();

        if let Err(e) = self.store.lock().await.upsert_session(&record) {
            warn!(session = %session_id, error = %e, "failed to persist client connection");
        }
        if let Some(runtime) = self.sessions.write().await.get_mut(session_id) {
            runtime.record = record.clone();
        }

        self.activity.record(
            ActivityEntry::new(
                ActivityKind::ProviderConnect,
                format!("client {} connected", short_pubkey(client)),
            )
            .session(record.id.clone(), record.display_name())
            .client(client.to_string()),
        );
        info!(session = %session_id, client = %short_pubkey(client), "client connected");
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn provider_config(&self, record: &SessionRecord) -> ProviderConfig {
        ProviderConfig {
            session_id: record.id.clone(),
            relays: record.relays.clone(),
            secret: record.secret.clone(),
            events: self.events_tx.clone(),
        }
    }

    /// Load the signing keys for a key id. The vault secret is held only
    /// for the duration of this call.
    fn keys_for(&self, key_id: &str) -> Result<Keys> {
        let meta = self
            .metadata
            .get_key(key_id)?
            .ok_or_else(|| Error::NotFound(format!("key '{}'", key_id)))?;

        let secret = self.vault.get(&meta.vault_account)?;
        let bytes = Zeroizing::new(
            hex::decode(secret.as_str())
                .map_err(|_| Error::Vault("stored key is not valid hex".into()))?,
        );
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| Error::Vault(format!("invalid stored key: {}", e)))?;
        Ok(Keys::new(secret_key))
    }

    async fn runtime_snapshot(
        &self,
        session_id: &str,
    ) -> Option<(SessionRecord, Arc<StdRwLock<&'static Policy>>)> {
        let map = self.sessions.read().await;
        map.get(session_id)
            .map(|rt| (rt.record.clone(), Arc::clone(&rt.policy)))
    }

    async fn record_session_activity(
        &self,
        session_id: &str,
        kind: ActivityKind,
        summary: String,
        client: Option<&str>,
    ) {
        self.record_session_activity_with(session_id, kind, summary, client, None).await;
    }

    async fn record_session_activity_with(
        &self,
        session_id: &str,
        kind: ActivityKind,
        summary: String,
        client: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) {
        let label = {
            let map = self.sessions.read().await;
            map.get(session_id)
                .map(|rt| rt.record.display_name())
                .unwrap_or_else(|| session_id.chars().take(8).collect())
        };

        let mut entry = ActivityEntry::new(kind, summary).session(session_id.to_string(), label);
        if let Some(client) = client {
            entry = entry.client(client.to_string());
        }
        if let Some(metadata) = metadata {
            entry = entry.metadata(metadata);
        }
        self.activity.record(entry);
    }
}

/// Resolve a requested template id to a known catalog id, falling back
/// to the default.
fn resolve_template_id(requested: Option<&str>) -> String {
    match requested {
        Some(id) if policy::get(id).is_some() => id.to_string(),
        Some(id) => {
            warn!(template = %id, "unknown policy template, using default");
            policy::DEFAULT_POLICY_ID.to_string()
        }
        None => policy::DEFAULT_POLICY_ID.to_string(),
    }
}

fn generate_pairing_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; PAIRING_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_template_id() {
        assert_eq!(resolve_template_id(Some("auto_sign")), "auto_sign");
        assert_eq!(resolve_template_id(Some("bogus")), policy::DEFAULT_POLICY_ID);
        assert_eq!(resolve_template_id(None), policy::DEFAULT_POLICY_ID);
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_pairing_secret();
        let b = generate_pairing_secret();
        assert_eq!(a.len(), PAIRING_SECRET_LEN * 2);
        assert_ne!(a, b);
        assert!(hex::decode(&a).is_ok());
    }
}
