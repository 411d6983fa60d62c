//! Provider adapter: the façade over the Nostr Connect stack.
//!
//! Each runtime session owns one [`Provider`] bound to the session's
//! relays and user keys. The adapter turns inbound NIP-46 traffic into a
//! single [`ProviderActivity`] variant stream tagged with the owning
//! session, and carries decisions back to the requesting client.
//!
//! Requests that need a decision (pairing, signing) carry a one-shot
//! [`Decider`]; the adapter task suspends on it, sends the encrypted
//! reply with whichever cipher the request used, and reports the outcome
//! as a `SignDecision`. Pure cipher services (`nip04_*`, `nip44_*`,
//! `get_public_key`, `ping`) are answered in place and surfaced as
//! activity only.

use crate::error::{Error, Result};
use crate::logging::{kind_label, short_pubkey, truncate};
use nostr_sdk::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One event from a provider, tagged with its owning session.
#[derive(Debug)]
pub struct ProviderEvent {
    /// Owning session id.
    pub session_id: String,
    /// What happened.
    pub activity: ProviderActivity,
}

/// Normalized provider callback stream.
#[derive(Debug)]
pub enum ProviderActivity {
    /// A client asked to pair. Resolving `true` acknowledges the pairing.
    ConnectRequest {
        /// Peer public key (hex).
        client: String,
        /// Decision handle.
        decider: Decider,
    },
    /// A client asked for a signature.
    SignRequest {
        /// Peer public key (hex).
        client: String,
        /// Parsed draft plus the raw payload.
        draft: SignDraft,
        /// Decision handle.
        decider: Decider,
    },
    /// A signing decision was delivered to the client.
    SignDecision {
        /// Peer public key (hex).
        client: String,
        /// Whether the request was signed.
        approved: bool,
        /// Draft event kind, for the activity record.
        event_kind: u16,
    },
    /// A client completed pairing.
    ClientConnected {
        /// Peer public key (hex).
        client: String,
    },
    /// The relay stream for this session went away.
    ClientDisconnected {
        /// Peer public key (hex).
        client: String,
    },
    /// A NIP-04 cipher operation was served.
    Nip04 {
        /// Peer public key (hex).
        client: String,
        /// Which direction.
        op: CipherOp,
    },
    /// A NIP-44 cipher operation was served.
    Nip44 {
        /// Peer public key (hex).
        client: String,
        /// Which direction.
        op: CipherOp,
    },
}

/// Direction of a served cipher operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherOp {
    /// Plaintext in, ciphertext out.
    Encrypt,
    /// Ciphertext in, plaintext out.
    Decrypt,
}

impl CipherOp {
    /// Lowercase name for summaries.
    pub fn as_str(&self) -> &'static str {
        match self {
            CipherOp::Encrypt => "encrypt",
            CipherOp::Decrypt => "decrypt",
        }
    }
}

/// One-shot decision handle for a suspended request.
#[derive(Debug)]
pub struct Decider {
    tx: oneshot::Sender<bool>,
}

impl Decider {
    /// Create a decider and the receiver the adapter awaits.
    pub fn channel() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Deliver the decision. Dropping a decider counts as a denial.
    pub fn resolve(self, approved: bool) {
        let _ = self.tx.send(approved);
    }
}

/// A parsed signing request draft. `raw` is the payload exactly as the
/// client sent it and is what gets persisted for review.
#[derive(Debug, Clone)]
pub struct SignDraft {
    /// The request payload, byte-for-byte.
    pub raw: String,
    /// Draft event kind.
    pub kind: u16,
    /// Draft event content.
    pub content: String,
    /// Client-chosen creation time, when present.
    pub created_at: Option<u64>,
    /// Draft event tags.
    pub tags: Vec<Vec<String>>,
}

impl SignDraft {
    /// Parse a serialized unsigned event.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| Error::Protocol(format!("malformed sign request: {}", e)))?;

        let kind = value["kind"]
            .as_u64()
            .ok_or_else(|| Error::Protocol("sign request missing kind".into()))?
            as u16;
        let content = value["content"].as_str().unwrap_or_default().to_string();
        let created_at = value["created_at"].as_u64();

        let mut tags = Vec::new();
        if let Some(raw_tags) = value["tags"].as_array() {
            for tag in raw_tags {
                if let Some(parts) = tag.as_array() {
                    let parts: Vec<String> = parts
                        .iter()
                        .filter_map(|p| p.as_str().map(str::to_string))
                        .collect();
                    if !parts.is_empty() {
                        tags.push(parts);
                    }
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            kind,
            content,
            created_at,
            tags,
        })
    }

    /// Short human summary for activity entries and approval rows.
    pub fn summary(&self) -> String {
        if self.content.is_empty() {
            kind_label(self.kind)
        } else {
            format!("{}: {}", kind_label(self.kind), truncate(&self.content, 80))
        }
    }

    fn to_unsigned(&self, pubkey: PublicKey) -> Result<UnsignedEvent> {
        let mut tags = Vec::with_capacity(self.tags.len());
        for parts in &self.tags {
            let tag = Tag::parse(parts.clone())
                .map_err(|e| Error::Protocol(format!("malformed tag: {}", e)))?;
            tags.push(tag);
        }

        let created_at = self
            .created_at
            .map(Timestamp::from)
            .unwrap_or_else(Timestamp::now);

        Ok(UnsignedEvent::new(
            pubkey,
            created_at,
            Kind::from(self.kind),
            tags,
            self.content.clone(),
        ))
    }
}

/// Target parsed from a `nostrconnect://` URI.
#[derive(Debug, Clone, PartialEq)]
pub struct NostrConnectTarget {
    /// Client public key (hex).
    pub client: String,
    /// Relays named by the URI.
    pub relays: Vec<String>,
    /// Pairing secret named by the URI.
    pub secret: Option<String>,
}

/// Parse a `nostrconnect://<client-pubkey>?relay=..&secret=..` URI.
pub fn parse_nostr_connect_uri(uri: &str) -> Result<NostrConnectTarget> {
    let url = Url::parse(uri).map_err(|e| Error::Protocol(format!("invalid uri: {}", e)))?;
    if url.scheme() != "nostrconnect" {
        return Err(Error::Protocol(format!(
            "expected nostrconnect:// uri, got '{}'",
            url.scheme()
        )));
    }

    let client = url
        .host_str()
        .map(str::to_string)
        .or_else(|| {
            let path = url.path().trim_start_matches('/');
            (!path.is_empty()).then(|| path.to_string())
        })
        .ok_or_else(|| Error::Protocol("uri missing client public key".into()))?;

    PublicKey::from_hex(&client)
        .map_err(|e| Error::Protocol(format!("invalid client public key: {}", e)))?;

    let mut relays = Vec::new();
    let mut secret = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "relay" => relays.push(value.into_owned()),
            "secret" => secret = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok(NostrConnectTarget { client, relays, secret })
}

/// Provider construction parameters.
pub struct ProviderConfig {
    /// Owning session id.
    pub session_id: String,
    /// Normalized relay list.
    pub relays: Vec<String>,
    /// Bunker pairing secret, when applicable.
    pub secret: Option<String>,
    /// Where normalized activity is delivered.
    pub events: mpsc::Sender<ProviderEvent>,
}

/// A running Nostr Connect provider for one session.
pub struct Provider {
    session_id: String,
    keys: Keys,
    client: Client,
    relays: Vec<String>,
    secret: Option<String>,
    events: mpsc::Sender<ProviderEvent>,
    client_tx: watch::Sender<Option<String>>,
    client_rx: watch::Receiver<Option<String>>,
    loop_task: TokioMutex<Option<JoinHandle<()>>>,
}

impl Provider {
    /// Build a provider without touching the network. Used as the base of
    /// the start paths and directly by test harnesses.
    pub fn detached(keys: Keys, config: ProviderConfig) -> Arc<Self> {
        let client = Client::new(keys.clone());
        let (client_tx, client_rx) = watch::channel(None);
        Arc::new(Self {
            session_id: config.session_id,
            keys,
            client,
            relays: config.relays,
            secret: config.secret,
            events: config.events,
            client_tx,
            client_rx,
            loop_task: TokioMutex::new(None),
        })
    }

    /// Start a bunker-mode provider: bind to the relays and listen for
    /// clients dialing our advertised URI.
    pub async fn start_bunker(keys: Keys, config: ProviderConfig) -> Result<Arc<Self>> {
        let provider = Self::detached(keys, config);
        provider.bind().await?;
        provider.spawn_loop().await;
        Ok(provider)
    }

    /// Start a nostr-connect-mode provider: dial the client's URI and
    /// complete pairing. Returns the provider and the client public key.
    pub async fn start_nostr_connect(
        keys: Keys,
        config: ProviderConfig,
        uri: &str,
    ) -> Result<(Arc<Self>, String)> {
        let target = parse_nostr_connect_uri(uri)?;
        let provider = Self::detached(keys, config);
        provider.bind().await?;

        // Complete pairing: the signer acknowledges with the URI secret so
        // the client can verify it reached the right signer.
        let client_pk = PublicKey::from_hex(&target.client)
            .map_err(|e| Error::Provider(format!("invalid client public key: {}", e)))?;
        let ack = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "result": target.secret.clone().unwrap_or_else(|| "ack".to_string()),
        });
        provider.send_response(&client_pk, None, ack, true).await?;

        provider.client_tx.send_replace(Some(target.client.clone()));
        provider.spawn_loop().await;
        provider
            .emit(ProviderActivity::ClientConnected { client: target.client.clone() })
            .await;

        Ok((provider, target.client))
    }

    /// The owning session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The bunker URI we advertise.
    pub fn bunker_uri(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for relay in &self.relays {
            query.append_pair("relay", relay);
        }
        if let Some(secret) = &self.secret {
            query.append_pair("secret", secret);
        }
        format!("bunker://{}?{}", self.keys.public_key().to_hex(), query.finish())
    }

    /// Resolve with the peer public key once the first client completes
    /// pairing.
    pub async fn wait_for_client(&self) -> Result<String> {
        let mut rx = self.client_rx.clone();
        loop {
            if let Some(client) = rx.borrow().clone() {
                return Ok(client);
            }
            rx.changed()
                .await
                .map_err(|_| Error::Provider("provider stopped".into()))?;
        }
    }

    /// Rebind a previously paired client without a fresh handshake.
    pub async fn resume_client(&self, client: &str) -> Result<()> {
        PublicKey::from_hex(client)
            .map_err(|e| Error::Provider(format!("invalid client public key: {}", e)))?;
        self.client_tx.send_replace(Some(client.to_string()));
        debug!(session = %self.session_id, client = %short_pubkey(client), "client resumed");
        Ok(())
    }

    /// Stop the provider and drop its relay connections.
    pub async fn stop(&self) {
        if let Some(handle) = self.loop_task.lock().await.take() {
            handle.abort();
        }
        let _ = self.client.disconnect().await;
    }

    async fn bind(&self) -> Result<()> {
        for relay in &self.relays {
            self.client
                .add_relay(relay.clone())
                .await
                .map_err(|e| Error::Provider(format!("failed to add relay '{}': {}", relay, e)))?;
        }
        self.client.connect().await;

        let filter = Filter::new()
            .kind(Kind::NostrConnect)
            .pubkey(self.keys.public_key());
        if let Err(e) = self.client.subscribe(filter, None).await {
            // The pool re-issues subscriptions as relays come up.
            warn!(session = %self.session_id, error = %e, "initial subscribe failed");
        }
        Ok(())
    }

    async fn spawn_loop(self: &Arc<Self>) {
        let provider = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut notifications = provider.client.notifications();
            loop {
                match notifications.recv().await {
                    Ok(RelayPoolNotification::Event { event, .. }) => {
                        if event.kind != Kind::NostrConnect {
                            continue;
                        }
                        let provider = Arc::clone(&provider);
                        tokio::spawn(async move {
                            if let Err(e) = provider.handle_request(event).await {
                                warn!(
                                    session = %provider.session_id,
                                    error = %e,
                                    "failed to handle request"
                                );
                            }
                        });
                    }
                    Ok(RelayPoolNotification::Shutdown) => break,
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session = %provider.session_id, skipped, "notification stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            let known = provider.client_rx.borrow().clone();
            if let Some(client) = known {
                provider
                    .emit(ProviderActivity::ClientDisconnected { client })
                    .await;
            }
        });

        *self.loop_task.lock().await = Some(handle);
    }

    async fn handle_request(&self, event: Box<Event>) -> Result<()> {
        let peer = event.pubkey;
        let peer_hex = peer.to_hex();
        let secret_key = self.keys.secret_key();

        // NIP-44 first, NIP-04 for older clients; replies mirror the
        // cipher the request used.
        let (plaintext, use_nip44) = match nip44::decrypt(secret_key, &peer, &event.content) {
            Ok(text) => (text, true),
            Err(_) => match nip04::decrypt(secret_key, &peer, &event.content) {
                Ok(text) => (text, false),
                Err(e) => {
                    return Err(Error::Provider(format!("failed to decrypt request: {}", e)));
                }
            },
        };

        let request: serde_json::Value = serde_json::from_str(&plaintext)
            .map_err(|e| Error::Protocol(format!("malformed request: {}", e)))?;
        let request_id = request["id"].clone();
        let method = request["method"]
            .as_str()
            .ok_or_else(|| Error::Protocol("request missing method".into()))?
            .to_string();

        debug!(session = %self.session_id, client = %short_pubkey(&peer_hex), method = %method, "request");

        let response = match method.as_str() {
            "connect" => self.handle_connect(&peer_hex, &request, request_id).await?,
            "sign_event" => {
                return self
                    .handle_sign_event(&peer, &peer_hex, &event, &request, request_id, use_nip44)
                    .await;
            }
            "get_public_key" => {
                json!({ "id": request_id, "result": self.keys.public_key().to_hex() })
            }
            "ping" => json!({ "id": request_id, "result": "pong" }),
            "nip04_encrypt" | "nip04_decrypt" | "nip44_encrypt" | "nip44_decrypt" => {
                self.handle_cipher(&peer_hex, &method, &request, request_id).await?
            }
            other => {
                warn!(session = %self.session_id, method = %other, "unsupported method");
                json!({ "id": request_id, "error": format!("unsupported method: {}", other) })
            }
        };

        self.send_response(&peer, Some(event.id), response, use_nip44).await
    }

    async fn handle_connect(
        &self,
        peer_hex: &str,
        request: &serde_json::Value,
        request_id: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if let Some(expected) = &self.secret {
            let provided = request["params"][1].as_str().unwrap_or_default();
            if provided != expected {
                warn!(session = %self.session_id, client = %short_pubkey(peer_hex), "invalid pairing secret");
                return Ok(json!({ "id": request_id, "error": "invalid secret" }));
            }
        }

        let (decider, decision) = Decider::channel();
        self.emit(ProviderActivity::ConnectRequest {
            client: peer_hex.to_string(),
            decider,
        })
        .await;

        if !decision.await.unwrap_or(false) {
            return Ok(json!({ "id": request_id, "error": "connection rejected" }));
        }

        self.client_tx.send_replace(Some(peer_hex.to_string()));
        self.emit(ProviderActivity::ClientConnected { client: peer_hex.to_string() })
            .await;

        Ok(json!({ "id": request_id, "result": "ack" }))
    }

    async fn handle_sign_event(
        &self,
        peer: &PublicKey,
        peer_hex: &str,
        event: &Event,
        request: &serde_json::Value,
        request_id: serde_json::Value,
        use_nip44: bool,
    ) -> Result<()> {
        let raw = request["params"][0]
            .as_str()
            .ok_or_else(|| Error::Protocol("sign request missing event".into()))?;
        let draft = SignDraft::parse(raw)?;
        let event_kind = draft.kind;

        let (decider, decision) = Decider::channel();
        self.emit(ProviderActivity::SignRequest {
            client: peer_hex.to_string(),
            draft: draft.clone(),
            decider,
        })
        .await;

        // A dropped decider (session stopped mid-flight) is a denial.
        let approved = decision.await.unwrap_or(false);

        let response = if approved {
            let unsigned = draft.to_unsigned(self.keys.public_key())?;
            let signed = unsigned
                .sign(&self.keys)
                .await
                .map_err(|e| Error::Provider(format!("signing failed: {}", e)))?;
            let signed_json = serde_json::to_string(&signed)
                .map_err(|e| Error::Provider(format!("failed to serialize event: {}", e)))?;
            json!({ "id": request_id, "result": signed_json })
        } else {
            json!({ "id": request_id, "error": "request rejected" })
        };

        self.send_response(peer, Some(event.id), response, use_nip44).await?;

        self.emit(ProviderActivity::SignDecision {
            client: peer_hex.to_string(),
            approved,
            event_kind,
        })
        .await;

        Ok(())
    }

    async fn handle_cipher(
        &self,
        peer_hex: &str,
        method: &str,
        request: &serde_json::Value,
        request_id: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let third_party = request["params"][0]
            .as_str()
            .ok_or_else(|| Error::Protocol("cipher request missing public key".into()))?;
        let payload = request["params"][1]
            .as_str()
            .ok_or_else(|| Error::Protocol("cipher request missing payload".into()))?;

        let third_party = PublicKey::from_hex(third_party)
            .map_err(|e| Error::Protocol(format!("invalid public key: {}", e)))?;
        let secret_key = self.keys.secret_key();

        let (result, activity) = match method {
            "nip04_encrypt" => (
                nip04::encrypt(secret_key, &third_party, payload)
                    .map_err(|e| Error::Provider(format!("nip04 encrypt failed: {}", e)))?,
                ProviderActivity::Nip04 { client: peer_hex.to_string(), op: CipherOp::Encrypt },
            ),
            "nip04_decrypt" => (
                nip04::decrypt(secret_key, &third_party, payload)
                    .map_err(|e| Error::Provider(format!("nip04 decrypt failed: {}", e)))?,
                ProviderActivity::Nip04 { client: peer_hex.to_string(), op: CipherOp::Decrypt },
            ),
            "nip44_encrypt" => (
                nip44::encrypt(secret_key, &third_party, payload, nip44::Version::V2)
                    .map_err(|e| Error::Provider(format!("nip44 encrypt failed: {}", e)))?,
                ProviderActivity::Nip44 { client: peer_hex.to_string(), op: CipherOp::Encrypt },
            ),
            "nip44_decrypt" => (
                nip44::decrypt(secret_key, &third_party, payload)
                    .map_err(|e| Error::Provider(format!("nip44 decrypt failed: {}", e)))?,
                ProviderActivity::Nip44 { client: peer_hex.to_string(), op: CipherOp::Decrypt },
            ),
            other => return Err(Error::Protocol(format!("unsupported cipher method '{}'", other))),
        };

        self.emit(activity).await;
        Ok(json!({ "id": request_id, "result": result }))
    }

    async fn send_response(
        &self,
        peer: &PublicKey,
        request_event_id: Option<EventId>,
        payload: serde_json::Value,
        use_nip44: bool,
    ) -> Result<()> {
        let text = payload.to_string();
        let content = if use_nip44 {
            nip44::encrypt(self.keys.secret_key(), peer, &text, nip44::Version::V2)
                .map_err(|e| Error::Provider(format!("failed to encrypt response: {}", e)))?
        } else {
            nip04::encrypt(self.keys.secret_key(), peer, &text)
                .map_err(|e| Error::Provider(format!("failed to encrypt response: {}", e)))?
        };

        let mut tags = vec![Tag::public_key(*peer)];
        if let Some(id) = request_event_id {
            let tag = Tag::parse(vec!["e".to_string(), id.to_hex()])
                .map_err(|e| Error::Provider(format!("failed to build tag: {}", e)))?;
            tags.push(tag);
        }

        let response = EventBuilder::new(Kind::NostrConnect, content)
            .tags(tags)
            .sign(&self.keys)
            .await
            .map_err(|e| Error::Provider(format!("failed to sign response: {}", e)))?;

        self.client
            .send_event(response)
            .await
            .map_err(|e| Error::Provider(format!("failed to publish response: {}", e)))?;
        Ok(())
    }

    async fn emit(&self, activity: ProviderActivity) {
        let event = ProviderEvent {
            session_id: self.session_id.clone(),
            activity,
        };
        if self.events.send(event).await.is_err() {
            debug!(session = %self.session_id, "event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nostr_connect_uri() {
        let keys = Keys::generate();
        let pk = keys.public_key().to_hex();
        let uri = format!(
            "nostrconnect://{}?relay=wss%3A%2F%2Frelay.damus.io&relay=wss%3A%2F%2Fnos.lol&secret=abc123",
            pk
        );

        let target = parse_nostr_connect_uri(&uri).expect("parse");
        assert_eq!(target.client, pk);
        assert_eq!(target.relays, vec!["wss://relay.damus.io", "wss://nos.lol"]);
        assert_eq!(target.secret.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_rejects_bad_uris() {
        assert!(parse_nostr_connect_uri("bunker://deadbeef").is_err());
        assert!(parse_nostr_connect_uri("nostrconnect://not-a-pubkey").is_err());
        assert!(parse_nostr_connect_uri("definitely not a uri").is_err());
    }

    #[test]
    fn test_bunker_uri_shape() {
        let keys = Keys::generate();
        let (events, _rx) = mpsc::channel(8);
        let provider = Provider::detached(
            keys.clone(),
            ProviderConfig {
                session_id: "s1".into(),
                relays: vec!["wss://relay.damus.io".into()],
                secret: Some("pair-secret".into()),
                events,
            },
        );

        let uri = provider.bunker_uri();
        assert!(uri.starts_with(&format!("bunker://{}?", keys.public_key().to_hex())));
        assert!(uri.contains("relay=wss%3A%2F%2Frelay.damus.io"));
        assert!(uri.contains("secret=pair-secret"));
    }

    #[test]
    fn test_sign_draft_parse_keeps_raw() {
        let raw = r#"{"kind":1,"content":"hi","created_at":1700000000,"tags":[["t","nostr"]]}"#;
        let draft = SignDraft::parse(raw).expect("parse");

        assert_eq!(draft.raw, raw);
        assert_eq!(draft.kind, 1);
        assert_eq!(draft.content, "hi");
        assert_eq!(draft.created_at, Some(1_700_000_000));
        assert_eq!(draft.tags, vec![vec!["t".to_string(), "nostr".to_string()]]);
        assert_eq!(draft.summary(), "note: hi");
    }

    #[test]
    fn test_sign_draft_requires_kind() {
        assert!(SignDraft::parse(r#"{"content":"hi"}"#).is_err());
        assert!(SignDraft::parse("not json").is_err());
    }

    #[tokio::test]
    async fn test_decider_resolution() {
        let (decider, rx) = Decider::channel();
        decider.resolve(true);
        assert!(rx.await.unwrap_or(false));

        // Dropping the decider reads as a denial.
        let (decider, rx) = Decider::channel();
        drop(decider);
        assert!(!rx.await.unwrap_or(false));
    }

    #[tokio::test]
    async fn test_resume_client_sets_waiter() {
        let keys = Keys::generate();
        let (events, _rx) = mpsc::channel(8);
        let provider = Provider::detached(
            keys,
            ProviderConfig {
                session_id: "s1".into(),
                relays: vec!["wss://relay.damus.io".into()],
                secret: None,
                events,
            },
        );

        let client = Keys::generate().public_key().to_hex();
        provider.resume_client(&client).await.expect("resume");
        assert_eq!(provider.wait_for_client().await.expect("wait"), client);

        assert!(provider.resume_client("junk").await.is_err());
    }
}
