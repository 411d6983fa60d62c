//! Command implementations.
//!
//! Key management operates directly on the metadata store and secret
//! vault; everything else talks to a running daemon over the control
//! socket.

use anyhow::{bail, Context, Result};
use intercessio_core::config::Config;
use intercessio_core::control::{self, ApprovalDecision, Request, Response};
use intercessio_core::daemon::Daemon;
use intercessio_core::error::Error;
use intercessio_core::keystore::{KeyMetadata, MetadataStore};
use intercessio_core::vault::Vault;
use intercessio_core::{logging, policy};
use nostr::prelude::*;
use rand::RngCore;

// ---------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------

/// Run the daemon until shutdown. Exits 0 when another instance already
/// owns the socket; any other startup failure exits 1.
pub async fn start_daemon(dir: &str) -> Result<()> {
    match Daemon::run(Config::new(dir)).await {
        Ok(()) => Ok(()),
        Err(Error::AlreadyRunning) => {
            println!("Another daemon already owns the control socket; nothing to do.");
            Ok(())
        }
        Err(e) => {
            eprintln!("Fatal: {}", e);
            std::process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------

/// Generate a key, store its secret in the vault, and register metadata.
pub fn key_generate(dir: &str, label: &str) -> Result<()> {
    let keys = Keys::generate();
    register_key(dir, keys, label)
}

/// Import a key given as hex or bech32 `nsec`.
pub fn key_import(dir: &str, secret: &str, label: &str) -> Result<()> {
    let secret = secret.trim();
    let secret_key = if let Ok(bytes) = hex::decode(secret) {
        SecretKey::from_slice(&bytes).context("invalid hex secret key")?
    } else {
        SecretKey::from_bech32(secret).context("secret key must be hex or nsec")?
    };
    register_key(dir, Keys::new(secret_key), label)
}

fn register_key(dir: &str, keys: Keys, label: &str) -> Result<()> {
    let config = Config::new(dir);
    let store = MetadataStore::open(&config)?;
    let vault = Vault::open(&config)?;

    let mut id_bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut id_bytes);
    let id = hex::encode(id_bytes);
    let vault_account = format!("key-{}", id);

    let storage_kind = vault.put(&vault_account, &keys.secret_key().to_secret_hex())?;
    let npub = keys.public_key().to_bech32().context("failed to encode npub")?;

    store.add_key(KeyMetadata {
        id: id.clone(),
        label: if label.is_empty() { format!("key {}", id) } else { label.to_string() },
        npub: npub.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
        vault_account,
        storage_kind,
    })?;

    // First key becomes the active one.
    if store.active_key()?.is_none() {
        store.set_active(Some(id.clone()))?;
    }

    println!("Key {} registered", id);
    println!("  npub:    {}", npub);
    println!("  storage: {}", storage_kind.as_str());
    Ok(())
}

/// Print the key list.
pub fn key_list(dir: &str) -> Result<()> {
    let config = Config::new(dir);
    let store = MetadataStore::open(&config)?;
    let active = store.active_key()?;

    let keys = store.list_keys()?;
    if keys.is_empty() {
        println!("No keys. Create one with: intercessio key generate");
        return Ok(());
    }

    for key in keys {
        let marker = if active.as_deref() == Some(&key.id) { "*" } else { " " };
        println!("{} {}  {}  {}  [{}]", marker, key.id, key.label, key.npub, key.storage_kind.as_str());
    }
    Ok(())
}

/// Point new sessions at a key.
pub fn key_use(dir: &str, id: &str) -> Result<()> {
    let store = MetadataStore::open(&Config::new(dir))?;
    store.set_active(Some(id.to_string()))?;
    println!("Key {} is now active", id);
    Ok(())
}

/// Delete a key's metadata and vault entry.
pub fn key_delete(dir: &str, id: &str, confirm: bool) -> Result<()> {
    if !confirm {
        bail!("deleting a key is irreversible; pass --confirm to proceed");
    }

    let config = Config::new(dir);
    let store = MetadataStore::open(&config)?;
    let vault = Vault::open(&config)?;

    match store.remove_key(id)? {
        Some(removed) => {
            vault.delete(&removed.vault_account)?;
            println!("Key {} deleted", id);
            Ok(())
        }
        None => bail!("no key with id '{}'", id),
    }
}

fn active_or(dir: &str, key: Option<String>) -> Result<String> {
    if let Some(key) = key {
        return Ok(key);
    }
    let store = MetadataStore::open(&Config::new(dir))?;
    store
        .active_key()?
        .context("no active key; create one with 'intercessio key generate'")
}

// ---------------------------------------------------------------------
// Control-plane client
// ---------------------------------------------------------------------

async fn send(dir: &str, request: Request) -> Result<Response> {
    let config = Config::new(dir);
    let response = control::send_request(&config.socket_path(), &request)
        .await
        .context("is the daemon running? start it with 'intercessio start'")?;
    if !response.ok {
        bail!("{}", response.error.unwrap_or_else(|| "request failed".to_string()));
    }
    Ok(response)
}

/// Liveness check.
pub async fn ping(dir: &str) -> Result<()> {
    send(dir, Request::Ping).await?;
    println!("Daemon is running.");
    Ok(())
}

/// Graceful shutdown.
pub async fn shutdown(dir: &str) -> Result<()> {
    send(dir, Request::Shutdown).await?;
    println!("Shutdown requested.");
    Ok(())
}

/// Print all sessions.
pub async fn list_sessions(dir: &str) -> Result<()> {
    let response = send(dir, Request::ListSessions).await?;
    let sessions = response.sessions.unwrap_or_default();
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    for s in sessions {
        let state = if s.active { "active" } else { "stopped" };
        let client = s
            .last_client
            .as_deref()
            .map(logging::short_pubkey)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<13} {:<9} {:<9} client={} policy={} \"{}\"",
            s.id,
            s.kind.as_str(),
            state,
            s.status.as_str(),
            client,
            s.template,
            s.alias
        );
    }
    Ok(())
}

/// Print recent activity, newest first.
pub async fn list_activity(dir: &str) -> Result<()> {
    let response = send(dir, Request::ListActivity).await?;
    let entries = response.activity.unwrap_or_default();
    if entries.is_empty() {
        println!("No activity yet.");
        return Ok(());
    }

    for entry in entries {
        let when = chrono::DateTime::from_timestamp_millis(entry.timestamp)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        let label = entry.session_label.unwrap_or_default();
        println!("{}  [{}] {}", when, label, entry.summary);
    }
    Ok(())
}

/// Print pending approvals.
pub async fn list_approvals(dir: &str) -> Result<()> {
    let response = send(dir, Request::ListApprovals).await?;
    let approvals = response.approvals.unwrap_or_default();
    if approvals.is_empty() {
        println!("No pending approvals.");
        return Ok(());
    }

    for task in approvals {
        let expires = chrono::DateTime::from_timestamp_millis(task.expires_at)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{}  [{}] {} from {} ({}) expires {}",
            task.id,
            task.session_alias,
            task.event_summary,
            logging::short_pubkey(&task.client),
            task.policy_label,
            expires
        );
    }
    Ok(())
}

/// Decide a pending approval.
pub async fn resolve_approval(dir: &str, id: &str, approve: bool) -> Result<()> {
    let decision = if approve { ApprovalDecision::Approve } else { ApprovalDecision::Reject };
    send(
        dir,
        Request::ResolveApproval {
            id: id.to_string(),
            decision: Some(decision),
            approved: None,
        },
    )
    .await?;
    println!("Request {}.", if approve { "approved" } else { "rejected" });
    Ok(())
}

/// Start a bunker session and print the pairing URI.
pub async fn start_bunker(
    dir: &str,
    key: Option<String>,
    alias: &str,
    relays: Vec<String>,
    auto_approve: bool,
    template: Option<String>,
) -> Result<()> {
    let key_id = active_or(dir, key)?;
    let response = send(
        dir,
        Request::StartBunker {
            key_id,
            alias: alias.to_string(),
            relays,
            secret: None,
            auto_approve,
            template,
        },
    )
    .await?;

    println!("Session {} started.", response.session_id.unwrap_or_default());
    println!("Pairing URI (paste into the client):");
    println!("  {}", response.bunker_uri.unwrap_or_default());
    Ok(())
}

/// Pair with a client's nostrconnect:// URI.
pub async fn start_nostr_connect(
    dir: &str,
    key: Option<String>,
    alias: &str,
    relays: Vec<String>,
    uri: &str,
    auto_approve: bool,
    template: Option<String>,
) -> Result<()> {
    let key_id = active_or(dir, key)?;
    let response = send(
        dir,
        Request::StartNostrConnect {
            key_id,
            alias: alias.to_string(),
            relays,
            uri: uri.to_string(),
            auto_approve,
            template,
        },
    )
    .await?;

    println!("Session {} connected.", response.session_id.unwrap_or_default());
    Ok(())
}

/// Stop (or delete) a session.
pub async fn stop_session(dir: &str, id: &str, remove: bool) -> Result<()> {
    let request = if remove {
        Request::DeleteSession { session_id: id.to_string() }
    } else {
        Request::StopSession { session_id: id.to_string() }
    };
    send(dir, request).await?;
    println!("Session {}.", if remove { "deleted" } else { "stopped" });
    Ok(())
}

/// Rename a session.
pub async fn rename_session(dir: &str, id: &str, alias: &str) -> Result<()> {
    send(
        dir,
        Request::RenameSession { session_id: id.to_string(), alias: alias.to_string() },
    )
    .await?;
    println!("Session renamed.");
    Ok(())
}

/// Change a session's policy template.
pub async fn update_template(dir: &str, id: &str, template: &str) -> Result<()> {
    send(
        dir,
        Request::UpdateSessionTemplate {
            session_id: id.to_string(),
            template: template.to_string(),
        },
    )
    .await?;
    println!("Policy updated.");
    Ok(())
}

/// Print the policy catalog.
pub fn list_policies() {
    for p in policy::all() {
        let marker = if p.id == policy::DEFAULT_POLICY_ID { "*" } else { " " };
        println!("{} {:<20} {}  - {}", marker, p.id, p.label, p.description);
    }
}
