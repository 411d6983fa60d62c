//! Local control plane.
//!
//! A Unix-domain socket at `<config_dir>/intercessio.sock`. Each
//! connection carries exactly one newline-terminated JSON request and
//! receives one newline-terminated JSON response. There is no
//! authentication beyond filesystem permissions; the socket is the only
//! way other processes reach the daemon's state.
//!
//! Startup is single-instance: if connecting to an existing socket
//! succeeds, another daemon owns it; if the connection is refused, the
//! socket file is stale and gets unlinked before binding.

use crate::activity::ActivityEntry;
use crate::approval::ApprovalTask;
use crate::error::{Error, Result};
use crate::session::record::SessionRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, warn};

/// A control-plane request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    /// Liveness check.
    Ping,
    /// List all session records.
    ListSessions,
    /// Snapshot of recent activity.
    ListActivity,
    /// Pending approval tasks.
    ListApprovals,
    /// Decide a pending approval.
    #[serde(rename_all = "camelCase")]
    ResolveApproval {
        /// Task id. `approvalId` is accepted as an alias.
        #[serde(alias = "approvalId")]
        id: String,
        /// Canonical decision word.
        #[serde(default)]
        decision: Option<ApprovalDecision>,
        /// Legacy boolean form.
        #[serde(default)]
        approved: Option<bool>,
    },
    /// Stop a session, keeping its record.
    #[serde(rename_all = "camelCase")]
    StopSession {
        /// Session id.
        session_id: String,
    },
    /// Stop a session and delete its record.
    #[serde(rename_all = "camelCase")]
    DeleteSession {
        /// Session id.
        session_id: String,
    },
    /// Change a session's alias.
    #[serde(rename_all = "camelCase")]
    RenameSession {
        /// Session id.
        session_id: String,
        /// New alias.
        alias: String,
    },
    /// Select a different policy template.
    #[serde(rename_all = "camelCase")]
    UpdateSessionTemplate {
        /// Session id.
        session_id: String,
        /// Policy template id.
        template: String,
    },
    /// Start a bunker session.
    #[serde(rename_all = "camelCase")]
    StartBunker {
        /// Key to sign with.
        key_id: String,
        /// Display alias.
        #[serde(default)]
        alias: String,
        /// Relay URLs.
        relays: Vec<String>,
        /// Pairing secret; generated when absent.
        #[serde(default)]
        secret: Option<String>,
        /// Bypass the policy for sign requests.
        #[serde(default)]
        auto_approve: bool,
        /// Policy template id.
        #[serde(default)]
        template: Option<String>,
    },
    /// Start a nostr-connect session.
    #[serde(rename_all = "camelCase")]
    StartNostrConnect {
        /// Key to sign with.
        key_id: String,
        /// Display alias.
        #[serde(default)]
        alias: String,
        /// Relay URLs in addition to the URI's.
        #[serde(default)]
        relays: Vec<String>,
        /// The client's `nostrconnect://` URI.
        uri: String,
        /// Bypass the policy for sign requests.
        #[serde(default)]
        auto_approve: bool,
        /// Policy template id.
        #[serde(default)]
        template: Option<String>,
    },
    /// Gracefully shut the daemon down.
    Shutdown,
}

/// Decision word for `resolve-approval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalDecision {
    /// Sign the suspended request.
    Approve,
    /// Refuse the suspended request.
    Reject,
}

/// Extract the boolean decision from a `resolve-approval` request. The
/// canonical `decision` word wins; the legacy `approved` boolean is
/// accepted as an alias.
pub fn resolve_decision(decision: Option<ApprovalDecision>, approved: Option<bool>) -> Result<bool> {
    match (decision, approved) {
        (Some(ApprovalDecision::Approve), _) => Ok(true),
        (Some(ApprovalDecision::Reject), _) => Ok(false),
        (None, Some(flag)) => Ok(flag),
        (None, None) => Err(Error::Protocol("missing decision".into())),
    }
}

/// A control-plane response.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Response {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Error message when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bunker URI, on `start-bunker`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bunker_uri: Option<String>,
    /// New session id, on the start requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Session records, on `list-sessions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionRecord>>,
    /// Activity entries, on `list-activity`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Vec<ActivityEntry>>,
    /// Approval tasks, on `list-approvals`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approvals: Option<Vec<ApprovalTask>>,
}

impl Response {
    /// A bare success.
    pub fn ok() -> Self {
        Self { ok: true, ..Self::default() }
    }

    /// A failure with a message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Success from an operation result, flattening the error message.
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

/// The bound control socket.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlServer {
    /// Bind the control socket, enforcing the single-instance guarantee.
    pub async fn bind(path: &Path) -> Result<Self> {
        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => return Err(Error::AlreadyRunning),
                Err(_) => {
                    debug!(path = %path.display(), "removing stale control socket");
                    std::fs::remove_file(path).map_err(|e| {
                        Error::Protocol(format!("failed to remove stale socket: {}", e))
                    })?;
                }
            }
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| Error::Protocol(format!("failed to bind control socket: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path, perms) {
                warn!(error = %e, "failed to restrict socket permissions");
            }
        }

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    /// Accept connections until shutdown is signalled, then unlink the
    /// socket file.
    pub async fn serve(
        self,
        daemon: std::sync::Arc<crate::daemon::Daemon>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let daemon = std::sync::Arc::clone(&daemon);
                        tokio::spawn(async move {
                            handle_connection(stream, daemon).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(self.listener);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to unlink control socket");
            }
        }
        debug!("control socket closed");
    }
}

async fn handle_connection(stream: UnixStream, daemon: std::sync::Arc<crate::daemon::Daemon>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    match reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            debug!(error = %e, "failed to read request");
            return;
        }
    }

    let response = match serde_json::from_str::<Request>(line.trim()) {
        Ok(request) => daemon.handle_request(request).await,
        Err(e) if e.to_string().contains("unknown variant") => Response::err("Unknown request"),
        Err(e) => Response::err(format!("{}", e)),
    };

    let mut payload = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"ok":false,"error":"serialization failed"}"#.to_string());
    payload.push('\n');
    if let Err(e) = write_half.write_all(payload.as_bytes()).await {
        debug!(error = %e, "failed to write response");
    }
}

/// Send one request to a running daemon and read its response. Used by
/// the command-line client.
pub async fn send_request(path: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(path)
        .await
        .map_err(|e| Error::Protocol(format!("daemon not reachable: {}", e)))?;

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| Error::Protocol(format!("failed to send request: {}", e)))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| Error::Protocol(format!("failed to read response: {}", e)))?;

    serde_json::from_str(line.trim())
        .map_err(|e| Error::Protocol(format!("malformed response: {}", e)))
}
