//! Daemon assembly.
//!
//! Wires the singletons together — vault, metadata store, session store,
//! policy registry, activity log, approval manager, session manager,
//! control server — restores state from the previous run, and serves the
//! control plane until shutdown.

use crate::activity::ActivityLog;
use crate::approval::ApprovalManager;
use crate::config::Config;
use crate::control::{self, ControlServer, Request, Response};
use crate::error::Result;
use crate::keystore::MetadataStore;
use crate::notify::Notifier;
use crate::session::{SessionManager, StartBunker, StartNostrConnect};
use crate::store::{SessionStore, StoreConfig};
use crate::vault::Vault;
use std::sync::Arc;
use tokio::sync::{watch, Mutex as TokioMutex};
use tracing::info;

/// The long-lived daemon: owner of every singleton.
pub struct Daemon {
    config: Config,
    activity: Arc<ActivityLog>,
    approvals: Arc<ApprovalManager>,
    sessions: Arc<SessionManager>,
    shutdown_tx: watch::Sender<bool>,
}

impl Daemon {
    /// Open every store, restore state from the previous run, and spawn
    /// the provider event loop.
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>> {
        config.ensure_dir()?;

        let store = Arc::new(TokioMutex::new(SessionStore::open(&StoreConfig::at(
            config.db_path(),
        ))?));
        let metadata = Arc::new(MetadataStore::open(&config)?);
        let vault = Arc::new(Vault::open(&config)?);
        let activity = Arc::new(ActivityLog::new());
        let notifier = Arc::new(Notifier::from_env());
        let approvals = Arc::new(ApprovalManager::new(Arc::clone(&store), notifier));

        let (sessions, events_rx) = SessionManager::new(
            Arc::clone(&store),
            metadata,
            vault,
            Arc::clone(&approvals),
            Arc::clone(&activity),
            config.approval_ttl(),
        );
        tokio::spawn(Arc::clone(&sessions).run_event_loop(events_rx));

        approvals.restore_timers_on_boot().await?;
        sessions.restore_on_boot().await?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            activity,
            approvals,
            sessions,
            shutdown_tx,
        }))
    }

    /// Run the daemon to completion: bind the control socket (failing
    /// fast when another instance owns it), bootstrap, serve, and drain.
    pub async fn run(config: Config) -> Result<()> {
        config.ensure_dir()?;
        let server = ControlServer::bind(&config.socket_path()).await?;

        let daemon = Self::bootstrap(config).await?;
        info!(
            version = crate::VERSION,
            socket = %daemon.config.socket_path().display(),
            "daemon ready"
        );

        server
            .serve(Arc::clone(&daemon), daemon.shutdown_tx.subscribe())
            .await;

        // Graceful drain: providers stop, records stay active so the
        // next boot resumes every session.
        daemon.sessions.shutdown_all().await;
        info!("daemon stopped");
        Ok(())
    }

    /// Signal the serve loop to wind down.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The approval manager.
    pub fn approvals(&self) -> &Arc<ApprovalManager> {
        &self.approvals
    }

    /// Dispatch one control-plane request.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::ok(),
            Request::ListSessions => match self.sessions.list(false).await {
                Ok(sessions) => Response {
                    sessions: Some(sessions),
                    ..Response::ok()
                },
                Err(e) => Response::err(e.to_string()),
            },
            Request::ListActivity => Response {
                activity: Some(self.activity.list()),
                ..Response::ok()
            },
            Request::ListApprovals => match self.approvals.list_pending().await {
                Ok(approvals) => Response {
                    approvals: Some(approvals),
                    ..Response::ok()
                },
                Err(e) => Response::err(e.to_string()),
            },
            Request::ResolveApproval { id, decision, approved } => {
                match control::resolve_decision(decision, approved) {
                    Ok(flag) => Response::from_result(self.approvals.resolve(&id, flag).await),
                    Err(e) => Response::err(e.to_string()),
                }
            }
            Request::StopSession { session_id } => {
                Response::from_result(self.sessions.stop(&session_id, false).await)
            }
            Request::DeleteSession { session_id } => {
                Response::from_result(self.sessions.stop(&session_id, true).await)
            }
            Request::RenameSession { session_id, alias } => {
                Response::from_result(self.sessions.rename(&session_id, &alias).await)
            }
            Request::UpdateSessionTemplate { session_id, template } => {
                Response::from_result(self.sessions.update_template(&session_id, &template).await)
            }
            Request::StartBunker { key_id, alias, relays, secret, auto_approve, template } => {
                let params = StartBunker { key_id, alias, relays, secret, auto_approve, template };
                match self.sessions.start_bunker(params).await {
                    Ok((session_id, bunker_uri)) => Response {
                        session_id: Some(session_id),
                        bunker_uri: Some(bunker_uri),
                        ..Response::ok()
                    },
                    Err(e) => Response::err(e.to_string()),
                }
            }
            Request::StartNostrConnect { key_id, alias, relays, uri, auto_approve, template } => {
                let params = StartNostrConnect { key_id, alias, relays, uri, auto_approve, template };
                match self.sessions.start_nostr_connect(params).await {
                    Ok(session_id) => Response {
                        session_id: Some(session_id),
                        ..Response::ok()
                    },
                    Err(e) => Response::err(e.to_string()),
                }
            }
            Request::Shutdown => {
                info!("shutdown requested");
                self.trigger_shutdown();
                Response::ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_and_ping() {
        let dir = tempfile::tempdir().expect("tempdir");
        let daemon = Daemon::bootstrap(Config::new(dir.path())).await.expect("bootstrap");

        let response = daemon.handle_request(Request::Ping).await;
        assert!(response.ok);

        let response = daemon.handle_request(Request::ListSessions).await;
        assert!(response.ok);
        assert_eq!(response.sessions.expect("sessions").len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let daemon = Daemon::bootstrap(Config::new(dir.path())).await.expect("bootstrap");

        let response = daemon
            .handle_request(Request::StopSession { session_id: "ghost".into() })
            .await;
        assert!(!response.ok);
        assert!(response.error.expect("error").contains("not found"));
    }

    #[tokio::test]
    async fn test_resolve_approval_requires_decision() {
        let dir = tempfile::tempdir().expect("tempdir");
        let daemon = Daemon::bootstrap(Config::new(dir.path())).await.expect("bootstrap");

        let response = daemon
            .handle_request(Request::ResolveApproval {
                id: "t1".into(),
                decision: None,
                approved: None,
            })
            .await;
        assert!(!response.ok);
    }
}
