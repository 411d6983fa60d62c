//! Durable queue of referred signing requests awaiting a human decision.
//!
//! A REFER turns a provider callback into a suspended response: the
//! signing pipeline awaits a [`DecisionFuture`] while the task row sits
//! in the store. Resolution is at-most-once per waiter. Explicit approval
//! is the only path to `true`; expiry and session shutdown both resolve
//! to `false`. Rows already past their deadline at boot are expired
//! immediately; the rest get an orphan timer honoring the original
//! deadline.

use crate::config::now_ms;
use crate::error::{Error, Result};
use crate::logging::short_pubkey;
use crate::notify::Notifier;
use crate::provider::SignDraft;
use crate::session::record::SessionType;
use crate::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle of an approval task. Every transition out of `pending` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by the operator.
    Approved,
    /// Rejected by the operator or by session shutdown.
    Rejected,
    /// Timed out.
    Expired,
}

impl TaskStatus {
    /// Stable string form, used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Expired => "expired",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "approved" => Ok(TaskStatus::Approved),
            "rejected" => Ok(TaskStatus::Rejected),
            "expired" => Ok(TaskStatus::Expired),
            other => Err(Error::Protocol(format!("unknown task status '{}'", other))),
        }
    }
}

/// Durable record of one suspended REFER.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTask {
    /// Task id (UUID).
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Session alias at creation time.
    pub session_alias: String,
    /// Session pairing mode.
    pub session_type: SessionType,
    /// Requesting peer public key.
    pub client: String,
    /// Draft event kind.
    pub event_kind: u16,
    /// Short human summary of the draft.
    pub event_summary: String,
    /// Policy that referred the request.
    pub policy_id: String,
    /// Policy label at creation time (template swaps don't rewrite it).
    pub policy_label: String,
    /// Serialized signing-request payload, byte-for-byte.
    pub draft: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Deadline, epoch milliseconds. Always after `created_at`.
    pub expires_at: i64,
    /// Current lifecycle state.
    pub status: TaskStatus,
}

/// Everything needed to open a new approval task.
#[derive(Debug, Clone)]
pub struct NewApproval {
    /// Owning session.
    pub session_id: String,
    /// Session alias.
    pub session_alias: String,
    /// Session pairing mode.
    pub session_type: SessionType,
    /// Requesting peer public key.
    pub client: String,
    /// The draft under review.
    pub draft: SignDraft,
    /// Referring policy id.
    pub policy_id: String,
    /// Referring policy label.
    pub policy_label: String,
}

/// The suspension handle the signing pipeline awaits.
pub struct DecisionFuture {
    rx: oneshot::Receiver<bool>,
}

impl DecisionFuture {
    /// Await the decision. A dropped resolver reads as a denial.
    pub async fn wait(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

struct PendingEntry {
    /// Absent for orphan rows restored after a restart.
    tx: Option<oneshot::Sender<bool>>,
    timer: JoinHandle<()>,
}

type PendingMap = Arc<TokioMutex<HashMap<String, PendingEntry>>>;

/// Owner of pending-task resolvers and their timers.
pub struct ApprovalManager {
    store: Arc<TokioMutex<SessionStore>>,
    notifier: Arc<Notifier>,
    pending: PendingMap,
}

impl ApprovalManager {
    /// Create a manager over the given store.
    pub fn new(store: Arc<TokioMutex<SessionStore>>, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            notifier,
            pending: Arc::new(TokioMutex::new(HashMap::new())),
        }
    }

    /// Persist a pending task, arm its timer, fire the notification, and
    /// return the suspension handle.
    pub async fn create(&self, new: NewApproval, ttl: Duration) -> Result<(String, DecisionFuture)> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_ms();
        let task = ApprovalTask {
            id: id.clone(),
            session_id: new.session_id,
            session_alias: new.session_alias,
            session_type: new.session_type,
            client: new.client,
            event_kind: new.draft.kind,
            event_summary: new.draft.summary(),
            policy_id: new.policy_id,
            policy_label: new.policy_label,
            draft: new.draft.raw,
            created_at,
            expires_at: created_at + ttl.as_millis() as i64,
            status: TaskStatus::Pending,
        };

        self.store.lock().await.insert_task(&task)?;

        let (tx, rx) = oneshot::channel();
        let timer = spawn_expiry(Arc::clone(&self.store), Arc::clone(&self.pending), id.clone(), ttl);
        self.pending
            .lock()
            .await
            .insert(id.clone(), PendingEntry { tx: Some(tx), timer });

        let notifier = Arc::clone(&self.notifier);
        let notify_task = task.clone();
        tokio::spawn(async move {
            notifier.publish(&notify_task).await;
        });

        info!(
            task = %id,
            session = %task.session_id,
            client = %short_pubkey(&task.client),
            kind = task.event_kind,
            "approval task created"
        );
        Ok((id, DecisionFuture { rx }))
    }

    /// Apply an explicit decision to a pending task. Non-pending ids are
    /// `NotFound`; the transition is at-most-once.
    pub async fn resolve(&self, id: &str, approved: bool) -> Result<()> {
        let to = if approved { TaskStatus::Approved } else { TaskStatus::Rejected };
        let transitioned = self.store.lock().await.transition_task(id, to)?;
        if !transitioned {
            return Err(Error::NotFound(format!("approval task '{}'", id)));
        }

        if let Some(entry) = self.pending.lock().await.remove(id) {
            entry.timer.abort();
            if let Some(tx) = entry.tx {
                let _ = tx.send(approved);
            }
        }

        info!(task = %id, approved, "approval task resolved");
        Ok(())
    }

    /// Reject every pending task belonging to a session. Invoked on
    /// session stop and delete.
    pub async fn reject_for_session(&self, session_id: &str) -> Result<()> {
        let tasks = self.store.lock().await.pending_tasks_for_session(session_id)?;
        for task in tasks {
            let transitioned = self
                .store
                .lock()
                .await
                .transition_task(&task.id, TaskStatus::Rejected)?;
            if !transitioned {
                continue;
            }
            if let Some(entry) = self.pending.lock().await.remove(&task.id) {
                entry.timer.abort();
                if let Some(tx) = entry.tx {
                    let _ = tx.send(false);
                }
            }
            debug!(task = %task.id, session = %session_id, "pending approval rejected with session");
        }
        Ok(())
    }

    /// Reconcile pending rows after a restart: expire overdue rows
    /// immediately and arm orphan timers honoring the original deadlines.
    pub async fn restore_timers_on_boot(&self) -> Result<()> {
        let now = now_ms();
        let rows = self.store.lock().await.list_tasks(Some(TaskStatus::Pending))?;

        for task in rows {
            if task.expires_at <= now {
                if self
                    .store
                    .lock()
                    .await
                    .transition_task(&task.id, TaskStatus::Expired)?
                {
                    info!(task = %task.id, "overdue approval expired on boot");
                }
                continue;
            }

            let delay = Duration::from_millis((task.expires_at - now) as u64);
            let timer = spawn_expiry(
                Arc::clone(&self.store),
                Arc::clone(&self.pending),
                task.id.clone(),
                delay,
            );
            self.pending
                .lock()
                .await
                .insert(task.id.clone(), PendingEntry { tx: None, timer });
            debug!(task = %task.id, delay_ms = delay.as_millis() as u64, "approval timer re-armed");
        }
        Ok(())
    }

    /// Pending tasks, newest first.
    pub async fn list_pending(&self) -> Result<Vec<ApprovalTask>> {
        self.store.lock().await.list_tasks(Some(TaskStatus::Pending))
    }

    /// Look up one task.
    pub async fn get(&self, id: &str) -> Result<Option<ApprovalTask>> {
        self.store.lock().await.get_task(id)
    }
}

fn spawn_expiry(
    store: Arc<TokioMutex<SessionStore>>,
    pending: PendingMap,
    id: String,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let transitioned = match store.lock().await.transition_task(&id, TaskStatus::Expired) {
            Ok(t) => t,
            Err(e) => {
                warn!(task = %id, error = %e, "failed to expire approval");
                false
            }
        };

        // Touch the waiter only when this task won the transition; a
        // concurrent resolve that won keeps ownership of the entry.
        if transitioned {
            if let Some(entry) = pending.lock().await.remove(&id) {
                if let Some(tx) = entry.tx {
                    let _ = tx.send(false);
                }
            }
            info!(task = %id, "approval task expired");
        }
    })
}
