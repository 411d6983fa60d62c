//! In-memory activity log for the dashboard.
//!
//! A bounded ring of recent events, newest first. Nothing here is
//! persisted; loss on restart is acceptable.

use crate::config::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// Classification of an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    /// A session was started.
    SessionStart,
    /// A session was stopped or deleted.
    SessionStop,
    /// A session record changed (rename, template swap).
    SessionUpdate,
    /// A client paired or reconnected.
    ProviderConnect,
    /// A client went away.
    ProviderDisconnect,
    /// A signing request arrived.
    SignRequest,
    /// A signing request was decided.
    SignResult,
    /// A NIP-04 cipher operation was served.
    Nip04,
    /// A NIP-44 cipher operation was served.
    Nip44,
}

/// One observation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Unique entry id.
    pub id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Entry classification.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Short human-readable summary.
    pub summary: String,
    /// Owning session, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Session alias at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_label: Option<String>,
    /// Peer public key, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    /// Free-form extra fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ActivityEntry {
    /// Create an entry stamped with a fresh id and the current time.
    pub fn new(kind: ActivityKind, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            kind,
            summary: summary.into(),
            session_id: None,
            session_label: None,
            client: None,
            metadata: None,
        }
    }

    /// Attach the owning session.
    pub fn session(mut self, id: impl Into<String>, label: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self.session_label = Some(label.into());
        self
    }

    /// Attach the peer public key.
    pub fn client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Attach free-form metadata.
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Bounded ring buffer of recent activity, newest first.
pub struct ActivityLog {
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl ActivityLog {
    /// Create a log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(crate::ACTIVITY_CAPACITY)
    }

    /// Create a log with an explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Insert an entry at the front, dropping the oldest past capacity.
    ///
    /// Missing `id`/`timestamp` fields are stamped here.
    pub fn record(&self, mut entry: ActivityEntry) {
        if entry.id.is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }
        if entry.timestamp == 0 {
            entry.timestamp = now_ms();
        }

        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Snapshot of the buffer, newest first.
    pub fn list(&self) -> Vec<ActivityEntry> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().cloned().collect()
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}
