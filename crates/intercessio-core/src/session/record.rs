//! Durable session record types.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Pairing mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    /// We advertise a `bunker://` URI and the client dials us.
    Bunker,
    /// The client hands us a `nostrconnect://` URI and we dial it.
    NostrConnect,
}

impl SessionType {
    /// Stable string form, used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Bunker => "bunker",
            SessionType::NostrConnect => "nostr-connect",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "bunker" => Ok(SessionType::Bunker),
            "nostr-connect" => Ok(SessionType::NostrConnect),
            other => Err(Error::Protocol(format!("unknown session type '{}'", other))),
        }
    }
}

/// Pairing state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// Advertised but no client has completed pairing yet.
    Waiting,
    /// A client has paired.
    Connected,
}

impl SessionStatus {
    /// Stable string form, used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Connected => "connected",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "connected" => Ok(SessionStatus::Connected),
            other => Err(Error::Protocol(format!("unknown session status '{}'", other))),
        }
    }
}

/// Durable state of one pairing session. The session store is the only
/// source of truth for these across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id (UUID).
    pub id: String,
    /// Pairing mode.
    #[serde(rename = "type")]
    pub kind: SessionType,
    /// Key this session signs with (references key metadata).
    pub key_id: String,
    /// Display alias; may be empty.
    pub alias: String,
    /// Normalized, deduplicated relay list.
    pub relays: Vec<String>,
    /// Bunker pairing shared secret; absent for nostr-connect sessions.
    /// Never serialized to the control plane.
    #[serde(skip_serializing, default)]
    pub secret: Option<String>,
    /// Bunker URI we advertise, or the nostrconnect URI the client supplied.
    pub uri: Option<String>,
    /// When set, sign requests bypass the policy and are approved.
    pub auto_approve: bool,
    /// Pairing state.
    pub status: SessionStatus,
    /// Public key of the most recent peer.
    pub last_client: Option<String>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last mutation time, epoch milliseconds.
    pub updated_at: i64,
    /// Inactive sessions are never resumed on boot but keep their row.
    pub active: bool,
    /// Policy template id. Unknown ids resolve to the registry default.
    pub template: String,
}

impl SessionRecord {
    /// Short display name: the alias, or a truncated id when unset.
    pub fn display_name(&self) -> String {
        if self.alias.is_empty() {
            self.id.chars().take(8).collect()
        } else {
            self.alias.clone()
        }
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = crate::config::now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trip() {
        for t in [SessionType::Bunker, SessionType::NostrConnect] {
            assert_eq!(SessionType::parse(t.as_str()).expect("parse"), t);
        }
        assert!(SessionType::parse("carrier-pigeon").is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [SessionStatus::Waiting, SessionStatus::Connected] {
            assert_eq!(SessionStatus::parse(s.as_str()).expect("parse"), s);
        }
    }

    #[test]
    fn test_secret_never_serialized() {
        let record = SessionRecord {
            id: "abc".into(),
            kind: SessionType::Bunker,
            key_id: "k1".into(),
            alias: "phone".into(),
            relays: vec!["wss://relay.damus.io".into()],
            secret: Some("pairing-secret".into()),
            uri: None,
            auto_approve: false,
            status: SessionStatus::Waiting,
            last_client: None,
            created_at: 1,
            updated_at: 1,
            active: true,
            template: "auto_sign".into(),
        };

        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("pairing-secret"));
        assert!(json.contains("\"type\":\"bunker\""));
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        let mut record = SessionRecord {
            id: "0123456789abcdef".into(),
            kind: SessionType::Bunker,
            key_id: "k1".into(),
            alias: String::new(),
            relays: vec![],
            secret: None,
            uri: None,
            auto_approve: false,
            status: SessionStatus::Waiting,
            last_client: None,
            created_at: 0,
            updated_at: 0,
            active: true,
            template: String::new(),
        };
        assert_eq!(record.display_name(), "01234567");

        record.alias = "laptop".into();
        assert_eq!(record.display_name(), "laptop");
    }
}
