//! Session store schema.

/// SQL to create the session store tables.
pub const CREATE_SCHEMA: &str = r#"
-- Pairing sessions: the source of truth for resumable state
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    key_id TEXT NOT NULL,
    alias TEXT NOT NULL DEFAULT '',
    relays_json TEXT NOT NULL,
    secret TEXT,
    uri TEXT,
    auto_approve INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'waiting',
    last_client TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    template TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_sessions_active ON sessions(active);

-- Suspended REFER decisions awaiting a human
CREATE TABLE IF NOT EXISTS approval_tasks (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    session_alias TEXT NOT NULL DEFAULT '',
    session_type TEXT NOT NULL,
    client TEXT NOT NULL,
    event_kind INTEGER NOT NULL,
    event_summary TEXT NOT NULL DEFAULT '',
    policy_id TEXT NOT NULL,
    policy_label TEXT NOT NULL,
    draft_json TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_tasks_session ON approval_tasks(session_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON approval_tasks(status);
"#;

/// Columns added after the initial schema. Each entry is applied with
/// `ALTER TABLE .. ADD COLUMN` when missing, so older databases pick up
/// new columns with safe defaults on first boot of a newer version.
pub const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("sessions", "template", "TEXT NOT NULL DEFAULT ''"),
    ("sessions", "last_client", "TEXT"),
];
