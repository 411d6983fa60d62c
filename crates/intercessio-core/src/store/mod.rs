//! Embedded session store.
//!
//! SQLite database holding the `sessions` and `approval_tasks` tables —
//! the only source of truth for state that must survive a restart. Every
//! write commits before the corresponding runtime transition is reported
//! as successful.

pub mod schema;

use crate::approval::{ApprovalTask, TaskStatus};
use crate::error::{Error, Result};
use crate::session::record::{SessionRecord, SessionStatus, SessionType};
use rusqlite::{params, Connection, OpenFlags};
use schema::{ADDITIVE_COLUMNS, CREATE_SCHEMA};
use std::path::Path;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use an in-memory database (for testing).
    pub in_memory: bool,
}

impl StoreConfig {
    /// File-backed configuration.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            in_memory: false,
        }
    }

    /// In-memory configuration.
    pub fn in_memory() -> Self {
        Self {
            path: String::new(),
            in_memory: true,
        }
    }
}

/// Session store handle.
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Open or create the store and bring the schema up to date.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Store(format!("failed to create directory: {}", e)))?;
            }
            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Store(format!("failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::Store(format!("failed to set pragmas: {}", e)))?;

        conn.execute_batch(CREATE_SCHEMA)
            .map_err(|e| Error::Store(format!("failed to create schema: {}", e)))?;

        migrate(&conn)?;

        Ok(Self { conn })
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Insert or replace a session record.
    pub fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let relays_json =
            serde_json::to_string(&record.relays).map_err(|e| Error::Store(e.to_string()))?;

        self.conn
            .execute(
                r#"
                INSERT OR REPLACE INTO sessions
                (id, type, key_id, alias, relays_json, secret, uri, auto_approve,
                 status, last_client, created_at, updated_at, active, template)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    record.id,
                    record.kind.as_str(),
                    record.key_id,
                    record.alias,
                    relays_json,
                    record.secret,
                    record.uri,
                    record.auto_approve as i32,
                    record.status.as_str(),
                    record.last_client,
                    record.created_at,
                    record.updated_at,
                    record.active as i32,
                    record.template,
                ],
            )
            .map_err(|e| Error::Store(format!("failed to upsert session: {}", e)))?;

        Ok(())
    }

    /// List session records, optionally restricted to active ones.
    pub fn list_sessions(&self, active_only: bool) -> Result<Vec<SessionRecord>> {
        let sql = if active_only {
            "SELECT id, type, key_id, alias, relays_json, secret, uri, auto_approve,
                    status, last_client, created_at, updated_at, active, template
             FROM sessions WHERE active = 1 ORDER BY created_at"
        } else {
            "SELECT id, type, key_id, alias, relays_json, secret, uri, auto_approve,
                    status, last_client, created_at, updated_at, active, template
             FROM sessions ORDER BY created_at"
        };

        let mut stmt = self.conn.prepare(sql).map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_session)
            .map_err(|e| Error::Store(e.to_string()))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(|e| Error::Store(e.to_string()))??);
        }
        Ok(sessions)
    }

    /// Look up one session record.
    pub fn get_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, type, key_id, alias, relays_json, secret, uri, auto_approve,
                        status, last_client, created_at, updated_at, active, template
                 FROM sessions WHERE id = ?",
            )
            .map_err(|e| Error::Store(e.to_string()))?;

        match stmt.query_row(params![id], row_to_session) {
            Ok(record) => Ok(Some(record?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }

    /// Remove a session row. Returns whether a row was removed.
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?", params![id])
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------
    // Approval tasks
    // ------------------------------------------------------------------

    /// Insert a new approval task.
    pub fn insert_task(&self, task: &ApprovalTask) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO approval_tasks
                (id, session_id, session_alias, session_type, client, event_kind,
                 event_summary, policy_id, policy_label, draft_json, created_at,
                 expires_at, status)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    task.id,
                    task.session_id,
                    task.session_alias,
                    task.session_type.as_str(),
                    task.client,
                    task.event_kind,
                    task.event_summary,
                    task.policy_id,
                    task.policy_label,
                    task.draft,
                    task.created_at,
                    task.expires_at,
                    task.status.as_str(),
                ],
            )
            .map_err(|e| Error::Store(format!("failed to insert task: {}", e)))?;
        Ok(())
    }

    /// List tasks, optionally filtered by status, newest first.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ApprovalTask>> {
        let mut tasks = Vec::new();

        match status {
            Some(status) => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, session_id, session_alias, session_type, client,
                                event_kind, event_summary, policy_id, policy_label,
                                draft_json, created_at, expires_at, status
                         FROM approval_tasks WHERE status = ? ORDER BY created_at DESC",
                    )
                    .map_err(|e| Error::Store(e.to_string()))?;
                let rows = stmt
                    .query_map(params![status.as_str()], row_to_task)
                    .map_err(|e| Error::Store(e.to_string()))?;
                for row in rows {
                    tasks.push(row.map_err(|e| Error::Store(e.to_string()))??);
                }
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(
                        "SELECT id, session_id, session_alias, session_type, client,
                                event_kind, event_summary, policy_id, policy_label,
                                draft_json, created_at, expires_at, status
                         FROM approval_tasks ORDER BY created_at DESC",
                    )
                    .map_err(|e| Error::Store(e.to_string()))?;
                let rows = stmt
                    .query_map([], row_to_task)
                    .map_err(|e| Error::Store(e.to_string()))?;
                for row in rows {
                    tasks.push(row.map_err(|e| Error::Store(e.to_string()))??);
                }
            }
        }

        Ok(tasks)
    }

    /// Pending tasks belonging to one session.
    pub fn pending_tasks_for_session(&self, session_id: &str) -> Result<Vec<ApprovalTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, session_id, session_alias, session_type, client,
                        event_kind, event_summary, policy_id, policy_label,
                        draft_json, created_at, expires_at, status
                 FROM approval_tasks WHERE session_id = ? AND status = 'pending'
                 ORDER BY created_at",
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id], row_to_task)
            .map_err(|e| Error::Store(e.to_string()))?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| Error::Store(e.to_string()))??);
        }
        Ok(tasks)
    }

    /// Look up one task.
    pub fn get_task(&self, id: &str) -> Result<Option<ApprovalTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, session_id, session_alias, session_type, client,
                        event_kind, event_summary, policy_id, policy_label,
                        draft_json, created_at, expires_at, status
                 FROM approval_tasks WHERE id = ?",
            )
            .map_err(|e| Error::Store(e.to_string()))?;

        match stmt.query_row(params![id], row_to_task) {
            Ok(task) => Ok(Some(task?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }

    /// Move a task out of `pending` into a terminal status. Returns
    /// `false` when the task was not pending (or does not exist), making
    /// the transition at-most-once.
    pub fn transition_task(&self, id: &str, to: TaskStatus) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE approval_tasks SET status = ? WHERE id = ? AND status = 'pending'",
                params![to.as_str(), id],
            )
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(rows > 0)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    for (table, column, ddl) in ADDITIVE_COLUMNS {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({})", table))
            .map_err(|e| Error::Store(e.to_string()))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| Error::Store(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, ddl))
                .map_err(|e| Error::Store(format!("migration failed: {}", e)))?;
            tracing::info!(table, column, "added schema column");
        }
    }
    Ok(())
}

type SqlResult<T> = std::result::Result<T, rusqlite::Error>;

fn row_to_session(row: &rusqlite::Row<'_>) -> SqlResult<Result<SessionRecord>> {
    let kind: String = row.get(1)?;
    let relays_json: String = row.get(4)?;
    let status: String = row.get(8)?;
    let auto_approve: i32 = row.get(7)?;
    let active: i32 = row.get(12)?;

    Ok((|| {
        Ok(SessionRecord {
            id: row.get(0).map_err(Error::from)?,
            kind: SessionType::parse(&kind)?,
            key_id: row.get(2).map_err(Error::from)?,
            alias: row.get(3).map_err(Error::from)?,
            relays: serde_json::from_str(&relays_json)
                .map_err(|e| Error::Store(format!("corrupt relay list: {}", e)))?,
            secret: row.get(5).map_err(Error::from)?,
            uri: row.get(6).map_err(Error::from)?,
            auto_approve: auto_approve != 0,
            status: SessionStatus::parse(&status)?,
            last_client: row.get(9).map_err(Error::from)?,
            created_at: row.get(10).map_err(Error::from)?,
            updated_at: row.get(11).map_err(Error::from)?,
            active: active != 0,
            template: row.get(13).map_err(Error::from)?,
        })
    })())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> SqlResult<Result<ApprovalTask>> {
    let session_type: String = row.get(3)?;
    let status: String = row.get(12)?;
    let event_kind: i64 = row.get(5)?;

    Ok((|| {
        Ok(ApprovalTask {
            id: row.get(0).map_err(Error::from)?,
            session_id: row.get(1).map_err(Error::from)?,
            session_alias: row.get(2).map_err(Error::from)?,
            session_type: SessionType::parse(&session_type)?,
            client: row.get(4).map_err(Error::from)?,
            event_kind: event_kind as u16,
            event_summary: row.get(6).map_err(Error::from)?,
            policy_id: row.get(7).map_err(Error::from)?,
            policy_label: row.get(8).map_err(Error::from)?,
            draft: row.get(9).map_err(Error::from)?,
            created_at: row.get(10).map_err(Error::from)?,
            expires_at: row.get(11).map_err(Error::from)?,
            status: TaskStatus::parse(&status)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::now_ms;

    fn test_store() -> SessionStore {
        SessionStore::open(&StoreConfig::in_memory()).expect("open")
    }

    fn record(id: &str) -> SessionRecord {
        let now = now_ms();
        SessionRecord {
            id: id.to_string(),
            kind: SessionType::Bunker,
            key_id: "k1".into(),
            alias: "phone".into(),
            relays: vec!["wss://relay.damus.io".into(), "wss://nos.lol".into()],
            secret: Some("pair-secret".into()),
            uri: Some("bunker://pk?relay=wss%3A%2F%2Frelay.damus.io".into()),
            auto_approve: false,
            status: SessionStatus::Waiting,
            last_client: None,
            created_at: now,
            updated_at: now,
            active: true,
            template: "auto_sign".into(),
        }
    }

    fn task(id: &str, session_id: &str, expires_at: i64) -> ApprovalTask {
        ApprovalTask {
            id: id.to_string(),
            session_id: session_id.to_string(),
            session_alias: "phone".into(),
            session_type: SessionType::Bunker,
            client: "clientpk".into(),
            event_kind: 4,
            event_summary: "direct message".into(),
            policy_id: "login_and_publish".into(),
            policy_label: "Login + publish".into(),
            draft: r#"{"kind":4,"content":"hello","created_at":1,"tags":[]}"#.into(),
            created_at: now_ms(),
            expires_at,
            status: TaskStatus::Pending,
        }
    }

    #[test]
    fn test_session_round_trip() {
        let store = test_store();
        let original = record("s1");
        store.upsert_session(&original).expect("upsert");

        let listed = store.list_sessions(false).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], original);

        let fetched = store.get_session("s1").expect("get").expect("exists");
        assert_eq!(fetched, original);
    }

    #[test]
    fn test_upsert_replaces() {
        let store = test_store();
        let mut rec = record("s1");
        store.upsert_session(&rec).expect("upsert");

        rec.alias = "tablet".into();
        rec.status = SessionStatus::Connected;
        rec.last_client = Some("peer".into());
        store.upsert_session(&rec).expect("replace");

        let fetched = store.get_session("s1").expect("get").expect("exists");
        assert_eq!(fetched.alias, "tablet");
        assert_eq!(fetched.status, SessionStatus::Connected);
        assert_eq!(store.list_sessions(false).expect("list").len(), 1);
    }

    #[test]
    fn test_active_only_filter() {
        let store = test_store();
        let mut active = record("s1");
        active.active = true;
        let mut stopped = record("s2");
        stopped.active = false;
        store.upsert_session(&active).expect("upsert");
        store.upsert_session(&stopped).expect("upsert");

        let all = store.list_sessions(false).expect("list");
        let active_only = store.list_sessions(true).expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(active_only.len(), 1);
        assert_eq!(active_only[0].id, "s1");
    }

    #[test]
    fn test_delete_session() {
        let store = test_store();
        store.upsert_session(&record("s1")).expect("upsert");
        assert!(store.delete_session("s1").expect("delete"));
        assert!(!store.delete_session("s1").expect("delete again"));
        assert!(store.get_session("s1").expect("get").is_none());
    }

    #[test]
    fn test_task_draft_round_trip_is_byte_equal() {
        let store = test_store();
        let original = task("t1", "s1", now_ms() + 60_000);
        store.insert_task(&original).expect("insert");

        let listed = store.list_tasks(Some(TaskStatus::Pending)).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].draft.as_bytes(), original.draft.as_bytes());
        assert_eq!(listed[0], original);
    }

    #[test]
    fn test_task_transition_is_at_most_once() {
        let store = test_store();
        store.insert_task(&task("t1", "s1", now_ms() + 60_000)).expect("insert");

        assert!(store.transition_task("t1", TaskStatus::Approved).expect("first"));
        assert!(!store.transition_task("t1", TaskStatus::Rejected).expect("second"));
        assert!(!store.transition_task("ghost", TaskStatus::Expired).expect("missing"));

        let fetched = store.get_task("t1").expect("get").expect("exists");
        assert_eq!(fetched.status, TaskStatus::Approved);
    }

    #[test]
    fn test_pending_tasks_for_session() {
        let store = test_store();
        store.insert_task(&task("t1", "s1", now_ms() + 60_000)).expect("insert");
        store.insert_task(&task("t2", "s1", now_ms() + 60_000)).expect("insert");
        store.insert_task(&task("t3", "s2", now_ms() + 60_000)).expect("insert");
        store.transition_task("t2", TaskStatus::Rejected).expect("transition");

        let pending = store.pending_tasks_for_session("s1").expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "t1");
    }

    #[test]
    fn test_additive_migration_fills_missing_column() {
        let conn = Connection::open_in_memory().expect("open");
        // An older database created before the template column existed.
        conn.execute_batch(
            "CREATE TABLE sessions (
                id TEXT PRIMARY KEY, type TEXT NOT NULL, key_id TEXT NOT NULL,
                alias TEXT NOT NULL DEFAULT '', relays_json TEXT NOT NULL,
                secret TEXT, uri TEXT, auto_approve INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'waiting', last_client TEXT,
                created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );",
        )
        .expect("create old schema");

        migrate(&conn).expect("migrate");

        let columns: Vec<String> = conn
            .prepare("PRAGMA table_info(sessions)")
            .expect("prepare")
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query")
            .filter_map(|r| r.ok())
            .collect();
        assert!(columns.iter().any(|c| c == "template"));
    }
}
