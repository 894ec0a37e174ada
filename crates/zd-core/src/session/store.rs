//! Session persistence using SQLite

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::chatwoot_config::ChatwootConfig;
use crate::session::{Session, SessionStatus};
use crate::webhook::WebhookSubscription;
use crate::Result;

const SESSION_COLUMNS: &str = "id, name, api_key, device_jid, status, created_at, updated_at";

const CHATWOOT_COLUMNS: &str = "session_id, enabled, account_id, token, base_url, inbox_name, \
     sign_msg, sign_delimiter, reopen_conversation, conversation_pending, auto_create, \
     merge_brazil_contacts, import_days, ignore_jids, created_at, updated_at";

/// SQLite-backed store for sessions, webhook subscriptions and Chatwoot configs
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at the given path
    pub fn new(db_path: &str) -> Result<Self> {
        if db_path == ":memory:" {
            return Self::in_memory();
        }
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// Initialize database tables
    fn init_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                api_key TEXT NOT NULL,
                device_jid TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_device_jid ON sessions(device_jid);

            CREATE TABLE IF NOT EXISTS webhooks (
                session_id TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                events TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chatwoot_configs (
                session_id TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
                enabled INTEGER NOT NULL,
                account_id TEXT NOT NULL,
                token TEXT NOT NULL,
                base_url TEXT NOT NULL,
                inbox_name TEXT NOT NULL,
                sign_msg INTEGER NOT NULL,
                sign_delimiter TEXT NOT NULL,
                reopen_conversation INTEGER NOT NULL,
                conversation_pending INTEGER NOT NULL,
                auto_create INTEGER NOT NULL,
                merge_brazil_contacts INTEGER NOT NULL,
                import_days INTEGER NOT NULL,
                ignore_jids TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // sessions
    // ------------------------------------------------------------------

    /// Insert or replace a session
    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, name, api_key, device_jid, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                api_key = excluded.api_key,
                device_jid = excluded.device_jid,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                session.id,
                session.name,
                session.api_key,
                session.device_jid,
                session.status.as_str(),
                session.created_at.to_rfc3339(),
                session.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Load a session by ID
    pub fn load_session(&self, id: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
        let session = self
            .conn
            .query_row(&sql, params![id], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// Load a session by its unique name
    pub fn load_session_by_name(&self, name: &str) -> Result<Option<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE name = ?1");
        let session = self
            .conn
            .query_row(&sql, params![name], row_to_session)
            .optional()?;
        Ok(session)
    }

    /// All sessions bound to a device JID
    pub fn list_sessions_by_device(&self, device_jid: &str) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE device_jid = ?1 ORDER BY created_at"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![device_jid], row_to_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// List all sessions, oldest first
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Update the persisted status; returns false when the session is gone
    pub fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Bind (or clear) the device JID
    pub fn update_session_device(&self, id: &str, device_jid: Option<&str>) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE sessions SET device_jid = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, device_jid, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a session; dependent rows go with it
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // webhooks
    // ------------------------------------------------------------------

    pub fn save_webhook(&self, sub: &WebhookSubscription) -> Result<()> {
        let events = serde_json::to_string(&sub.events)?;
        self.conn.execute(
            "INSERT INTO webhooks (session_id, url, events, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                url = excluded.url,
                events = excluded.events,
                updated_at = excluded.updated_at",
            params![sub.session_id, sub.url, events, sub.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_webhook(&self, session_id: &str) -> Result<Option<WebhookSubscription>> {
        let sub = self
            .conn
            .query_row(
                "SELECT session_id, url, events, updated_at FROM webhooks WHERE session_id = ?1",
                params![session_id],
                row_to_webhook,
            )
            .optional()?;
        Ok(sub)
    }

    pub fn list_webhooks(&self) -> Result<Vec<WebhookSubscription>> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id, url, events, updated_at FROM webhooks")?;
        let rows = stmt.query_map([], row_to_webhook)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_webhook(&self, session_id: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM webhooks WHERE session_id = ?1", params![session_id])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // chatwoot configs
    // ------------------------------------------------------------------

    pub fn insert_chatwoot_config(&self, config: &ChatwootConfig) -> Result<()> {
        let ignore_jids = serde_json::to_string(&config.ignore_jids)?;
        self.conn.execute(
            &format!(
                "INSERT INTO chatwoot_configs ({CHATWOOT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                config.session_id,
                config.enabled,
                config.account_id,
                config.token,
                config.base_url,
                config.inbox_name,
                config.sign_msg,
                config.sign_delimiter,
                config.reopen_conversation,
                config.conversation_pending,
                config.auto_create,
                config.merge_brazil_contacts,
                config.import_days,
                ignore_jids,
                config.created_at.to_rfc3339(),
                config.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite every mutable column; returns false when no row exists
    pub fn update_chatwoot_config(&self, config: &ChatwootConfig) -> Result<bool> {
        let ignore_jids = serde_json::to_string(&config.ignore_jids)?;
        let affected = self.conn.execute(
            "UPDATE chatwoot_configs SET
                enabled = ?2, account_id = ?3, token = ?4, base_url = ?5, inbox_name = ?6,
                sign_msg = ?7, sign_delimiter = ?8, reopen_conversation = ?9,
                conversation_pending = ?10, auto_create = ?11, merge_brazil_contacts = ?12,
                import_days = ?13, ignore_jids = ?14, updated_at = ?15
             WHERE session_id = ?1",
            params![
                config.session_id,
                config.enabled,
                config.account_id,
                config.token,
                config.base_url,
                config.inbox_name,
                config.sign_msg,
                config.sign_delimiter,
                config.reopen_conversation,
                config.conversation_pending,
                config.auto_create,
                config.merge_brazil_contacts,
                config.import_days,
                ignore_jids,
                config.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn load_chatwoot_config(&self, session_id: &str) -> Result<Option<ChatwootConfig>> {
        let sql = format!("SELECT {CHATWOOT_COLUMNS} FROM chatwoot_configs WHERE session_id = ?1");
        let config = self
            .conn
            .query_row(&sql, params![session_id], row_to_chatwoot_config)
            .optional()?;
        Ok(config)
    }

    pub fn list_chatwoot_configs(&self) -> Result<Vec<ChatwootConfig>> {
        let sql = format!("SELECT {CHATWOOT_COLUMNS} FROM chatwoot_configs");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_chatwoot_config)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_chatwoot_config(&self, session_id: &str) -> Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM chatwoot_configs WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(affected > 0)
    }
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let status: String = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        name: row.get(1)?,
        api_key: row.get(2)?,
        device_jid: row.get(3)?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Disconnected),
        created_at: parse_timestamp(5, row.get(5)?)?,
        updated_at: parse_timestamp(6, row.get(6)?)?,
    })
}

fn row_to_webhook(row: &Row<'_>) -> rusqlite::Result<WebhookSubscription> {
    Ok(WebhookSubscription {
        session_id: row.get(0)?,
        url: row.get(1)?,
        events: parse_json(2, row.get(2)?)?,
        updated_at: parse_timestamp(3, row.get(3)?)?,
    })
}

fn row_to_chatwoot_config(row: &Row<'_>) -> rusqlite::Result<ChatwootConfig> {
    Ok(ChatwootConfig {
        session_id: row.get(0)?,
        enabled: row.get(1)?,
        account_id: row.get(2)?,
        token: row.get(3)?,
        base_url: row.get(4)?,
        inbox_name: row.get(5)?,
        sign_msg: row.get(6)?,
        sign_delimiter: row.get(7)?,
        reopen_conversation: row.get(8)?,
        conversation_pending: row.get(9)?,
        auto_create: row.get(10)?,
        merge_brazil_contacts: row.get(11)?,
        import_days: row.get(12)?,
        ignore_jids: parse_json(13, row.get(13)?)?,
        created_at: parse_timestamp(14, row.get(14)?)?,
        updated_at: parse_timestamp(15, row.get(15)?)?,
    })
}
