//! Repository seams over the persistence layer
//!
//! The registry, dispatcher and bridge only see these traits. The SQLite
//! implementation serializes access through a mutex that is never held
//! across an await point.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::chatwoot_config::ChatwootConfig;
use crate::session::{Session, SessionStatus, SqliteStore};
use crate::webhook::WebhookSubscription;
use crate::{Error, Result};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Session>>;
    async fn list_by_device_jid(&self, device_jid: &str) -> Result<Vec<Session>>;
    async fn list(&self) -> Result<Vec<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<bool>;
    async fn set_device_jid(&self, id: &str, device_jid: Option<&str>) -> Result<bool>;
    async fn delete(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<WebhookSubscription>>;
    async fn list(&self) -> Result<Vec<WebhookSubscription>>;
    async fn upsert(&self, sub: &WebhookSubscription) -> Result<()>;
    async fn delete(&self, session_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait ChatwootConfigRepository: Send + Sync {
    async fn get_by_session_id(&self, session_id: &str) -> Result<Option<ChatwootConfig>>;
    async fn list(&self) -> Result<Vec<ChatwootConfig>>;
    async fn create(&self, config: &ChatwootConfig) -> Result<()>;
    async fn update(&self, config: &ChatwootConfig) -> Result<bool>;
    async fn delete(&self, session_id: &str) -> Result<bool>;
}

/// Thread-safe handle over a [`SqliteStore`]
#[derive(Clone)]
pub struct SqliteRepository {
    store: Arc<Mutex<SqliteStore>>,
}

impl SqliteRepository {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Open the database at `db_path`
    pub fn open(db_path: &str) -> Result<Self> {
        Ok(Self::new(SqliteStore::new(db_path)?))
    }

    /// In-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SqliteStore::in_memory()?))
    }

    fn store(&self) -> Result<MutexGuard<'_, SqliteStore>> {
        self.store
            .lock()
            .map_err(|_| Error::Other("session store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl SessionRepository for SqliteRepository {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        self.store()?.load_session(id)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Session>> {
        self.store()?.load_session_by_name(name)
    }

    async fn list_by_device_jid(&self, device_jid: &str) -> Result<Vec<Session>> {
        self.store()?.list_sessions_by_device(device_jid)
    }

    async fn list(&self) -> Result<Vec<Session>> {
        self.store()?.list_sessions()
    }

    async fn save(&self, session: &Session) -> Result<()> {
        self.store()?.save_session(session)
    }

    async fn update_status(&self, id: &str, status: SessionStatus) -> Result<bool> {
        self.store()?.update_session_status(id, status)
    }

    async fn set_device_jid(&self, id: &str, device_jid: Option<&str>) -> Result<bool> {
        self.store()?.update_session_device(id, device_jid)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.store()?.delete_session(id)
    }
}

#[async_trait]
impl WebhookRepository for SqliteRepository {
    async fn get(&self, session_id: &str) -> Result<Option<WebhookSubscription>> {
        self.store()?.load_webhook(session_id)
    }

    async fn list(&self) -> Result<Vec<WebhookSubscription>> {
        self.store()?.list_webhooks()
    }

    async fn upsert(&self, sub: &WebhookSubscription) -> Result<()> {
        self.store()?.save_webhook(sub)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        self.store()?.delete_webhook(session_id)
    }
}

#[async_trait]
impl ChatwootConfigRepository for SqliteRepository {
    async fn get_by_session_id(&self, session_id: &str) -> Result<Option<ChatwootConfig>> {
        self.store()?.load_chatwoot_config(session_id)
    }

    async fn list(&self) -> Result<Vec<ChatwootConfig>> {
        self.store()?.list_chatwoot_configs()
    }

    async fn create(&self, config: &ChatwootConfig) -> Result<()> {
        self.store()?.insert_chatwoot_config(config)
    }

    async fn update(&self, config: &ChatwootConfig) -> Result<bool> {
        self.store()?.update_chatwoot_config(config)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        self.store()?.delete_chatwoot_config(session_id)
    }
}
