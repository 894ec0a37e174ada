//! Per-session Chatwoot integrations
//!
//! Owns the stored configurations and one [`ChatwootBridge`] per enabled
//! session. As an [`EventSink`] it queues message events per session so
//! Chatwoot posts keep WhatsApp order without blocking the event worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zd_core::config::ChatwootSettings;
use zd_core::{
    ChatwootConfig, ChatwootConfigRepository, EventSink, KeyedQueues, ProtocolEvent, QueueHandler,
    SessionEvent,
};

use crate::bridge::{ChatwootBridge, InboundOutcome};
use crate::client::ChatwootClient;
use crate::error::{ChatwootError, Result};
use crate::sender::MessageSender;
use crate::webhook::parse_webhook;

type Instances = Arc<DashMap<String, Arc<ChatwootBridge>>>;

/// Result of checking a Chatwoot account with a candidate configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionCheck {
    pub inbox_count: usize,
    pub inbox_found: bool,
    pub inbox_id: Option<i64>,
}

struct OutboundWorker {
    instances: Instances,
}

#[async_trait]
impl QueueHandler<Arc<SessionEvent>> for OutboundWorker {
    async fn handle(&self, session_id: &str, event: Arc<SessionEvent>) {
        // Clone out of the map; the shard guard must not live across the await.
        let bridge = match self.instances.get(session_id) {
            Some(bridge) => Arc::clone(bridge.value()),
            None => {
                debug!(session_id, "Integration removed, dropping queued event");
                return;
            }
        };

        if let Err(e) = bridge.handle_event(&event).await {
            warn!(
                session_id,
                event = %event.event_type(),
                error = %e,
                "Failed to forward event to Chatwoot"
            );
        }
    }
}

pub struct IntegrationRegistry {
    instances: Instances,
    locks: DashMap<String, Arc<Mutex<()>>>,
    queues: KeyedQueues<Arc<SessionEvent>>,
    repo: Arc<dyn ChatwootConfigRepository>,
    sender: Arc<dyn MessageSender>,
    timeout: Duration,
}

impl IntegrationRegistry {
    pub fn new(
        repo: Arc<dyn ChatwootConfigRepository>,
        sender: Arc<dyn MessageSender>,
        settings: &ChatwootSettings,
    ) -> Self {
        let instances: Instances = Arc::new(DashMap::new());
        let worker = OutboundWorker {
            instances: Arc::clone(&instances),
        };
        Self {
            instances,
            locks: DashMap::new(),
            queues: KeyedQueues::new("chatwoot", settings.queue_capacity, Arc::new(worker)),
            repo,
            sender,
            timeout: settings.timeout(),
        }
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start (or replace) the bridge for a session
    pub fn register_instance(
        &self,
        session_id: &str,
        config: ChatwootConfig,
    ) -> Result<Arc<ChatwootBridge>> {
        let bridge = Arc::new(ChatwootBridge::new(
            session_id,
            config,
            Arc::clone(&self.sender),
            self.timeout,
        )?);

        let replaced = self
            .instances
            .insert(session_id.to_string(), Arc::clone(&bridge))
            .is_some();
        info!(session_id, replaced, "Chatwoot integration registered");
        Ok(bridge)
    }

    /// Stop the bridge for a session. Returns whether one was running.
    pub fn unregister_instance(&self, session_id: &str) -> bool {
        let removed = self.instances.remove(session_id).is_some();
        self.queues.remove(session_id);
        if removed {
            info!(session_id, "Chatwoot integration unregistered");
        }
        removed
    }

    pub fn get_service(&self, session_id: &str) -> Option<Arc<ChatwootBridge>> {
        self.instances.get(session_id).map(|b| Arc::clone(b.value()))
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.instances.contains_key(session_id)
    }

    pub fn registered_count(&self) -> usize {
        self.instances.len()
    }

    /// Handle a raw Chatwoot webhook body for a session
    pub async fn process_webhook(&self, session_id: &str, body: &[u8]) -> Result<InboundOutcome> {
        let event = parse_webhook(body)?;
        let bridge = self
            .get_service(session_id)
            .ok_or_else(|| ChatwootError::NotRegistered(session_id.to_string()))?;

        let outcome = bridge.process_webhook(event).await?;
        debug!(session_id, ?outcome, "Chatwoot webhook processed");
        Ok(outcome)
    }

    /// Store a session's configuration and bring its bridge in line with it.
    ///
    /// An enabled configuration (re)starts the bridge, a disabled one stops it.
    /// An empty or masked token keeps the stored one.
    pub async fn configure(
        &self,
        session_id: &str,
        mut config: ChatwootConfig,
    ) -> Result<ChatwootConfig> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        config.session_id = session_id.to_string();
        let existing = self.repo.get_by_session_id(session_id).await?;
        if config.token_withheld() {
            config.token = existing
                .as_ref()
                .map(|stored| stored.token.clone())
                .unwrap_or_default();
        }
        config.validate()?;

        let now = Utc::now();
        config.updated_at = now;
        match existing {
            Some(existing) => {
                config.created_at = existing.created_at;
                self.repo.update(&config).await?;
            }
            None => {
                config.created_at = now;
                self.repo.create(&config).await?;
            }
        }

        if config.enabled {
            self.register_instance(session_id, config.clone())?;
        } else {
            self.unregister_instance(session_id);
        }
        info!(session_id, enabled = config.enabled, "Chatwoot configuration saved");
        Ok(config)
    }

    pub async fn get_config(&self, session_id: &str) -> Result<Option<ChatwootConfig>> {
        Ok(self.repo.get_by_session_id(session_id).await?)
    }

    /// Remove stored configuration and stop the bridge. Returns whether anything existed.
    pub async fn delete_config(&self, session_id: &str) -> Result<bool> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let stored = self.repo.delete(session_id).await?;
        let running = self.unregister_instance(session_id);
        Ok(stored || running)
    }

    /// Register a bridge for every enabled stored configuration
    pub async fn load_all(&self) -> Result<usize> {
        let configs = self.repo.list().await?;
        let mut loaded = 0;

        for config in configs.into_iter().filter(|c| c.enabled) {
            let session_id = config.session_id.clone();
            match self.register_instance(&session_id, config) {
                Ok(_) => loaded += 1,
                Err(e) => warn!(
                    session_id = %session_id,
                    error = %e,
                    "Stored Chatwoot configuration is unusable, skipping"
                ),
            }
        }

        info!(count = loaded, "Chatwoot integrations loaded");
        Ok(loaded)
    }

    /// Check credentials and inbox against the Chatwoot account without saving anything
    pub async fn test_connection(&self, config: &ChatwootConfig) -> Result<ConnectionCheck> {
        let mut candidate = config.clone();
        candidate.enabled = true;
        candidate.validate()?;

        let client = ChatwootClient::new(&candidate, self.timeout)?;
        let inboxes = client.list_inboxes().await?;
        let inbox = inboxes.iter().find(|i| i.name == candidate.inbox_name());

        Ok(ConnectionCheck {
            inbox_count: inboxes.len(),
            inbox_found: inbox.is_some(),
            inbox_id: inbox.map(|i| i.id),
        })
    }
}

impl EventSink for IntegrationRegistry {
    fn name(&self) -> &'static str {
        "chatwoot"
    }

    fn deliver(&self, event: Arc<SessionEvent>) {
        if !matches!(
            event.event,
            ProtocolEvent::Message(_) | ProtocolEvent::HistorySync(_)
        ) {
            return;
        }
        if !self.instances.contains_key(&event.session_id) {
            return;
        }
        let session_id = event.session_id.clone();
        self.queues.push(&session_id, event);
    }
}
