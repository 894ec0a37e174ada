//! Webhook dispatcher
//!
//! Holds each session's subscription in memory (backed by the webhook
//! repository) and fans matching events out through a per-session queue,
//! so one slow or failing target never holds up the next event.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use zd_core::config::WebhookConfig;
use zd_core::{
    EventSink, KeyedQueues, QueueHandler, SessionEvent, WebhookRepository, WebhookSubscription,
};

use crate::delivery::WebhookDelivery;
use crate::error::{Result, WebhookError};
use crate::events::{EventFilter, validate_events};

#[derive(Clone)]
struct Subscription {
    record: WebhookSubscription,
    filter: EventFilter,
}

impl Subscription {
    fn new(record: WebhookSubscription) -> Self {
        let filter = EventFilter::from_names(&record.events);
        Self { record, filter }
    }
}

struct Job {
    url: String,
    event: Arc<SessionEvent>,
}

struct DeliveryWorker {
    delivery: WebhookDelivery,
}

#[async_trait]
impl QueueHandler<Job> for DeliveryWorker {
    async fn handle(&self, session_id: &str, job: Job) {
        let event_type = job.event.event_type();
        match self.delivery.deliver(&job.url, &job.event).await {
            Ok(()) => debug!(session_id, event = %event_type, "Webhook delivered"),
            Err(e) => warn!(
                session_id,
                event = %event_type,
                url = %job.url,
                error = %e,
                "Webhook delivery failed, event dropped"
            ),
        }
    }
}

pub struct WebhookDispatcher {
    subscriptions: DashMap<String, Subscription>,
    queues: KeyedQueues<Job>,
    repo: Arc<dyn WebhookRepository>,
}

impl WebhookDispatcher {
    pub fn new(repo: Arc<dyn WebhookRepository>, config: &WebhookConfig) -> Result<Self> {
        let worker = DeliveryWorker {
            delivery: WebhookDelivery::new(config.timeout())?,
        };
        Ok(Self {
            subscriptions: DashMap::new(),
            queues: KeyedQueues::new("webhook", config.queue_capacity, Arc::new(worker)),
            repo,
        })
    }

    /// Replace the session's subscription.
    ///
    /// Nothing is stored unless the URL and every event name are valid.
    pub async fn set_webhook(
        &self,
        session_id: &str,
        url: &str,
        events: &[String],
    ) -> Result<WebhookSubscription> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(WebhookError::InvalidUrl(url.to_string()));
        }
        let events = validate_events(events)?;

        let record = WebhookSubscription::new(session_id, url, events);
        self.repo.upsert(&record).await?;
        self.subscriptions
            .insert(session_id.to_string(), Subscription::new(record.clone()));

        info!(session_id, url, events = ?record.events, "Webhook configured");
        Ok(record)
    }

    pub fn get_webhook(&self, session_id: &str) -> Option<WebhookSubscription> {
        self.subscriptions
            .get(session_id)
            .map(|s| s.record.clone())
    }

    /// Remove the subscription. Returns whether one existed.
    pub async fn delete_webhook(&self, session_id: &str) -> Result<bool> {
        let stored = self.repo.delete(session_id).await?;
        let cached = self.subscriptions.remove(session_id).is_some();
        self.queues.remove(session_id);

        if stored || cached {
            info!(session_id, "Webhook removed");
        }
        Ok(stored || cached)
    }

    /// Hydrate subscriptions from the repository
    pub async fn load_all(&self) -> Result<usize> {
        let records = self.repo.list().await?;
        let mut loaded = 0;

        for record in records {
            let subscription = Subscription::new(record);
            if subscription.filter.is_empty() {
                warn!(
                    session_id = %subscription.record.session_id,
                    "Stored webhook has no usable events, skipping"
                );
                continue;
            }
            self.subscriptions
                .insert(subscription.record.session_id.clone(), subscription);
            loaded += 1;
        }

        info!(count = loaded, "Webhook subscriptions loaded");
        Ok(loaded)
    }

    /// Queue the event for delivery when the session subscribes to it.
    /// Returns whether it was queued.
    pub fn dispatch(&self, event: Arc<SessionEvent>) -> bool {
        let url = match self.subscriptions.get(&event.session_id) {
            Some(sub) if sub.filter.matches(event.event_type()) => sub.record.url.clone(),
            _ => return false,
        };

        let session_id = event.session_id.clone();
        self.queues.push(&session_id, Job { url, event });
        true
    }
}

impl EventSink for WebhookDispatcher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn deliver(&self, event: Arc<SessionEvent>) {
        self.dispatch(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zd_core::event::{MessageContent, MessageEvent};
    use zd_core::{ProtocolEvent, SessionService, SqliteRepository};

    async fn setup() -> (WebhookDispatcher, Arc<dyn WebhookRepository>, String) {
        let repo = Arc::new(SqliteRepository::in_memory().unwrap());
        let sessions = SessionService::new(repo.clone());
        let session = sessions.create_session("support").await.unwrap();

        let webhooks: Arc<dyn WebhookRepository> = repo;
        let config = WebhookConfig {
            timeout_secs: 2,
            queue_capacity: 16,
        };
        let dispatcher = WebhookDispatcher::new(webhooks.clone(), &config).unwrap();
        (dispatcher, webhooks, session.id)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn message(session_id: &str, id: &str, from_me: bool) -> Arc<SessionEvent> {
        Arc::new(SessionEvent::new(
            session_id,
            ProtocolEvent::Message(MessageEvent {
                id: id.to_string(),
                chat_jid: "15551234567@s.whatsapp.net".to_string(),
                sender_jid: "15551234567@s.whatsapp.net".to_string(),
                push_name: None,
                from_me,
                is_group: false,
                timestamp: chrono::Utc::now(),
                content: MessageContent::Text {
                    body: "hi".to_string(),
                },
                quoted_id: None,
            }),
        ))
    }

    async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<wiremock::Request> {
        for _ in 0..200 {
            let received = server.received_requests().await.unwrap_or_default();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        server.received_requests().await.unwrap_or_default()
    }

    #[tokio::test]
    async fn test_invalid_event_persists_nothing() {
        let (dispatcher, repo, session_id) = setup().await;

        let err = dispatcher
            .set_webhook(
                &session_id,
                "https://hooks.example/x",
                &names(&["message.any", "bogus.event"]),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::InvalidEvent(ref name) if name == "bogus.event"));
        assert!(dispatcher.get_webhook(&session_id).is_none());
        assert!(repo.get(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_http_url() {
        let (dispatcher, _, session_id) = setup().await;
        let err = dispatcher
            .set_webhook(&session_id, "ftp://x", &names(&["all"]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_set_get_delete_and_reload() {
        let (dispatcher, repo, session_id) = setup().await;
        dispatcher
            .set_webhook(&session_id, "https://hooks.example/x", &names(&["message.any"]))
            .await
            .unwrap();

        let stored = dispatcher.get_webhook(&session_id).unwrap();
        assert_eq!(stored.events, names(&["message.any"]));

        let config = WebhookConfig {
            timeout_secs: 2,
            queue_capacity: 16,
        };
        let fresh = WebhookDispatcher::new(repo.clone(), &config).unwrap();
        assert_eq!(fresh.load_all().await.unwrap(), 1);
        assert_eq!(fresh.get_webhook(&session_id).unwrap().url, "https://hooks.example/x");

        assert!(dispatcher.delete_webhook(&session_id).await.unwrap());
        assert!(!dispatcher.delete_webhook(&session_id).await.unwrap());
        assert!(repo.get(&session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_respects_subscription() {
        let (dispatcher, _, session_id) = setup().await;
        assert!(!dispatcher.dispatch(message(&session_id, "A", false)));

        dispatcher
            .set_webhook(&session_id, "http://127.0.0.1:9/x", &names(&["message.received"]))
            .await
            .unwrap();
        assert!(dispatcher.dispatch(message(&session_id, "A", false)));
        assert!(!dispatcher.dispatch(message(&session_id, "B", true)));
        assert!(!dispatcher.dispatch(message("other-session", "C", false)));
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_next_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (dispatcher, _, session_id) = setup().await;
        dispatcher
            .set_webhook(&session_id, &server.uri(), &names(&["all"]))
            .await
            .unwrap();

        dispatcher.deliver(message(&session_id, "N", false));
        dispatcher.deliver(message(&session_id, "N1", false));

        let received = wait_for_requests(&server, 2).await;
        assert_eq!(received.len(), 2);

        let ids: Vec<String> = received
            .iter()
            .map(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["data"]["id"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(ids, vec!["N", "N1"]);
    }
}
