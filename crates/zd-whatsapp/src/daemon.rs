//! Protocol daemon REST client
//!
//! Talks to the companion daemon that owns the WhatsApp multi-device
//! connections. Each session maps to `{base}/v1/sessions/{id}`; events are
//! collected by long-polling `/events` from a background task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zd_core::config::DaemonConfig;
use zd_core::event::MediaInfo;
use zd_core::{ProtocolEvent, Session};

use crate::client::{ClientConnection, ClientFactory, WhatsAppClient};
use crate::error::{Result, WhatsAppError};
use crate::message::{SendReceipt, SendRequest};

/// Buffered events per session before the poller waits on the consumer
const EVENT_BUFFER: usize = 256;

#[derive(Deserialize)]
struct StatusResponse {
    logged_in: bool,
}

#[derive(Deserialize)]
struct PairResponse {
    code: String,
}

/// REST client for one session on the daemon
#[derive(Clone)]
pub struct DaemonClient {
    client: Client,
    session_url: String,
    device_jid: Option<String>,
}

impl DaemonClient {
    pub fn new(client: Client, base_url: &str, session: &Session) -> Self {
        Self {
            client,
            session_url: format!(
                "{}/v1/sessions/{}",
                base_url.trim_end_matches('/'),
                session.id
            ),
            device_jid: session.bound_device().map(str::to_string),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.session_url, path)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Daemon request failed: {} - {}", status, body);
        Err(WhatsAppError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn post_empty(&self, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| WhatsAppError::Parse(e.to_string()))
    }

    /// Fetch pending events, waiting up to `wait` on the daemon side
    pub async fn poll_events(&self, wait: Duration) -> Result<Vec<ProtocolEvent>> {
        let response = self
            .client
            .get(self.url("events"))
            .query(&[("timeout_ms", wait.as_millis() as u64)])
            .send()
            .await?;
        Self::parse(response).await
    }
}

#[async_trait]
impl WhatsAppClient for DaemonClient {
    async fn connect(&self) -> Result<()> {
        debug!(url = %self.session_url, "Connecting session on daemon");
        self.post_empty(
            "connect",
            serde_json::json!({ "device_jid": self.device_jid }),
        )
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.post_empty("disconnect", serde_json::json!({})).await
    }

    async fn logout(&self) -> Result<()> {
        self.post_empty("logout", serde_json::json!({})).await
    }

    async fn is_logged_in(&self) -> Result<bool> {
        let response = self.client.get(self.url("status")).send().await?;
        let status: StatusResponse = Self::parse(response).await?;
        Ok(status.logged_in)
    }

    async fn pair_phone(&self, phone: &str) -> Result<String> {
        let response = self
            .client
            .post(self.url("pair"))
            .json(&serde_json::json!({ "phone": phone }))
            .send()
            .await?;
        let pair: PairResponse = Self::parse(response).await?;
        Ok(pair.code)
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt> {
        let response = self.client.post(self.url("send")).json(request).send().await?;
        let receipt: SendReceipt = Self::parse(response).await?;
        info!(to = %request.to, id = %receipt.id, kind = request.content.kind(), "Message sent");
        Ok(receipt)
    }

    async fn download_media(&self, media: &MediaInfo) -> Result<Vec<u8>> {
        let response = self.client.post(self.url("media")).json(media).send().await?;
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Creates [`DaemonClient`]s and runs their event pollers
pub struct DaemonClientFactory {
    client: Client,
    base_url: String,
    poll_interval: Duration,
}

impl DaemonClientFactory {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        // Long polls must fit inside the request timeout.
        let client = Client::builder()
            .timeout(config.request_timeout() + config.poll_interval())
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval(),
        })
    }
}

#[async_trait]
impl ClientFactory for DaemonClientFactory {
    async fn create(
        &self,
        session: &Session,
        cancel: CancellationToken,
    ) -> Result<ClientConnection> {
        let client = DaemonClient::new(self.client.clone(), &self.base_url, session);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(poll_loop(
            client.clone(),
            tx,
            cancel,
            self.poll_interval,
        ));

        Ok(ClientConnection {
            client: Arc::new(client),
            events: rx,
        })
    }
}

async fn poll_loop(
    client: DaemonClient,
    tx: mpsc::Sender<ProtocolEvent>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let wait = interval.max(Duration::from_secs(1)) * 20;
    debug!(url = %client.session_url, "Event poller started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.poll_events(wait) => result,
        };

        match batch {
            Ok(events) if events.is_empty() => {}
            Ok(events) => {
                for event in events {
                    if tx.send(event).await.is_err() {
                        debug!(url = %client.session_url, "Event receiver dropped");
                        return;
                    }
                }
                continue;
            }
            Err(e) => warn!(url = %client.session_url, "Event poll failed: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    debug!(url = %client.session_url, "Event poller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> Session {
        let mut session = Session::new("support");
        session.id = "s1".to_string();
        session
    }

    fn config(url: &str) -> DaemonConfig {
        DaemonConfig {
            url: url.to_string(),
            poll_interval_ms: 10,
            request_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_send_returns_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "3EB0ABC",
                "timestamp": "2024-05-01T12:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = DaemonClient::new(Client::new(), &server.uri(), &session());
        let request = SendRequest::text("15551234567@s.whatsapp.net", "hi");
        let receipt = client.send(&request).await.unwrap();
        assert_eq!(receipt.id, "3EB0ABC");
    }

    #[tokio::test]
    async fn test_pair_phone_posts_number() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/pair"))
            .and(body_json(serde_json::json!({ "phone": "15551234567" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "code": "WXYZ-1234" })),
            )
            .mount(&server)
            .await;

        let client = DaemonClient::new(Client::new(), &server.uri(), &session());
        assert_eq!(client.pair_phone("15551234567").await.unwrap(), "WXYZ-1234");
    }

    #[tokio::test]
    async fn test_error_status_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/sessions/s1/connect"))
            .respond_with(ResponseTemplate::new(503).set_body_string("store locked"))
            .mount(&server)
            .await;

        let client = DaemonClient::new(Client::new(), &server.uri(), &session());
        match client.connect().await {
            Err(WhatsAppError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "store locked");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_factory_streams_polled_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "type": "qr", "data": { "code": "2@abc" } },
                { "type": "connected" }
            ])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sessions/s1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let factory = DaemonClientFactory::new(&config(&server.uri())).unwrap();
        let cancel = CancellationToken::new();
        let mut conn = factory.create(&session(), cancel.clone()).await.unwrap();

        let first = conn.events.recv().await.unwrap();
        assert_eq!(
            first,
            ProtocolEvent::Qr {
                code: "2@abc".to_string()
            }
        );
        assert_eq!(conn.events.recv().await.unwrap(), ProtocolEvent::Connected);

        cancel.cancel();
    }
}
