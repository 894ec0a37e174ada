//! Single-attempt webhook delivery
//!
//! One POST per event with a bounded timeout. A failed attempt is logged by
//! the caller and the event dropped; there is no retry queue.

use std::time::Duration;

use reqwest::Client;
use zd_core::SessionEvent;

use crate::error::{Result, WebhookError};

#[derive(Clone)]
pub struct WebhookDelivery {
    client: Client,
}

impl WebhookDelivery {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zapdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// POST the event's JSON body to `url`
    pub async fn deliver(&self, url: &str, event: &SessionEvent) -> Result<()> {
        let payload = event.to_webhook_body()?;
        self.try_send(url, &payload).await
    }

    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<()> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}
