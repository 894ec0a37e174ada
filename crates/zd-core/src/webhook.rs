//! Webhook subscription model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound webhook target and subscribed event names for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub session_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(session_id: impl Into<String>, url: impl Into<String>, events: Vec<String>) -> Self {
        Self {
            session_id: session_id.into(),
            url: url.into(),
            events,
            updated_at: Utc::now(),
        }
    }
}
