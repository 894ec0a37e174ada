//! Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted connection status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Created,
    Connecting,
    Connected,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(SessionStatus::Created),
            "connecting" => Some(SessionStatus::Connecting),
            "connected" => Some(SessionStatus::Connected),
            "disconnected" => Some(SessionStatus::Disconnected),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tenant's WhatsApp login context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Stable opaque identifier
    pub id: String,
    /// Human alias, unique, resolvable to the id
    pub name: String,
    /// Per-session API key
    pub api_key: String,
    /// Protocol device JID, set after the first successful pairing
    pub device_jid: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session with a generated id and API key
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            name: name.into(),
            api_key: uuid::Uuid::new_v4().simple().to_string(),
            device_jid: None,
            status: SessionStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Device JID if the session has been paired
    pub fn bound_device(&self) -> Option<&str> {
        self.device_jid.as_deref().filter(|jid| !jid.is_empty())
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
