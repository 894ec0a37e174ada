//! Chatwoot REST API shapes

use serde::{Deserialize, Serialize};

/// Direction of a Chatwoot message relative to the inbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    /// Customer to agent (WhatsApp -> Chatwoot)
    Incoming,
    /// Agent to customer (Chatwoot -> WhatsApp)
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Incoming => "incoming",
            MessageDirection::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Inbox {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub inbox_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Conversation {
    pub fn is_resolved(&self) -> bool {
        self.status.as_deref() == Some("resolved")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Message {
    pub id: i64,
}

/// List endpoints wrap results in `payload`
#[derive(Debug, Deserialize)]
pub(crate) struct Payload<T> {
    pub payload: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ContactInbox {
    #[serde(default)]
    pub source_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedContact {
    pub contact: Contact,
    #[serde(default)]
    pub contact_inbox: Option<ContactInbox>,
}

/// Contact creation answers differ between Chatwoot versions
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ContactEnvelope {
    Nested { payload: CreatedContact },
    Flat { payload: Contact },
    Bare(Contact),
}

impl ContactEnvelope {
    pub fn into_parts(self) -> (Contact, Option<String>) {
        match self {
            ContactEnvelope::Nested { payload } => (
                payload.contact,
                payload.contact_inbox.and_then(|ci| ci.source_id),
            ),
            ContactEnvelope::Flat { payload } => (payload, None),
            ContactEnvelope::Bare(contact) => (contact, None),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewContact {
    pub inbox_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    pub inbox_id: i64,
    pub contact_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub message_type: MessageDirection,
    pub private: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_attributes: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(content: impl Into<String>, direction: MessageDirection) -> Self {
        Self {
            content: content.into(),
            message_type: direction,
            private: false,
            source_id: None,
            content_attributes: None,
        }
    }
}
