//! Inbound Chatwoot webhook parsing
//!
//! Chatwoot sends loosely typed JSON: `message_type` may be a string or a
//! number, `created_at` an RFC 3339 string or unix seconds. Everything is
//! normalized here so the rest of the crate only sees typed values.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ChatwootError, Result};
use crate::types::MessageDirection;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookContact {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookAttachment {
    pub id: Option<i64>,
    pub file_type: String,
    pub data_url: String,
    pub file_size: Option<u64>,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebhookMessage {
    pub id: Option<i64>,
    pub content: Option<String>,
    pub private: bool,
    pub source_id: Option<String>,
    pub content_type: Option<String>,
    pub direction: Option<MessageDirection>,
    pub created_at: Option<DateTime<Utc>>,
    pub contact: Option<WebhookContact>,
    pub conversation_id: Option<i64>,
    pub inbox_id: Option<i64>,
    pub attachments: Vec<WebhookAttachment>,
    /// Agent who wrote the message
    pub sender_name: Option<String>,
    /// WhatsApp id of the message this one replies to
    pub in_reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatwootEvent {
    MessageCreated(WebhookMessage),
    MessageUpdated(WebhookMessage),
    ConversationStatusChanged {
        conversation_id: Option<i64>,
        status: Option<String>,
    },
    /// Any other event name, accepted and ignored
    Other(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContact {
    id: Option<Value>,
    name: Option<String>,
    phone_number: Option<String>,
    email: Option<String>,
    identifier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMeta {
    sender: Option<RawContact>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConversation {
    id: Option<Value>,
    inbox_id: Option<Value>,
    status: Option<String>,
    contact: Option<RawContact>,
    meta: Option<RawMeta>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttachment {
    id: Option<Value>,
    file_type: Option<String>,
    data_url: Option<String>,
    file_size: Option<Value>,
    fallback: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSender {
    name: Option<String>,
    available_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPayload {
    event: Option<String>,
    id: Option<Value>,
    content: Option<String>,
    private: Option<bool>,
    source_id: Option<String>,
    content_type: Option<String>,
    content_attributes: Option<Value>,
    message_type: Option<Value>,
    created_at: Option<Value>,
    status: Option<String>,
    contact: Option<RawContact>,
    conversation: Option<RawConversation>,
    attachments: Option<Vec<RawAttachment>>,
    sender: Option<RawSender>,
    inbox: Option<Value>,
}

/// Parse a webhook body into a typed event
pub fn parse_webhook(body: &[u8]) -> Result<ChatwootEvent> {
    let raw: RawPayload =
        serde_json::from_slice(body).map_err(|e| ChatwootError::InvalidPayload(e.to_string()))?;

    let event = raw
        .event
        .clone()
        .ok_or_else(|| ChatwootError::InvalidPayload("missing event field".to_string()))?;

    Ok(match event.as_str() {
        "message_created" => ChatwootEvent::MessageCreated(message_from_raw(raw)),
        "message_updated" => ChatwootEvent::MessageUpdated(message_from_raw(raw)),
        "conversation_status_changed" => {
            // Conversation events carry the conversation at the top level.
            let conversation_id = raw
                .id
                .as_ref()
                .and_then(as_i64)
                .or_else(|| raw.conversation.as_ref().and_then(|c| c.id.as_ref()).and_then(as_i64));
            ChatwootEvent::ConversationStatusChanged {
                conversation_id,
                status: raw.status.or_else(|| raw.conversation.and_then(|c| c.status)),
            }
        }
        _ => ChatwootEvent::Other(event),
    })
}

fn message_from_raw(raw: RawPayload) -> WebhookMessage {
    let direction = raw.message_type.as_ref().and_then(parse_direction);
    let created_at = raw.created_at.as_ref().and_then(parse_timestamp);
    let in_reply_to = raw
        .content_attributes
        .as_ref()
        .and_then(|attrs| attrs.get("in_reply_to_external_id"))
        .and_then(Value::as_str)
        .map(|id| id.trim_start_matches("WAID:").to_string());
    let sender_name = raw
        .sender
        .and_then(|s| s.available_name.or(s.name))
        .filter(|n| !n.trim().is_empty());

    let (conversation_id, inbox_id, contact) = match raw.conversation {
        Some(conversation) => {
            let conversation_id = conversation.id.as_ref().and_then(as_i64);
            let inbox_id = conversation.inbox_id.as_ref().and_then(as_i64);
            let fallback = conversation
                .contact
                .or_else(|| conversation.meta.and_then(|m| m.sender));
            (conversation_id, inbox_id, raw.contact.or(fallback))
        }
        None => (None, None, raw.contact),
    };
    let inbox_id = inbox_id.or_else(|| {
        raw.inbox
            .as_ref()
            .and_then(|i| i.get("id").and_then(as_i64).or_else(|| as_i64(i)))
    });

    let attachments = raw
        .attachments
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| {
            let data_url = a.data_url.filter(|u| !u.is_empty())?;
            Some(WebhookAttachment {
                id: a.id.as_ref().and_then(as_i64),
                file_type: a.file_type.unwrap_or_else(|| "file".to_string()),
                data_url,
                file_size: a.file_size.as_ref().and_then(as_i64).map(|s| s.max(0) as u64),
                fallback: a.fallback.and_then(|f| match f {
                    Value::String(s) => Some(s),
                    Value::Null => None,
                    other => Some(other.to_string()),
                }),
            })
        })
        .collect();

    WebhookMessage {
        id: raw.id.as_ref().and_then(as_i64),
        content: raw.content,
        private: raw.private.unwrap_or(false),
        source_id: raw.source_id.filter(|s| !s.is_empty()),
        content_type: raw.content_type,
        direction,
        created_at,
        contact: contact.map(contact_from_raw),
        conversation_id,
        inbox_id,
        attachments,
        sender_name,
        in_reply_to,
    }
}

fn contact_from_raw(raw: RawContact) -> WebhookContact {
    let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
    WebhookContact {
        id: raw.id.as_ref().and_then(as_i64),
        name: non_empty(raw.name),
        phone_number: non_empty(raw.phone_number),
        email: non_empty(raw.email),
        identifier: non_empty(raw.identifier),
    }
}

/// Integer from a JSON number (int or float) or numeric string
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `"incoming"`/`"outgoing"` or `0`/`1`; other values (activity, template) yield None
pub fn parse_direction(value: &Value) -> Option<MessageDirection> {
    match value {
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "incoming" | "0" => Some(MessageDirection::Incoming),
            "outgoing" | "1" => Some(MessageDirection::Outgoing),
            _ => None,
        },
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Some(MessageDirection::Incoming),
            Some(f) if f == 1.0 => Some(MessageDirection::Outgoing),
            _ => None,
        },
        _ => None,
    }
}

/// RFC 3339 string or unix seconds (int, float or numeric string)
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(from_unix)),
        Value::Number(n) => n.as_f64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.trunc() as i64;
    let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
    Utc.timestamp_opt(whole, nanos.min(999_999_999)).single()
}
