//! Protocol events emitted by a live WhatsApp connection
//!
//! Every variant is a typed struct; JSON is only produced at the outbound
//! boundary through [`SessionEvent::to_webhook_body`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical event type names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    MessageReceived,
    MessageSent,
    ReceiptDelivered,
    ReceiptRead,
    PresenceUpdate,
    ChatPresence,
    ConnectionQr,
    ConnectionPairSuccess,
    ConnectionConnected,
    ConnectionDisconnected,
    ConnectionLoggedOut,
    HistorySync,
    CallOffer,
    GroupUpdate,
}

impl EventType {
    pub const ALL: [EventType; 14] = [
        EventType::MessageReceived,
        EventType::MessageSent,
        EventType::ReceiptDelivered,
        EventType::ReceiptRead,
        EventType::PresenceUpdate,
        EventType::ChatPresence,
        EventType::ConnectionQr,
        EventType::ConnectionPairSuccess,
        EventType::ConnectionConnected,
        EventType::ConnectionDisconnected,
        EventType::ConnectionLoggedOut,
        EventType::HistorySync,
        EventType::CallOffer,
        EventType::GroupUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageReceived => "message.received",
            EventType::MessageSent => "message.sent",
            EventType::ReceiptDelivered => "receipt.delivered",
            EventType::ReceiptRead => "receipt.read",
            EventType::PresenceUpdate => "presence.update",
            EventType::ChatPresence => "chat.presence",
            EventType::ConnectionQr => "connection.qr",
            EventType::ConnectionPairSuccess => "connection.pair_success",
            EventType::ConnectionConnected => "connection.connected",
            EventType::ConnectionDisconnected => "connection.disconnected",
            EventType::ConnectionLoggedOut => "connection.logged_out",
            EventType::HistorySync => "history.sync",
            EventType::CallOffer => "call.offer",
            EventType::GroupUpdate => "group.update",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn is_message(&self) -> bool {
        matches!(self, EventType::MessageReceived | EventType::MessageSent)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
    Sticker,
}

impl MediaKind {
    pub fn default_mimetype(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Audio => "audio/ogg",
            MediaKind::Video => "video/mp4",
            MediaKind::Document => "application/octet-stream",
            MediaKind::Sticker => "image/webp",
        }
    }
}

/// Downloadable media attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Opaque reference understood by the client's `download_media`
    pub media_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
}

impl MediaInfo {
    /// File name to use when uploading, derived from kind and mimetype when absent
    pub fn upload_filename(&self, message_id: &str) -> String {
        if let Some(name) = self.filename.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let ext = self
            .mimetype
            .split(';')
            .next()
            .and_then(|m| m.split('/').nth(1))
            .unwrap_or("bin");
        format!("{}.{}", message_id, ext)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        body: String,
    },
    Media(MediaInfo),
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        name: Option<String>,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    Poll {
        name: String,
        options: Vec<String>,
    },
    Unsupported {
        kind: String,
    },
}

impl MessageContent {
    /// Human-readable rendering used when a text representation is needed
    pub fn display_text(&self) -> Option<String> {
        match self {
            MessageContent::Text { body } => Some(body.clone()),
            MessageContent::Media(media) => media.caption.clone(),
            MessageContent::Location {
                latitude,
                longitude,
                name,
            } => {
                let link = format!("https://maps.google.com/?q={},{}", latitude, longitude);
                Some(match name {
                    Some(name) if !name.is_empty() => format!("{}\n{}", name, link),
                    _ => link,
                })
            }
            MessageContent::Contact { display_name, vcard } => {
                let phone = vcard
                    .lines()
                    .find(|l| l.starts_with("TEL"))
                    .and_then(|l| l.rsplit(':').next())
                    .unwrap_or_default();
                Some(format!("{}\n{}", display_name, phone).trim().to_string())
            }
            MessageContent::Poll { name, options } => {
                let mut text = name.clone();
                for option in options {
                    text.push_str("\n- ");
                    text.push_str(option);
                }
                Some(text)
            }
            MessageContent::Reaction { .. } | MessageContent::Unsupported { .. } => None,
        }
    }

    pub fn media(&self) -> Option<&MediaInfo> {
        match self {
            MessageContent::Media(media) => Some(media),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    /// Chat the message belongs to (user JID or group JID)
    pub chat_jid: String,
    /// Author; equals `chat_jid` outside groups
    pub sender_jid: String,
    #[serde(default)]
    pub push_name: Option<String>,
    pub from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
    #[serde(default)]
    pub quoted_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    Delivered,
    Read,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptEvent {
    pub chat_jid: String,
    pub sender_jid: String,
    pub message_ids: Vec<String>,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub jid: String,
    pub available: bool,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPresenceEvent {
    pub chat_jid: String,
    pub sender_jid: String,
    /// `composing` or `paused`
    pub state: String,
    #[serde(default)]
    pub media: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySyncEvent {
    pub messages: Vec<MessageEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOfferEvent {
    pub call_id: String,
    pub from_jid: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdateEvent {
    pub group_jid: String,
    /// `add`, `remove`, `promote`, `demote`, `subject`, ...
    pub action: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// One event delivered by the protocol client, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProtocolEvent {
    Qr { code: String },
    PairSuccess { device_jid: String },
    Connected,
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    LoggedOut {
        #[serde(default)]
        reason: Option<String>,
    },
    Message(MessageEvent),
    Receipt(ReceiptEvent),
    Presence(PresenceEvent),
    ChatPresence(ChatPresenceEvent),
    HistorySync(HistorySyncEvent),
    CallOffer(CallOfferEvent),
    GroupUpdate(GroupUpdateEvent),
}

impl ProtocolEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ProtocolEvent::Qr { .. } => EventType::ConnectionQr,
            ProtocolEvent::PairSuccess { .. } => EventType::ConnectionPairSuccess,
            ProtocolEvent::Connected => EventType::ConnectionConnected,
            ProtocolEvent::Disconnected { .. } => EventType::ConnectionDisconnected,
            ProtocolEvent::LoggedOut { .. } => EventType::ConnectionLoggedOut,
            ProtocolEvent::Message(msg) if msg.from_me => EventType::MessageSent,
            ProtocolEvent::Message(_) => EventType::MessageReceived,
            ProtocolEvent::Receipt(r) if r.kind == ReceiptKind::Read => EventType::ReceiptRead,
            ProtocolEvent::Receipt(_) => EventType::ReceiptDelivered,
            ProtocolEvent::Presence(_) => EventType::PresenceUpdate,
            ProtocolEvent::ChatPresence(_) => EventType::ChatPresence,
            ProtocolEvent::HistorySync(_) => EventType::HistorySync,
            ProtocolEvent::CallOffer(_) => EventType::CallOffer,
            ProtocolEvent::GroupUpdate(_) => EventType::GroupUpdate,
        }
    }

    /// Event-specific payload without the type tag
    fn payload(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ProtocolEvent::Qr { code } => Ok(serde_json::json!({ "code": code })),
            ProtocolEvent::PairSuccess { device_jid } => {
                Ok(serde_json::json!({ "device_jid": device_jid }))
            }
            ProtocolEvent::Connected => Ok(serde_json::json!({})),
            ProtocolEvent::Disconnected { reason } | ProtocolEvent::LoggedOut { reason } => {
                Ok(serde_json::json!({ "reason": reason }))
            }
            ProtocolEvent::Message(e) => serde_json::to_value(e),
            ProtocolEvent::Receipt(e) => serde_json::to_value(e),
            ProtocolEvent::Presence(e) => serde_json::to_value(e),
            ProtocolEvent::ChatPresence(e) => serde_json::to_value(e),
            ProtocolEvent::HistorySync(e) => serde_json::to_value(e),
            ProtocolEvent::CallOffer(e) => serde_json::to_value(e),
            ProtocolEvent::GroupUpdate(e) => serde_json::to_value(e),
        }
    }
}

/// A protocol event tagged with the session that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    pub received_at: DateTime<Utc>,
    pub event: ProtocolEvent,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, event: ProtocolEvent) -> Self {
        Self {
            session_id: session_id.into(),
            received_at: Utc::now(),
            event,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.event.event_type()
    }

    /// Body POSTed to subscribed webhooks
    pub fn to_webhook_body(&self) -> serde_json::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "event": self.event_type().as_str(),
            "session_id": self.session_id,
            "timestamp": self.received_at,
            "data": self.event.payload()?,
        }))
    }
}

/// Consumer of session events.
///
/// `deliver` is called from the session's event worker and must return
/// without waiting on network I/O.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn deliver(&self, event: Arc<SessionEvent>);
}
