//! Outgoing message requests
//!
//! One tagged variant per content type the protocol client can send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WhatsAppError};
use crate::jid;

/// Where media bytes come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSource {
    Url(String),
    Base64(String),
}

impl MediaSource {
    fn is_empty(&self) -> bool {
        match self {
            MediaSource::Url(s) | MediaSource::Base64(s) => s.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSection {
    pub title: String,
    pub rows: Vec<ListRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Button {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SendContent {
    Text {
        body: String,
    },
    Image {
        media: MediaSource,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Audio {
        media: MediaSource,
        /// Send as a voice note
        #[serde(default)]
        ptt: bool,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Video {
        media: MediaSource,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Document {
        media: MediaSource,
        filename: String,
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        mimetype: Option<String>,
    },
    Sticker {
        media: MediaSource,
    },
    Location {
        latitude: f64,
        longitude: f64,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        address: Option<String>,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Poll {
        name: String,
        options: Vec<String>,
        #[serde(default = "default_selectable")]
        selectable_count: u32,
    },
    List {
        title: String,
        description: String,
        button_text: String,
        #[serde(default)]
        footer: Option<String>,
        sections: Vec<ListSection>,
    },
    Buttons {
        body: String,
        #[serde(default)]
        footer: Option<String>,
        buttons: Vec<Button>,
    },
    /// Empty emoji removes an existing reaction
    Reaction {
        message_id: String,
        emoji: String,
    },
    Edit {
        message_id: String,
        body: String,
    },
    Delete {
        message_id: String,
    },
    Read {
        message_ids: Vec<String>,
        #[serde(default)]
        sender_jid: Option<String>,
    },
}

fn default_selectable() -> u32 {
    1
}

impl SendContent {
    pub fn kind(&self) -> &'static str {
        match self {
            SendContent::Text { .. } => "text",
            SendContent::Image { .. } => "image",
            SendContent::Audio { .. } => "audio",
            SendContent::Video { .. } => "video",
            SendContent::Document { .. } => "document",
            SendContent::Sticker { .. } => "sticker",
            SendContent::Location { .. } => "location",
            SendContent::Contact { .. } => "contact",
            SendContent::Poll { .. } => "poll",
            SendContent::List { .. } => "list",
            SendContent::Buttons { .. } => "buttons",
            SendContent::Reaction { .. } => "reaction",
            SendContent::Edit { .. } => "edit",
            SendContent::Delete { .. } => "delete",
            SendContent::Read { .. } => "read",
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(WhatsAppError::InvalidRequest(msg.to_string()));

        match self {
            SendContent::Text { body } if body.trim().is_empty() => invalid("text body is empty"),
            SendContent::Image { media, .. }
            | SendContent::Audio { media, .. }
            | SendContent::Video { media, .. }
            | SendContent::Sticker { media }
                if media.is_empty() =>
            {
                invalid("media source is empty")
            }
            SendContent::Document { media, filename, .. } => {
                if media.is_empty() {
                    invalid("media source is empty")
                } else if filename.trim().is_empty() {
                    invalid("document filename is empty")
                } else {
                    Ok(())
                }
            }
            SendContent::Location {
                latitude,
                longitude,
                ..
            } if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) => {
                invalid("coordinates out of range")
            }
            SendContent::Contact { vcard, .. } if !vcard.contains("BEGIN:VCARD") => {
                invalid("contact vcard is malformed")
            }
            SendContent::Poll {
                options,
                selectable_count,
                ..
            } => {
                if options.len() < 2 {
                    invalid("poll needs at least two options")
                } else if *selectable_count == 0 || *selectable_count as usize > options.len() {
                    invalid("poll selectable_count out of range")
                } else {
                    Ok(())
                }
            }
            SendContent::List { sections, .. }
                if sections.iter().all(|s| s.rows.is_empty()) =>
            {
                invalid("list needs at least one row")
            }
            SendContent::Buttons { buttons, .. } if buttons.is_empty() || buttons.len() > 3 => {
                invalid("buttons must have between one and three entries")
            }
            SendContent::Reaction { message_id, .. }
            | SendContent::Edit { message_id, .. }
            | SendContent::Delete { message_id }
                if message_id.trim().is_empty() =>
            {
                invalid("message_id is empty")
            }
            SendContent::Edit { body, .. } if body.trim().is_empty() => {
                invalid("edited body is empty")
            }
            SendContent::Read { message_ids, .. } if message_ids.is_empty() => {
                invalid("message_ids is empty")
            }
            _ => Ok(()),
        }
    }
}

/// A message to send through a session's client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Phone number or JID
    pub to: String,
    #[serde(flatten)]
    pub content: SendContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_id: Option<String>,
}

impl SendRequest {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            content: SendContent::Text { body: body.into() },
            quoted_id: None,
        }
    }

    /// Validate and rewrite `to` as a JID
    pub fn normalized(mut self) -> Result<Self> {
        self.to = jid::to_jid(&self.to)
            .ok_or_else(|| WhatsAppError::InvalidRequest(format!("invalid recipient: {}", self.to)))?;
        self.content.validate()?;
        Ok(self)
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_request_normalized() {
        let req = SendRequest::text("+1 555 123 4567", "hi").normalized().unwrap();
        assert_eq!(req.to, "15551234567@s.whatsapp.net");
    }

    #[test]
    fn test_deserialize_flattened_variant() {
        let req: SendRequest = serde_json::from_str(
            r#"{"to":"5511999999999","type":"image","media":{"url":"https://x/y.png"},"caption":"look"}"#,
        )
        .unwrap();
        match req.content {
            SendContent::Image { media, caption, .. } => {
                assert_eq!(media, MediaSource::Url("https://x/y.png".to_string()));
                assert_eq!(caption.as_deref(), Some("look"));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_recipient_and_empty_text() {
        assert!(SendRequest::text("nobody", "hi").normalized().is_err());
        assert!(SendRequest::text("5511", "  ").normalized().is_err());
    }

    #[test]
    fn test_poll_validation() {
        let req = SendRequest {
            to: "5511".to_string(),
            content: SendContent::Poll {
                name: "Lunch?".to_string(),
                options: vec!["Yes".to_string()],
                selectable_count: 1,
            },
            quoted_id: None,
        };
        assert!(matches!(
            req.normalized(),
            Err(WhatsAppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_reaction_removal_allowed() {
        let req = SendRequest {
            to: "5511".to_string(),
            content: SendContent::Reaction {
                message_id: "ABC".to_string(),
                emoji: String::new(),
            },
            quoted_id: None,
        };
        assert!(req.normalized().is_ok());
    }

    #[test]
    fn test_kind_names() {
        let content = SendContent::Delete {
            message_id: "ABC".to_string(),
        };
        assert_eq!(content.kind(), "delete");
    }
}
