//! Error types for zd-chatwoot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatwootError {
    /// Non-2xx answer from the Chatwoot API
    #[error("Chatwoot API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse Chatwoot response: {0}")]
    Parse(String),

    /// Inbound webhook body is not usable JSON
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Inbox not found: {0}")]
    InboxNotFound(String),

    #[error("No Chatwoot integration registered for session {0}")]
    NotRegistered(String),

    #[error(transparent)]
    WhatsApp(#[from] zd_whatsapp::WhatsAppError),

    #[error(transparent)]
    Core(#[from] zd_core::Error),
}

impl ChatwootError {
    /// Failure reported by or on the way to Chatwoot itself
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ChatwootError::Api { .. } | ChatwootError::Http(_) | ChatwootError::Parse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChatwootError>;
