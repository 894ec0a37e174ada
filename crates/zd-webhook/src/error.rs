//! Error types for zd-webhook

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("No valid events given")]
    InvalidEvents,

    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(String),

    /// Network, DNS or timeout failure
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] zd_core::Error),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
