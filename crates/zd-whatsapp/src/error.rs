//! Error types for zd-whatsapp

use thiserror::Error;

/// zd-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("Failed to start client: {0}")]
    ClientStartFailed(String),

    #[error("Failed to stop client: {0}")]
    ClientStopFailed(String),

    #[error("No QR code available")]
    NoQrAvailable,

    #[error("Session {0} is not started")]
    NotStarted(String),

    #[error("Session {0} is not connected")]
    NotConnected(String),

    #[error("Session {0} is already linked to a device")]
    AlreadyLinked(String),

    #[error("Invalid send request: {0}")]
    InvalidRequest(String),

    #[error("Daemon API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse daemon response: {0}")]
    Parse(String),

    #[error(transparent)]
    Core(#[from] zd_core::Error),
}

impl WhatsAppError {
    /// Device conflict raised by the registry's bind check
    pub fn is_device_conflict(&self) -> bool {
        matches!(self, WhatsAppError::Core(zd_core::Error::DeviceAlreadyInUse { .. }))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;
