//! Error types for zd-core

use thiserror::Error;

/// Main error type for zd-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session name already taken: {0}")]
    SessionNameTaken(String),

    #[error("Device {device_jid} is already in use by session {session_id}")]
    DeviceAlreadyInUse {
        device_jid: String,
        session_id: String,
    },

    #[error("Invalid Chatwoot configuration: {0}")]
    ConfigInvalid(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for zd-core
pub type Result<T> = std::result::Result<T, Error>;
