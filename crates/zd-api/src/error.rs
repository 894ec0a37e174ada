//! Error types for zd-api
//!
//! Every failure leaves the API as
//! `{"success": false, "code": <status>, "error": {"code", "message", "details"}}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{error, warn};
use zd_chatwoot::ChatwootError;
use zd_webhook::WebhookError;
use zd_whatsapp::WhatsAppError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication failed")]
    AuthFailed,

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Core(#[from] zd_core::Error),

    #[error(transparent)]
    WhatsApp(#[from] WhatsAppError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Chatwoot(#[from] ChatwootError),
}

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    code: u16,
    error: ErrorBody,
}

/// Status, machine-readable code and optional details for an error
type Classified = (StatusCode, &'static str, Option<Value>);

fn core(e: &zd_core::Error) -> Classified {
    use zd_core::Error;
    match e {
        Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", None),
        Error::SessionNameTaken(_) => (StatusCode::CONFLICT, "SESSION_NAME_TAKEN", None),
        Error::DeviceAlreadyInUse {
            device_jid,
            session_id,
        } => (
            StatusCode::CONFLICT,
            "DEVICE_ALREADY_IN_USE",
            Some(json!({ "device_jid": device_jid, "session_id": session_id })),
        ),
        Error::ConfigInvalid(_) => (StatusCode::BAD_REQUEST, "CONFIG_INVALID", None),
        Error::Validation(_) | Error::Json(_) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None)
        }
        Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", None),
        Error::Config(_) | Error::Io(_) | Error::Other(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
        }
    }
}

fn whatsapp(e: &WhatsAppError) -> Classified {
    match e {
        WhatsAppError::ClientStartFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "CLIENT_START_FAILED", None)
        }
        WhatsAppError::ClientStopFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "CLIENT_STOP_FAILED", None)
        }
        WhatsAppError::NoQrAvailable => (StatusCode::NOT_FOUND, "NO_QR_AVAILABLE", None),
        WhatsAppError::NotStarted(_) => (StatusCode::CONFLICT, "SESSION_NOT_STARTED", None),
        WhatsAppError::NotConnected(_) => (StatusCode::CONFLICT, "SESSION_NOT_CONNECTED", None),
        WhatsAppError::AlreadyLinked(_) => (StatusCode::CONFLICT, "SESSION_ALREADY_LINKED", None),
        WhatsAppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None),
        WhatsAppError::Api { status, .. } => (
            StatusCode::BAD_GATEWAY,
            "DAEMON_ERROR",
            Some(json!({ "status": status })),
        ),
        WhatsAppError::Http(_) | WhatsAppError::Parse(_) => {
            (StatusCode::BAD_GATEWAY, "DAEMON_ERROR", None)
        }
        WhatsAppError::Core(e) => core(e),
    }
}

fn webhook(e: &WebhookError) -> Classified {
    match e {
        WebhookError::InvalidEvent(name) => (
            StatusCode::BAD_REQUEST,
            "INVALID_EVENT",
            Some(json!({ "event": name, "supported": zd_webhook::supported_events() })),
        ),
        WebhookError::InvalidEvents => (
            StatusCode::BAD_REQUEST,
            "INVALID_EVENTS",
            Some(json!({ "supported": zd_webhook::supported_events() })),
        ),
        WebhookError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "INVALID_URL", None),
        WebhookError::Core(e) => core(e),
        WebhookError::Request(_) | WebhookError::HttpStatus(_) | WebhookError::Encode(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
        }
    }
}

fn chatwoot(e: &ChatwootError) -> Classified {
    match e {
        ChatwootError::Api { status, body } => (
            StatusCode::BAD_GATEWAY,
            "CHATWOOT_API_ERROR",
            Some(json!({ "status": status, "body": body })),
        ),
        ChatwootError::Http(_) | ChatwootError::Parse(_) => {
            (StatusCode::BAD_GATEWAY, "CHATWOOT_API_ERROR", None)
        }
        ChatwootError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD", None),
        ChatwootError::InboxNotFound(_) => (StatusCode::NOT_FOUND, "INBOX_NOT_FOUND", None),
        ChatwootError::NotRegistered(_) => {
            (StatusCode::NOT_FOUND, "INTEGRATION_NOT_FOUND", None)
        }
        ChatwootError::WhatsApp(e) => whatsapp(e),
        ChatwootError::Core(e) => core(e),
    }
}

impl ApiError {
    fn classify(&self) -> Classified {
        match self {
            ApiError::AuthFailed => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", None),
            ApiError::Core(e) => core(e),
            ApiError::WhatsApp(e) => whatsapp(e),
            ApiError::Webhook(e) => webhook(e),
            ApiError::Chatwoot(e) => chatwoot(e),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.classify().0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.classify();

        if status.is_server_error() {
            error!(code, error = %self, "Request failed");
        } else {
            warn!(code, error = %self, "Request rejected");
        }

        let body = ErrorEnvelope {
            success: false,
            code: status.as_u16(),
            error: ErrorBody {
                code,
                message: self.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
