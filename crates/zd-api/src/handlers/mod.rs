//! HTTP API handlers
//!
//! Thin plumbing: resolve the session, call into the core, wrap the result
//! in the success envelope `{success, code, data}`.

pub mod chatwoot;
pub mod sessions;
pub mod webhook;

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

use crate::error::Result;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: u16,
    pub data: T,
}

pub type Reply<T> = Result<(StatusCode, Json<ApiResponse<T>>)>;

pub fn respond<T: Serialize>(status: StatusCode, data: T) -> Reply<T> {
    Ok((
        status,
        Json(ApiResponse {
            success: true,
            code: status.as_u16(),
            data,
        }),
    ))
}

pub fn ok<T: Serialize>(data: T) -> Reply<T> {
    respond(StatusCode::OK, data)
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}
