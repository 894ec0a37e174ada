//! zd-api: HTTP API for the zapdesk gateway
//!
//! REST endpoints for session lifecycle, messaging, outbound webhooks and
//! the Chatwoot integration. Built with axum.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use error::{ApiError, Result};
pub use server::{AppState, app, start_server};
