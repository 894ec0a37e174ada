//! Route definitions
//!
//! Management routes sit behind the admin key; the Chatwoot callback and
//! health check do not.

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers::{chatwoot, health, sessions, webhook};
use crate::middleware::auth::auth_middleware;
use crate::server::AppState;

/// Create the API router
pub fn routes(state: AppState) -> Router<AppState> {
    let management = Router::new()
        // Sessions
        .route(
            "/sessions",
            post(sessions::create_session).get(sessions::list_sessions),
        )
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        // Connection lifecycle
        .route("/sessions/{id}/connect", post(sessions::connect))
        .route("/sessions/{id}/disconnect", post(sessions::disconnect))
        .route("/sessions/{id}/logout", post(sessions::logout))
        .route("/sessions/{id}/status", get(sessions::status))
        .route("/sessions/{id}/qr", get(sessions::qr_code))
        .route("/sessions/{id}/pair", post(sessions::pair_phone))
        // Messaging
        .route("/sessions/{id}/messages", post(sessions::send_message))
        // Outbound webhook
        .route(
            "/sessions/{id}/webhook",
            get(webhook::get_webhook)
                .put(webhook::set_webhook)
                .delete(webhook::delete_webhook),
        )
        .route("/webhook/events", get(webhook::list_events))
        // Chatwoot integration
        .route(
            "/sessions/{id}/chatwoot",
            get(chatwoot::get_config)
                .put(chatwoot::set_config)
                .delete(chatwoot::delete_config),
        )
        .route("/sessions/{id}/chatwoot/test", post(chatwoot::test_connection))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/chatwoot/webhook/{id}", post(chatwoot::chatwoot_webhook))
        .merge(management)
}
