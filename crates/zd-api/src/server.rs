//! HTTP API Server
//!
//! Shared state, router assembly and the axum serve loop.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use zd_chatwoot::IntegrationRegistry;
use zd_core::{Config, Session, SessionService};
use zd_webhook::WebhookDispatcher;
use zd_whatsapp::ConnectionRegistry;

use crate::error::Result;
use crate::routes::routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionService,
    pub registry: ConnectionRegistry,
    pub webhooks: Arc<WebhookDispatcher>,
    pub chatwoot: Arc<IntegrationRegistry>,
}

impl AppState {
    /// Look a session up by id or name
    pub async fn resolve(&self, id_or_name: &str) -> Result<Session> {
        Ok(self.sessions.get_session(id_or_name).await?)
    }

    /// Remove a session together with everything attached to it:
    /// live connection, Chatwoot integration, webhook, then the record.
    pub async fn delete_session(&self, id_or_name: &str) -> Result<Session> {
        let session = self.resolve(id_or_name).await?;

        if let Err(e) = self.registry.stop(&session.id).await {
            // The handle is already gone; only the client's disconnect failed.
            warn!(session_id = %session.id, error = %e, "Disconnect failed while deleting session");
        }
        self.chatwoot.delete_config(&session.id).await?;
        self.webhooks.delete_webhook(&session.id).await?;
        self.sessions.delete_session(&session.id).await?;

        info!(session_id = %session.id, name = %session.name, "Session deleted");
        Ok(session)
    }
}

fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.server.allowed_origins.as_deref());

    Router::new()
        .merge(routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP API server and run until `shutdown` resolves
pub async fn start_server<F>(port: u16, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
