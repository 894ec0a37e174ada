//! Outbound webhook subscription endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use zd_core::WebhookSubscription;

use super::{Reply, ok};
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SetWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub deleted: bool,
}

pub async fn set_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SetWebhookRequest>,
) -> Reply<WebhookSubscription> {
    let session = state.resolve(&id).await?;
    let subscription = state
        .webhooks
        .set_webhook(&session.id, &req.url, &req.events)
        .await?;
    ok(subscription)
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<WebhookSubscription> {
    let session = state.resolve(&id).await?;
    let subscription = state.webhooks.get_webhook(&session.id).ok_or_else(|| {
        ApiError::NotFound(format!("No webhook configured for session {}", session.id))
    })?;
    ok(subscription)
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<Deleted> {
    let session = state.resolve(&id).await?;
    let deleted = state.webhooks.delete_webhook(&session.id).await?;
    ok(Deleted { deleted })
}

/// Event names accepted by `set_webhook`
pub async fn list_events() -> Reply<Vec<&'static str>> {
    ok(zd_webhook::supported_events())
}
