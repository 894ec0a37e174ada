//! Chatwoot integration endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use zd_chatwoot::{ConnectionCheck, InboundOutcome, SkipReason};
use zd_core::ChatwootConfig;

use super::webhook::Deleted;
use super::{Reply, ok};
use crate::error::ApiError;
use crate::server::AppState;

/// What the bridge did with a Chatwoot callback
#[derive(Debug, Serialize)]
pub struct WebhookResult {
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl From<InboundOutcome> for WebhookResult {
    fn from(outcome: InboundOutcome) -> Self {
        match outcome {
            InboundOutcome::Sent(n) => Self {
                result: "sent",
                sent: Some(n),
                reason: None,
            },
            InboundOutcome::Skipped(reason) => Self {
                result: "skipped",
                sent: None,
                reason: Some(match reason {
                    SkipReason::Private => "private",
                    SkipReason::NotOutgoing => "not_outgoing",
                    SkipReason::Echo => "echo",
                    SkipReason::UnresolvedContact => "unresolved_contact",
                    SkipReason::Empty => "empty",
                }),
            },
            InboundOutcome::Ignored => Self {
                result: "ignored",
                sent: None,
                reason: None,
            },
        }
    }
}

/// Query string of the Chatwoot callback URL
#[derive(Debug, Deserialize)]
pub struct CallbackAuth {
    pub token: Option<String>,
}

pub async fn set_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(config): Json<ChatwootConfig>,
) -> Reply<ChatwootConfig> {
    let session = state.resolve(&id).await?;
    let saved = state.chatwoot.configure(&session.id, config).await?;
    ok(saved.redacted())
}

pub async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<ChatwootConfig> {
    let session = state.resolve(&id).await?;
    let config = state.chatwoot.get_config(&session.id).await?.ok_or_else(|| {
        ApiError::NotFound(format!("No Chatwoot configuration for session {}", session.id))
    })?;
    ok(config.redacted())
}

pub async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<Deleted> {
    let session = state.resolve(&id).await?;
    let deleted = state.chatwoot.delete_config(&session.id).await?;
    ok(Deleted { deleted })
}

/// Check the given settings against Chatwoot. An empty or masked token
/// falls back to the stored one.
pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut config): Json<ChatwootConfig>,
) -> Reply<ConnectionCheck> {
    let session = state.resolve(&id).await?;
    if config.token_withheld() {
        if let Some(stored) = state.chatwoot.get_config(&session.id).await? {
            config.token = stored.token;
        }
    }
    ok(state.chatwoot.test_connection(&config).await?)
}

/// Chatwoot callback, configured in Chatwoot as
/// `/chatwoot/webhook/{session id}?token={session api key}`.
///
/// Only the session id is accepted in the path, never its name.
pub async fn chatwoot_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(auth): Query<CallbackAuth>,
    body: Bytes,
) -> Reply<WebhookResult> {
    let session = state.sessions.get_session_by_id(&id).await?;
    if auth.token.as_deref() != Some(session.api_key.as_str()) {
        warn!(session_id = %session.id, "Chatwoot callback with a wrong session token");
        return Err(ApiError::AuthFailed);
    }
    let outcome = state.chatwoot.process_webhook(&session.id, &body).await?;
    ok(outcome.into())
}
