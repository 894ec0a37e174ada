//! Session lifecycle and messaging endpoints

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zd_core::{Session, SessionStatus};
use zd_whatsapp::{ConnectionStatus, SendReceipt, SendRequest, StartOutcome};

use super::{Reply, ok, respond};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub phone: String,
}

/// Session as listed; the API key is only shown on creation
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: String,
    pub name: String,
    pub status: SessionStatus,
    pub connected: bool,
    pub device_jid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionView {
    fn new(session: Session, connected: bool) -> Self {
        Self {
            id: session.id,
            name: session.name,
            status: session.status,
            connected,
            device_jid: session.device_jid,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub qr_code: String,
}

#[derive(Debug, Serialize)]
pub struct PairResponse {
    pub code: String,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Reply<Session> {
    let session = state.sessions.create_session(&req.name).await?;
    respond(StatusCode::CREATED, session)
}

pub async fn list_sessions(State(state): State<AppState>) -> Reply<Vec<SessionView>> {
    let sessions = state.sessions.list_sessions().await?;
    let views = sessions
        .into_iter()
        .map(|s| {
            let connected = state.registry.is_connected(&s.id);
            SessionView::new(s, connected)
        })
        .collect();
    ok(views)
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SessionView> {
    let session = state.resolve(&id).await?;
    let connected = state.registry.is_connected(&session.id);
    ok(SessionView::new(session, connected))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SessionState> {
    let session = state.delete_session(&id).await?;
    ok(SessionState {
        session_id: session.id,
        status: SessionStatus::Disconnected,
    })
}

pub async fn connect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<StartOutcome> {
    let session = state.resolve(&id).await?;
    let outcome = state.registry.start(&session.id).await?;
    debug!(session_id = %session.id, state = ?outcome.state, "Connect finished");
    ok(outcome)
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SessionState> {
    let session = state.resolve(&id).await?;
    state.registry.stop(&session.id).await?;
    ok(SessionState {
        session_id: session.id,
        status: SessionStatus::Disconnected,
    })
}

pub async fn logout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SessionState> {
    let session = state.resolve(&id).await?;
    state.registry.logout(&session.id).await?;
    ok(SessionState {
        session_id: session.id,
        status: SessionStatus::Disconnected,
    })
}

pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<ConnectionStatus> {
    let session = state.resolve(&id).await?;
    ok(state.registry.status(&session.id).await?)
}

pub async fn qr_code(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<QrResponse> {
    let session = state.resolve(&id).await?;
    let qr_code = state.registry.get_qr_code(&session.id)?;
    ok(QrResponse { qr_code })
}

pub async fn pair_phone(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PairRequest>,
) -> Reply<PairResponse> {
    let session = state.resolve(&id).await?;
    let code = state.registry.pair_phone(&session.id, &req.phone).await?;
    ok(PairResponse { code })
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Reply<SendReceipt> {
    let session = state.resolve(&id).await?;
    let kind = req.content.kind();
    let receipt = state.registry.send(&session.id, req).await?;
    debug!(session_id = %session.id, kind, id = %receipt.id, "Message sent");
    ok(receipt)
}
