//! Connection registry
//!
//! Owns `session id -> ConnectionHandle` and serializes lifecycle changes
//! per session id. Different sessions never wait on each other: the map is
//! a DashMap whose shard guards are never held across an await, and each
//! session has its own async lifecycle lock.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zd_core::event::MediaInfo;
use zd_core::{EventSink, SessionEvent, SessionService, SessionStatus};

use crate::client::ClientFactory;
use crate::error::{Result, WhatsAppError};
use crate::handle::{ConnectionHandle, HandleState};
use crate::jid;
use crate::message::{SendReceipt, SendRequest};
use crate::worker::Worker;

/// What `start` settled on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub state: HandleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

impl StartOutcome {
    fn from_handle(handle: &ConnectionHandle) -> Self {
        Self {
            state: handle.state(),
            qr_code: handle.qr_code(),
        }
    }
}

/// Live and persisted view of one session
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub session_id: String,
    pub name: String,
    pub status: SessionStatus,
    pub state: Option<HandleState>,
    pub connected: bool,
    pub logged_in: Option<bool>,
    pub device_jid: Option<String>,
}

struct Inner {
    handles: DashMap<String, Arc<ConnectionHandle>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    factory: Arc<dyn ClientFactory>,
    sessions: SessionService,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    start_timeout: Duration,
}

enum Registered {
    Running(StartOutcome),
    Fresh {
        handle: Arc<ConnectionHandle>,
        prior: SessionStatus,
    },
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        sessions: SessionService,
        start_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handles: DashMap::new(),
                locks: DashMap::new(),
                factory,
                sessions,
                sinks: RwLock::new(Vec::new()),
                start_timeout,
            }),
        }
    }

    /// Register a consumer for every session's events
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        match self.inner.sinks.write() {
            Ok(mut sinks) => {
                info!(sink = sink.name(), "Event sink registered");
                sinks.push(sink);
            }
            Err(_) => warn!(sink = sink.name(), "Sink list poisoned, sink not registered"),
        }
    }

    pub(crate) fn sessions(&self) -> &SessionService {
        &self.inner.sessions
    }

    fn lifecycle_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    fn handle(&self, session_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.inner
            .handles
            .get(session_id)
            .map(|h| Arc::clone(h.value()))
    }

    fn live_handle(&self, session_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.handle(session_id).filter(|h| h.is_live())
    }

    /// Start the session's connection.
    ///
    /// Returns once the client is connected or waiting for a QR scan or
    /// pairing code. Starting a session that already has a live handle
    /// returns the current state without side effects. The lifecycle lock
    /// is released once the handle is registered, so `stop` can cancel the
    /// connect and the settle wait.
    pub async fn start(&self, session_id: &str) -> Result<StartOutcome> {
        let (handle, prior) = match self.register_handle(session_id).await? {
            Registered::Running(outcome) => return Ok(outcome),
            Registered::Fresh { handle, prior } => (handle, prior),
        };
        let session_id = handle.session_id.as_str();
        let mut state_rx = handle.subscribe();

        info!(session_id, "Starting session");
        let connected = tokio::select! {
            res = handle.client.connect() => res,
            _ = handle.cancel.cancelled() => {
                return Err(self.abandon(&handle, prior, "stopped while starting").await);
            }
        };
        if let Err(e) = connected {
            return Err(self.abandon(&handle, prior, &e.to_string()).await);
        }

        let settled = tokio::select! {
            res = tokio::time::timeout(
                self.inner.start_timeout,
                state_rx.wait_for(|s| s.is_settled()),
            ) => res.map(|r| r.map(|s| *s)),
            _ = handle.cancel.cancelled() => Ok(Ok(HandleState::Stopped)),
        };

        let reason = match settled {
            Ok(Ok(HandleState::Stopped)) | Ok(Err(_)) => {
                if handle.cancel.is_cancelled() {
                    "stopped while starting"
                } else {
                    "connection closed while starting"
                }
            }
            Ok(Ok(state)) => {
                info!(session_id, state = ?state, "Session started");
                return Ok(StartOutcome {
                    state,
                    qr_code: handle.qr_code(),
                });
            }
            Err(_) => {
                if let Err(e) = handle.client.disconnect().await {
                    warn!(session_id, error = %e, "Disconnect after start timeout failed");
                }
                "timed out waiting for the client"
            }
        };

        Err(self.abandon(&handle, prior, reason).await)
    }

    /// Create and register a handle under the lifecycle lock
    async fn register_handle(&self, session_id: &str) -> Result<Registered> {
        let lock = self.lifecycle_lock(session_id);
        let _guard = lock.lock().await;

        if let Some(handle) = self.live_handle(session_id) {
            debug!(session_id, state = ?handle.state(), "Session already started");
            return Ok(Registered::Running(StartOutcome::from_handle(&handle)));
        }

        let session = self.inner.sessions.get_session(session_id).await?;
        let session_id = session.id.as_str();

        if let Some(device_jid) = session.bound_device() {
            if let Some(other) = self.find_conflict(session_id, device_jid).await? {
                warn!(
                    session_id,
                    device_jid,
                    bound_to = %other,
                    "Refusing start: device already in use"
                );
                return Err(zd_core::Error::DeviceAlreadyInUse {
                    device_jid: device_jid.to_string(),
                    session_id: other,
                }
                .into());
            }
        }

        let prior = session.status;
        self.inner
            .sessions
            .update_status(session_id, SessionStatus::Connecting)
            .await?;

        let cancel = CancellationToken::new();
        let conn = match self.inner.factory.create(&session, cancel.clone()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.restore_status(session_id, prior).await;
                return Err(WhatsAppError::ClientStartFailed(e.to_string()));
            }
        };

        let handle = Arc::new(ConnectionHandle::new(
            session_id,
            conn.client,
            cancel,
            session.bound_device().map(str::to_string),
        ));
        self.inner
            .handles
            .insert(session_id.to_string(), Arc::clone(&handle));
        tokio::spawn(Worker::new(self.clone(), Arc::clone(&handle), conn.events).run());

        Ok(Registered::Fresh { handle, prior })
    }

    /// Undo a start that did not settle. Status is only rolled back when the
    /// handle was still ours; a concurrent `stop` has already written it.
    async fn abandon(
        &self,
        handle: &Arc<ConnectionHandle>,
        prior: SessionStatus,
        reason: &str,
    ) -> WhatsAppError {
        if self.discard(handle) {
            self.restore_status(&handle.session_id, prior).await;
        }
        warn!(session_id = %handle.session_id, reason, "Session start abandoned");
        WhatsAppError::ClientStartFailed(reason.to_string())
    }

    /// Tear down the session's connection. Stopping a session that is not
    /// running is not an error.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let lock = self.lifecycle_lock(session_id);
        let _guard = lock.lock().await;
        self.stop_locked(session_id).await
    }

    async fn stop_locked(&self, session_id: &str) -> Result<()> {
        let Some((_, handle)) = self.inner.handles.remove(session_id) else {
            warn!(session_id, "Stop requested for a session that is not running");
            return Ok(());
        };

        handle.set_state(HandleState::Stopped);
        handle.cancel.cancel();
        let disconnected = handle.client.disconnect().await;

        self.restore_status(session_id, SessionStatus::Disconnected)
            .await;
        info!(session_id, "Session stopped");

        disconnected.map_err(|e| WhatsAppError::ClientStopFailed(e.to_string()))
    }

    /// Unlink the device, clear the binding and stop
    pub async fn logout(&self, session_id: &str) -> Result<()> {
        let lock = self.lifecycle_lock(session_id);
        let _guard = lock.lock().await;

        let handle = self
            .live_handle(session_id)
            .ok_or_else(|| WhatsAppError::NotStarted(session_id.to_string()))?;

        handle.client.logout().await?;
        handle.set_device_jid(None);
        self.inner.sessions.clear_device(session_id).await?;
        info!(session_id, "Session logged out");

        self.stop_locked(session_id).await
    }

    /// Pure lookup
    pub fn is_connected(&self, session_id: &str) -> bool {
        self.inner
            .handles
            .get(session_id)
            .map(|h| h.state() == HandleState::Connected)
            .unwrap_or(false)
    }

    /// Whether a live handle exists in any state
    pub fn is_registered(&self, session_id: &str) -> bool {
        self.live_handle(session_id).is_some()
    }

    pub fn get_qr_code(&self, session_id: &str) -> Result<String> {
        let handle = self
            .live_handle(session_id)
            .ok_or_else(|| WhatsAppError::NotStarted(session_id.to_string()))?;
        if handle.state() == HandleState::Connected {
            return Err(WhatsAppError::NoQrAvailable);
        }
        handle.qr_code().ok_or(WhatsAppError::NoQrAvailable)
    }

    /// Request a pairing code for a started but unlinked session
    pub async fn pair_phone(&self, session_id: &str, phone: &str) -> Result<String> {
        let handle = self
            .live_handle(session_id)
            .ok_or_else(|| WhatsAppError::NotStarted(session_id.to_string()))?;
        if handle.state() == HandleState::Connected {
            return Err(WhatsAppError::AlreadyLinked(session_id.to_string()));
        }

        let number = jid::digits(phone);
        if number.is_empty() {
            return Err(WhatsAppError::InvalidRequest(format!(
                "invalid phone number: {}",
                phone
            )));
        }

        let code = handle.client.pair_phone(&number).await?;
        handle.set_state(HandleState::AwaitingLink);
        info!(session_id, "Pairing code issued");
        Ok(code)
    }

    /// Send through a connected session
    pub async fn send(&self, session_id: &str, request: SendRequest) -> Result<SendReceipt> {
        let handle = self
            .handle(session_id)
            .filter(|h| h.state() == HandleState::Connected)
            .ok_or_else(|| WhatsAppError::NotConnected(session_id.to_string()))?;

        let request = request.normalized()?;
        handle.client.send(&request).await
    }

    pub async fn download_media(&self, session_id: &str, media: &MediaInfo) -> Result<Vec<u8>> {
        let handle = self
            .live_handle(session_id)
            .ok_or_else(|| WhatsAppError::NotStarted(session_id.to_string()))?;
        handle.client.download_media(media).await
    }

    pub async fn status(&self, session_id: &str) -> Result<ConnectionStatus> {
        let session = self.inner.sessions.get_session(session_id).await?;
        let handle = self.live_handle(&session.id);

        let logged_in = match &handle {
            Some(h) => h.client.is_logged_in().await.ok(),
            None => None,
        };

        Ok(ConnectionStatus {
            connected: self.is_connected(&session.id),
            state: handle.as_ref().map(|h| h.state()),
            device_jid: handle
                .as_ref()
                .and_then(|h| h.device_jid())
                .or_else(|| session.bound_device().map(str::to_string)),
            logged_in,
            status: session.status,
            name: session.name,
            session_id: session.id,
        })
    }

    pub fn connected_sessions(&self) -> Vec<String> {
        self.inner
            .handles
            .iter()
            .filter(|h| h.state() == HandleState::Connected)
            .map(|h| h.key().clone())
            .collect()
    }

    /// Start every session that was connected when the process last ran
    pub async fn restore(&self) -> Result<usize> {
        let sessions = self.inner.sessions.list_sessions().await?;
        let mut restored = 0;

        for session in sessions
            .into_iter()
            .filter(|s| s.status == SessionStatus::Connected && s.bound_device().is_some())
        {
            match self.start(&session.id).await {
                Ok(outcome) => {
                    info!(session_id = %session.id, state = ?outcome.state, "Session restored");
                    restored += 1;
                }
                Err(e) => warn!(session_id = %session.id, error = %e, "Failed to restore session"),
            }
        }

        Ok(restored)
    }

    /// Stop every live handle without touching persisted status, so the
    /// next boot restores them.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.inner.handles.iter().map(|h| h.key().clone()).collect();

        for session_id in ids {
            let lock = self.lifecycle_lock(&session_id);
            let _guard = lock.lock().await;

            if let Some((_, handle)) = self.inner.handles.remove(&session_id) {
                handle.set_state(HandleState::Stopped);
                handle.cancel.cancel();
                if let Err(e) = handle.client.disconnect().await {
                    warn!(session_id = %session_id, error = %e, "Disconnect during shutdown failed");
                }
            }
        }
        info!("Connection registry shut down");
    }

    /// Another registered session bound to the same device, if any
    pub(crate) async fn find_conflict(
        &self,
        session_id: &str,
        device_jid: &str,
    ) -> Result<Option<String>> {
        let live = self
            .inner
            .handles
            .iter()
            .filter(|h| h.key() != session_id && h.is_live())
            .find(|h| {
                h.device_jid()
                    .map(|bound| jid::same_account(&bound, device_jid))
                    .unwrap_or(false)
            })
            .map(|h| h.key().clone());
        if live.is_some() {
            return Ok(live);
        }

        let bound = self.inner.sessions.sessions_for_device(device_jid).await?;
        Ok(bound
            .into_iter()
            .map(|s| s.id)
            .find(|id| id != session_id && self.is_registered(id)))
    }

    /// Drop a handle whose connection ended on its own
    pub(crate) async fn release(&self, handle: &Arc<ConnectionHandle>) {
        let removed = self
            .inner
            .handles
            .remove_if(&handle.session_id, |_, h| Arc::ptr_eq(h, handle))
            .is_some();
        if removed {
            self.restore_status(&handle.session_id, SessionStatus::Disconnected)
                .await;
        }
        handle.set_state(HandleState::Stopped);
        handle.cancel.cancel();
    }

    /// Drop a handle if it is still the registered one
    fn discard(&self, handle: &Arc<ConnectionHandle>) -> bool {
        let removed = self
            .inner
            .handles
            .remove_if(&handle.session_id, |_, h| Arc::ptr_eq(h, handle))
            .is_some();
        handle.set_state(HandleState::Stopped);
        handle.cancel.cancel();
        removed
    }

    async fn restore_status(&self, session_id: &str, status: SessionStatus) {
        if let Err(e) = self.inner.sessions.update_status(session_id, status).await {
            warn!(session_id, status = %status, error = %e, "Failed to persist session status");
        }
    }

    pub(crate) fn forward(&self, event: SessionEvent) {
        let event = Arc::new(event);
        match self.inner.sinks.read() {
            Ok(sinks) => {
                for sink in sinks.iter() {
                    sink.deliver(Arc::clone(&event));
                }
            }
            Err(_) => warn!(session_id = %event.session_id, "Sink list poisoned, event dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SCRIPTED_PAIR_CODE, SCRIPTED_QR, Script, ScriptedFactory};
    use zd_core::{ProtocolEvent, SqliteRepository};

    const DEVICE: &str = "15551234567:4@s.whatsapp.net";

    struct Fixture {
        registry: ConnectionRegistry,
        factory: Arc<ScriptedFactory>,
        sessions: SessionService,
    }

    fn fixture(default: Script) -> Fixture {
        let factory = Arc::new(ScriptedFactory::new(default));
        let sessions = SessionService::new(Arc::new(SqliteRepository::in_memory().unwrap()));
        let registry =
            ConnectionRegistry::new(factory.clone(), sessions.clone(), Duration::from_secs(2));
        Fixture {
            registry,
            factory,
            sessions,
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[derive(Default)]
    struct Collector {
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl EventSink for Collector {
        fn name(&self) -> &'static str {
            "collector"
        }

        fn deliver(&self, event: Arc<SessionEvent>) {
            self.seen
                .lock()
                .unwrap()
                .push(event.event_type().as_str().to_string());
        }
    }

    #[tokio::test]
    async fn test_start_waits_for_qr() {
        let fx = fixture(Script::qr());
        let session = fx.sessions.create_session("support").await.unwrap();

        let outcome = fx.registry.start(&session.id).await.unwrap();
        assert_eq!(outcome.state, HandleState::AwaitingLink);
        assert_eq!(outcome.qr_code.as_deref(), Some(SCRIPTED_QR));
        assert_eq!(fx.registry.get_qr_code(&session.id).unwrap(), SCRIPTED_QR);
        assert!(!fx.registry.is_connected(&session.id));

        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Connecting);
    }

    #[tokio::test]
    async fn test_pairing_binds_device_and_connects() {
        let fx = fixture(Script::pairing(DEVICE));
        let session = fx.sessions.create_session("support").await.unwrap();

        let outcome = fx.registry.start(&session.id).await.unwrap();
        assert_eq!(outcome.state, HandleState::Connected);
        assert!(fx.registry.is_connected(&session.id));
        assert!(matches!(
            fx.registry.get_qr_code(&session.id),
            Err(WhatsAppError::NoQrAvailable)
        ));

        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Connected);
        assert_eq!(stored.device_jid.as_deref(), Some(DEVICE));
    }

    #[tokio::test]
    async fn test_start_is_noop_when_running() {
        let fx = fixture(Script::linked());
        let session = fx.sessions.create_session("support").await.unwrap();

        fx.registry.start(&session.id).await.unwrap();
        let again = fx.registry.start(&session.id).await.unwrap();
        assert_eq!(again.state, HandleState::Connected);
        assert_eq!(fx.factory.created(), 1);
    }

    #[tokio::test]
    async fn test_start_resolves_session_by_name() {
        let fx = fixture(Script::linked());
        let session = fx.sessions.create_session("support").await.unwrap();

        fx.registry.start("support").await.unwrap();
        assert!(fx.registry.is_connected(&session.id));
    }

    #[tokio::test]
    async fn test_device_conflict_rejects_second_session() {
        let fx = fixture(Script::linked());
        let a = fx.sessions.create_session("a").await.unwrap();
        let b = fx.sessions.create_session("b").await.unwrap();
        fx.sessions.bind_device(&a.id, DEVICE).await.unwrap();
        fx.sessions.bind_device(&b.id, DEVICE).await.unwrap();

        fx.registry.start(&a.id).await.unwrap();
        let err = fx.registry.start(&b.id).await.unwrap_err();
        assert!(err.is_device_conflict());

        // A untouched, B never got a client or a status change
        assert!(fx.registry.is_connected(&a.id));
        assert!(fx.factory.client(&b.id).is_none());
        assert_eq!(fx.factory.client(&a.id).unwrap().disconnects(), 0);
        let stored = fx.sessions.get_session(&b.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_pair_success_conflict_refuses_bind() {
        let fx = fixture(Script::linked());
        let a = fx.sessions.create_session("a").await.unwrap();
        let b = fx.sessions.create_session("b").await.unwrap();
        fx.sessions.bind_device(&a.id, DEVICE).await.unwrap();
        fx.factory.script(&b.id, Script::qr());

        fx.registry.start(&a.id).await.unwrap();
        fx.registry.start(&b.id).await.unwrap();

        fx.factory
            .emit(
                &b.id,
                ProtocolEvent::PairSuccess {
                    device_jid: "15551234567:9@s.whatsapp.net".to_string(),
                },
            )
            .await;

        let registry = fx.registry.clone();
        let b_id = b.id.clone();
        assert!(eventually(move || !registry.is_registered(&b_id)).await);
        assert!(fx.registry.is_connected(&a.id));

        let stored = fx.sessions.get_session(&b.id).await.unwrap();
        assert_eq!(stored.device_jid, None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let fx = fixture(Script::linked());
        let session = fx.sessions.create_session("support").await.unwrap();

        fx.registry.start(&session.id).await.unwrap();
        fx.registry.stop(&session.id).await.unwrap();
        fx.registry.stop(&session.id).await.unwrap();
        fx.registry.stop("never-started").await.unwrap();

        assert!(!fx.registry.is_connected(&session.id));
        assert_eq!(fx.factory.client(&session.id).unwrap().disconnects(), 1);
        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_keeps_prior_status() {
        let fx = fixture(Script::failing_connect());
        let session = fx.sessions.create_session("support").await.unwrap();

        let err = fx.registry.start(&session.id).await.unwrap_err();
        assert!(matches!(err, WhatsAppError::ClientStartFailed(_)));
        assert!(!fx.registry.is_registered(&session.id));

        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_start() {
        // No lifecycle events: start would wait for the full timeout
        let fx = fixture(Script::default());
        let session = fx.sessions.create_session("support").await.unwrap();

        let registry = fx.registry.clone();
        let id = session.id.clone();
        let pending = tokio::spawn(async move { registry.start(&id).await });

        let registry = fx.registry.clone();
        let id = session.id.clone();
        assert!(eventually(move || registry.is_registered(&id)).await);

        let began = std::time::Instant::now();
        fx.registry.stop(&session.id).await.unwrap();
        let result = pending.await.unwrap();
        assert!(began.elapsed() < Duration::from_secs(1));

        assert!(matches!(result, Err(WhatsAppError::ClientStartFailed(_))));
        assert!(!fx.registry.is_registered(&session.id));
        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_external_disconnect_removes_handle() {
        let fx = fixture(Script::linked());
        let session = fx.sessions.create_session("support").await.unwrap();
        fx.registry.start(&session.id).await.unwrap();

        fx.factory
            .emit(&session.id, ProtocolEvent::Disconnected { reason: None })
            .await;

        let registry = fx.registry.clone();
        let id = session.id.clone();
        assert!(eventually(move || !registry.is_registered(&id)).await);

        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let fx = fixture(Script::qr());
        let session = fx.sessions.create_session("support").await.unwrap();
        fx.registry.start(&session.id).await.unwrap();

        let err = fx
            .registry
            .send(&session.id, SendRequest::text("+15551234567", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, WhatsAppError::NotConnected(_)));

        fx.factory.emit(&session.id, ProtocolEvent::Connected).await;
        let registry = fx.registry.clone();
        let id = session.id.clone();
        assert!(eventually(move || registry.is_connected(&id)).await);

        let receipt = fx
            .registry
            .send(&session.id, SendRequest::text("+15551234567", "hi"))
            .await
            .unwrap();
        assert_eq!(receipt.id, "SCRIPTED1");
        let sent = fx.factory.client(&session.id).unwrap().sent();
        assert_eq!(sent[0].to, "15551234567@s.whatsapp.net");
    }

    #[tokio::test]
    async fn test_pair_phone_requires_unlinked_handle() {
        let fx = fixture(Script::qr());
        let session = fx.sessions.create_session("support").await.unwrap();

        assert!(matches!(
            fx.registry.pair_phone(&session.id, "+15551234567").await,
            Err(WhatsAppError::NotStarted(_))
        ));

        fx.registry.start(&session.id).await.unwrap();
        let code = fx
            .registry
            .pair_phone(&session.id, "+1 555 123 4567")
            .await
            .unwrap();
        assert_eq!(code, SCRIPTED_PAIR_CODE);
    }

    #[tokio::test]
    async fn test_logout_clears_device() {
        let fx = fixture(Script::pairing(DEVICE));
        let session = fx.sessions.create_session("support").await.unwrap();
        fx.registry.start(&session.id).await.unwrap();

        fx.registry.logout(&session.id).await.unwrap();

        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.device_jid, None);
        assert_eq!(stored.status, SessionStatus::Disconnected);
        assert_eq!(fx.factory.client(&session.id).unwrap().logouts(), 1);
    }

    #[tokio::test]
    async fn test_sinks_receive_events_in_order() {
        let fx = fixture(Script::pairing(DEVICE));
        let collector = Arc::new(Collector::default());
        fx.registry.add_sink(collector.clone());
        let session = fx.sessions.create_session("support").await.unwrap();

        fx.registry.start(&session.id).await.unwrap();
        let c = collector.clone();
        assert!(eventually(move || c.seen.lock().unwrap().len() >= 2).await);

        let seen = collector.seen.lock().unwrap().clone();
        assert_eq!(seen, vec!["connection.pair_success", "connection.connected"]);
    }

    #[tokio::test]
    async fn test_restore_and_shutdown_keep_status() {
        let fx = fixture(Script::linked());
        let session = fx.sessions.create_session("support").await.unwrap();
        fx.sessions.bind_device(&session.id, DEVICE).await.unwrap();
        fx.sessions
            .update_status(&session.id, SessionStatus::Connected)
            .await
            .unwrap();
        fx.sessions.create_session("idle").await.unwrap();

        assert_eq!(fx.registry.restore().await.unwrap(), 1);
        assert_eq!(fx.registry.connected_sessions(), vec![session.id.clone()]);

        fx.registry.shutdown().await;
        assert!(fx.registry.connected_sessions().is_empty());
        let stored = fx.sessions.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Connected);
    }

    #[tokio::test]
    async fn test_status_reports_live_state() {
        let fx = fixture(Script::qr());
        let session = fx.sessions.create_session("support").await.unwrap();

        let idle = fx.registry.status("support").await.unwrap();
        assert_eq!(idle.state, None);
        assert!(!idle.connected);

        fx.registry.start(&session.id).await.unwrap();
        let running = fx.registry.status(&session.id).await.unwrap();
        assert_eq!(running.state, Some(HandleState::AwaitingLink));
        assert_eq!(running.logged_in, Some(false));
    }
}
