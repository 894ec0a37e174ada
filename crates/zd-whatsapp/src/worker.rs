//! Per-connection event worker
//!
//! Drains one client's event channel in arrival order, applies lifecycle
//! transitions to the handle and the persisted session, then hands each
//! event to the registered sinks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zd_core::{ProtocolEvent, SessionEvent, SessionStatus};

use crate::handle::{ConnectionHandle, HandleState};
use crate::registry::ConnectionRegistry;

enum Step {
    /// Forward and keep going
    Forward,
    /// Forward, then exit: the connection is gone
    Finish,
    /// Exit without forwarding
    Abort,
}

pub(crate) struct Worker {
    registry: ConnectionRegistry,
    handle: Arc<ConnectionHandle>,
    events: mpsc::Receiver<ProtocolEvent>,
}

impl Worker {
    pub(crate) fn new(
        registry: ConnectionRegistry,
        handle: Arc<ConnectionHandle>,
        events: mpsc::Receiver<ProtocolEvent>,
    ) -> Self {
        Self {
            registry,
            handle,
            events,
        }
    }

    pub(crate) async fn run(mut self) {
        let session_id = self.handle.session_id.clone();
        debug!(session_id = %session_id, "Event worker started");

        loop {
            let event = tokio::select! {
                _ = self.handle.cancel.cancelled() => break,
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                info!(session_id = %session_id, "Event stream closed");
                self.registry.release(&self.handle).await;
                break;
            };

            match self.process(&event).await {
                Step::Forward => self.registry.forward(SessionEvent::new(&session_id, event)),
                Step::Finish => {
                    self.registry.forward(SessionEvent::new(&session_id, event));
                    break;
                }
                Step::Abort => break,
            }
        }

        debug!(session_id = %session_id, "Event worker stopped");
    }

    async fn process(&self, event: &ProtocolEvent) -> Step {
        let session_id = self.handle.session_id.as_str();
        let sessions = self.registry.sessions();

        match event {
            ProtocolEvent::Qr { code } => {
                debug!(session_id, "QR code issued");
                self.handle.set_qr_code(Some(code.clone()));
                self.handle.set_state(HandleState::AwaitingLink);
                Step::Forward
            }
            ProtocolEvent::PairSuccess { device_jid } => {
                match self.registry.find_conflict(session_id, device_jid).await {
                    Ok(Some(other)) => {
                        warn!(
                            session_id,
                            device_jid = %device_jid,
                            bound_to = %other,
                            "Device already in use by another session, refusing bind"
                        );
                        self.registry.release(&self.handle).await;
                        let client = Arc::clone(&self.handle.client);
                        tokio::spawn(async move {
                            if let Err(e) = client.disconnect().await {
                                warn!(error = %e, "Disconnect after refused bind failed");
                            }
                        });
                        return Step::Abort;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(session_id, error = %e, "Device conflict check failed"),
                }

                self.handle.set_device_jid(Some(device_jid.clone()));
                if let Err(e) = sessions.bind_device(session_id, device_jid).await {
                    warn!(session_id, error = %e, "Failed to persist device binding");
                }
                Step::Forward
            }
            ProtocolEvent::Connected => {
                self.handle.set_qr_code(None);
                if let Err(e) = sessions
                    .update_status(session_id, SessionStatus::Connected)
                    .await
                {
                    warn!(session_id, error = %e, "Failed to persist connected status");
                }
                self.handle.set_state(HandleState::Connected);
                info!(session_id, "Session connected");
                Step::Forward
            }
            ProtocolEvent::Disconnected { reason } => {
                info!(session_id, reason = ?reason, "Session disconnected");
                self.registry.release(&self.handle).await;
                Step::Finish
            }
            ProtocolEvent::LoggedOut { reason } => {
                info!(session_id, reason = ?reason, "Session logged out");
                self.handle.set_device_jid(None);
                if let Err(e) = sessions.clear_device(session_id).await {
                    warn!(session_id, error = %e, "Failed to clear device binding");
                }
                self.registry.release(&self.handle).await;
                Step::Finish
            }
            _ => Step::Forward,
        }
    }
}
