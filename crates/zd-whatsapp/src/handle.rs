//! Live connection handle owned by the registry

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::WhatsAppClient;

/// Lifecycle of a running connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// Client created, waiting for the first lifecycle event
    Starting,
    /// Not linked yet; a QR code or pairing code is needed
    AwaitingLink,
    Connected,
    Stopped,
}

impl HandleState {
    /// States that end the wait in `start`
    pub fn is_settled(&self) -> bool {
        !matches!(self, HandleState::Starting)
    }
}

pub struct ConnectionHandle {
    pub session_id: String,
    pub client: Arc<dyn WhatsAppClient>,
    pub cancel: CancellationToken,
    state: watch::Sender<HandleState>,
    qr_code: Mutex<Option<String>>,
    device_jid: Mutex<Option<String>>,
}

impl ConnectionHandle {
    pub fn new(
        session_id: impl Into<String>,
        client: Arc<dyn WhatsAppClient>,
        cancel: CancellationToken,
        device_jid: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(HandleState::Starting);
        Self {
            session_id: session_id.into(),
            client,
            cancel,
            state,
            qr_code: Mutex::new(None),
            device_jid: Mutex::new(device_jid),
        }
    }

    pub fn state(&self) -> HandleState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: HandleState) {
        self.state.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<HandleState> {
        self.state.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.state() != HandleState::Stopped && !self.cancel.is_cancelled()
    }

    pub fn qr_code(&self) -> Option<String> {
        self.qr_code.lock().ok().and_then(|qr| qr.clone())
    }

    pub fn set_qr_code(&self, code: Option<String>) {
        if let Ok(mut qr) = self.qr_code.lock() {
            *qr = code;
        }
    }

    pub fn device_jid(&self) -> Option<String> {
        self.device_jid.lock().ok().and_then(|jid| jid.clone())
    }

    pub fn set_device_jid(&self, jid: Option<String>) {
        if let Ok(mut current) = self.device_jid.lock() {
            *current = jid;
        }
    }
}
