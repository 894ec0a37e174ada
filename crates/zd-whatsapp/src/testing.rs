//! Scripted in-memory protocol client
//!
//! Replays a fixed list of events on `connect` and records every send, so
//! registry and bridge behaviour can be exercised without a daemon.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zd_core::event::MediaInfo;
use zd_core::{ProtocolEvent, Session};

use crate::client::{ClientConnection, ClientFactory, WhatsAppClient};
use crate::error::{Result, WhatsAppError};
use crate::message::{SendReceipt, SendRequest};

pub const SCRIPTED_QR: &str = "2@scripted-qr";
pub const SCRIPTED_PAIR_CODE: &str = "ABCD-1234";

/// What a scripted client does when driven
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub on_connect: Vec<ProtocolEvent>,
    pub fail_create: bool,
    pub fail_connect: bool,
    pub logged_in: bool,
}

impl Script {
    /// Unlinked device: issues a QR code and waits
    pub fn qr() -> Self {
        Self {
            on_connect: vec![ProtocolEvent::Qr {
                code: SCRIPTED_QR.to_string(),
            }],
            ..Self::default()
        }
    }

    /// Already linked device: connects straight away
    pub fn linked() -> Self {
        Self {
            on_connect: vec![ProtocolEvent::Connected],
            logged_in: true,
            ..Self::default()
        }
    }

    /// Fresh pairing that completes with `device_jid`
    pub fn pairing(device_jid: &str) -> Self {
        Self {
            on_connect: vec![
                ProtocolEvent::PairSuccess {
                    device_jid: device_jid.to_string(),
                },
                ProtocolEvent::Connected,
            ],
            logged_in: true,
            ..Self::default()
        }
    }

    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }
}

pub struct ScriptedClient {
    script: Script,
    events: mpsc::Sender<ProtocolEvent>,
    sent: Mutex<Vec<SendRequest>>,
    disconnects: AtomicUsize,
    logouts: AtomicUsize,
}

impl ScriptedClient {
    /// Every request passed to `send`, in order
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Push an event as if it came off the wire
    pub async fn emit(&self, event: ProtocolEvent) -> bool {
        self.events.send(event).await.is_ok()
    }
}

#[async_trait]
impl WhatsAppClient for ScriptedClient {
    async fn connect(&self) -> Result<()> {
        if self.script.fail_connect {
            return Err(WhatsAppError::Api {
                status: 500,
                body: "scripted connect failure".to_string(),
            });
        }
        for event in self.script.on_connect.iter().cloned() {
            let _ = self.events.send(event).await;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.script.logged_in)
    }

    async fn pair_phone(&self, _phone: &str) -> Result<String> {
        Ok(SCRIPTED_PAIR_CODE.to_string())
    }

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| WhatsAppError::Parse("send log poisoned".to_string()))?;
        sent.push(request.clone());
        Ok(SendReceipt {
            id: format!("SCRIPTED{}", sent.len()),
            timestamp: Utc::now(),
        })
    }

    async fn download_media(&self, media: &MediaInfo) -> Result<Vec<u8>> {
        Ok(media.media_ref.as_bytes().to_vec())
    }
}

/// Factory handing out [`ScriptedClient`]s, one script per session id
#[derive(Default)]
pub struct ScriptedFactory {
    default: Script,
    scripts: Mutex<HashMap<String, Script>>,
    clients: DashMap<String, Arc<ScriptedClient>>,
    created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    /// Override the script for one session
    pub fn script(&self, session_id: &str, script: Script) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(session_id.to_string(), script);
        }
    }

    /// Most recent client created for the session
    pub fn client(&self, session_id: &str) -> Option<Arc<ScriptedClient>> {
        self.clients.get(session_id).map(|c| Arc::clone(c.value()))
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn emit(&self, session_id: &str, event: ProtocolEvent) -> bool {
        match self.client(session_id) {
            Some(client) => client.emit(event).await,
            None => false,
        }
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn create(
        &self,
        session: &Session,
        _cancel: CancellationToken,
    ) -> Result<ClientConnection> {
        let script = self
            .scripts
            .lock()
            .ok()
            .and_then(|s| s.get(&session.id).cloned())
            .unwrap_or_else(|| self.default.clone());

        if script.fail_create {
            return Err(WhatsAppError::ClientStartFailed(
                "scripted create failure".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        let client = Arc::new(ScriptedClient {
            script,
            events: tx,
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            logouts: AtomicUsize::new(0),
        });
        self.clients.insert(session.id.clone(), Arc::clone(&client));
        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(ClientConnection {
            client,
            events: rx,
        })
    }
}
