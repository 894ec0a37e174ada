//! Protocol client seam
//!
//! The registry never speaks the WhatsApp protocol itself. It drives a
//! [`WhatsAppClient`] created per session by a [`ClientFactory`] and reads
//! the client's events from an ordered channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use zd_core::event::MediaInfo;
use zd_core::{ProtocolEvent, Session};

use crate::error::Result;
use crate::message::{SendReceipt, SendRequest};

/// One live protocol client bound to a session's device store
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    /// Open the connection. Pairing sessions start emitting QR events.
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Unlink the device from the phone
    async fn logout(&self) -> Result<()>;

    async fn is_logged_in(&self) -> Result<bool>;

    /// Request a phone-number pairing code
    async fn pair_phone(&self, phone: &str) -> Result<String>;

    async fn send(&self, request: &SendRequest) -> Result<SendReceipt>;

    async fn download_media(&self, media: &MediaInfo) -> Result<Vec<u8>>;
}

/// A freshly created client and the receiving end of its event stream
pub struct ClientConnection {
    pub client: Arc<dyn WhatsAppClient>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Builds clients for sessions
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Create a client for `session`. Background work stops when `cancel` fires.
    async fn create(&self, session: &Session, cancel: CancellationToken)
    -> Result<ClientConnection>;
}
