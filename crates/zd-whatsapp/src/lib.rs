//! zd-whatsapp: live WhatsApp connections per session
//!
//! - [`ConnectionRegistry`]: start/stop, QR and pairing, device-conflict checks
//! - [`WhatsAppClient`] / [`ClientFactory`]: the protocol client seam
//! - [`DaemonClient`]: REST client for the multi-device daemon
//! - [`SendRequest`]: outgoing message model

pub mod client;
pub mod daemon;
pub mod error;
pub mod handle;
pub mod jid;
pub mod message;
pub mod registry;
mod worker;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ClientConnection, ClientFactory, WhatsAppClient};
pub use daemon::{DaemonClient, DaemonClientFactory};
pub use error::{Result, WhatsAppError};
pub use handle::HandleState;
pub use message::{MediaSource, SendContent, SendReceipt, SendRequest};
pub use registry::{ConnectionRegistry, ConnectionStatus, StartOutcome};
