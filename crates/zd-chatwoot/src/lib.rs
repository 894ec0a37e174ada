//! zd-chatwoot: two-way bridge between WhatsApp sessions and Chatwoot
//!
//! - [`IntegrationRegistry`]: per-session configuration and bridge lifecycle
//! - [`ChatwootBridge`]: message forwarding in both directions
//! - [`ChatwootClient`]: Chatwoot account REST API

pub mod bridge;
pub mod client;
pub mod error;
pub mod phone;
pub mod registry;
pub mod sender;
pub mod types;
pub mod webhook;

pub use bridge::{ChatwootBridge, InboundOutcome, SkipReason};
pub use client::{Attachment, ChatwootClient};
pub use error::{ChatwootError, Result};
pub use registry::{ConnectionCheck, IntegrationRegistry};
pub use sender::MessageSender;
pub use webhook::{ChatwootEvent, parse_webhook};
