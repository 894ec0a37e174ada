//! zd-core: shared foundation for the zapdesk gateway
//!
//! Configuration, the error taxonomy, session records and their SQLite
//! persistence, the protocol event model, and the ordered per-session
//! queue used by event consumers.

pub mod chatwoot_config;
pub mod config;
pub mod error;
pub mod event;
pub mod queue;
pub mod session;
pub mod webhook;

pub use chatwoot_config::ChatwootConfig;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventSink, EventType, ProtocolEvent, SessionEvent};
pub use queue::{KeyedQueues, QueueHandler};
pub use session::{
    ChatwootConfigRepository, Session, SessionRepository, SessionService, SessionStatus,
    SqliteRepository, SqliteStore, WebhookRepository,
};
pub use webhook::WebhookSubscription;
