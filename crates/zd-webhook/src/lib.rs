//! zd-webhook: outbound event webhooks
//!
//! Per-session subscriptions (target URL plus event names) and ordered,
//! single-attempt delivery of matching protocol events.

pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod events;

pub use delivery::WebhookDelivery;
pub use dispatcher::WebhookDispatcher;
pub use error::{Result, WebhookError};
pub use events::{EventFilter, supported_events, validate_events};
