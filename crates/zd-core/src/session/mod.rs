//! Session management module
//!
//! Session records, their SQLite persistence, the repository seams the rest
//! of the workspace depends on, and the id-or-name resolving service.

mod repository;
mod service;
mod store;
mod types;

pub use repository::{
    ChatwootConfigRepository, SessionRepository, SqliteRepository, WebhookRepository,
};
pub use service::SessionService;
pub use store::SqliteStore;
pub use types::{Session, SessionStatus};
