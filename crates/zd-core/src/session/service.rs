//! Session service: the single id-or-name resolver and lifecycle writes

use std::sync::Arc;

use tracing::{debug, info};

use crate::session::{Session, SessionRepository, SessionStatus};
use crate::{Error, Result};

/// Session lookups and persisted-state mutations shared by every caller
#[derive(Clone)]
pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
}

impl SessionService {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Create a session with a unique name
    pub async fn create_session(&self, name: &str) -> Result<Session> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("session name must not be empty".to_string()));
        }
        if self.repo.get_by_name(name).await?.is_some() {
            return Err(Error::SessionNameTaken(name.to_string()));
        }

        let session = Session::new(name);
        self.repo.save(&session).await?;
        info!(session_id = %session.id, name = %session.name, "Session created");
        Ok(session)
    }

    /// Resolve a session by id first, then by name
    pub async fn get_session(&self, id_or_name: &str) -> Result<Session> {
        if let Some(session) = self.repo.get(id_or_name).await? {
            return Ok(session);
        }
        if let Some(session) = self.repo.get_by_name(id_or_name).await? {
            debug!(name = id_or_name, session_id = %session.id, "Resolved session by name");
            return Ok(session);
        }
        Err(Error::SessionNotFound(id_or_name.to_string()))
    }

    /// Strict lookup by id; names are not accepted
    pub async fn get_session_by_id(&self, id: &str) -> Result<Session> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// First session bound to the device JID
    pub async fn get_session_by_device_jid(&self, device_jid: &str) -> Result<Session> {
        self.repo
            .list_by_device_jid(device_jid)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::SessionNotFound(device_jid.to_string()))
    }

    /// Every session bound to the device JID
    pub async fn sessions_for_device(&self, device_jid: &str) -> Result<Vec<Session>> {
        self.repo.list_by_device_jid(device_jid).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.repo.list().await
    }

    /// Write-through of a connection state transition
    pub async fn update_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        if !self.repo.update_status(session_id, status).await? {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        debug!(session_id, status = %status, "Session status updated");
        Ok(())
    }

    pub async fn bind_device(&self, session_id: &str, device_jid: &str) -> Result<()> {
        if !self.repo.set_device_jid(session_id, Some(device_jid)).await? {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        info!(session_id, device_jid, "Device bound to session");
        Ok(())
    }

    pub async fn clear_device(&self, session_id: &str) -> Result<()> {
        if !self.repo.set_device_jid(session_id, None).await? {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }

    /// Remove the record. Callers tear down live connections first.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        if !self.repo.delete(session_id).await? {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }
        info!(session_id, "Session deleted");
        Ok(())
    }
}
