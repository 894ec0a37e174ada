//! Per-session Chatwoot integration settings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Inbox used when none is configured
pub const DEFAULT_INBOX_NAME: &str = "WhatsApp";

/// Stand-in for the account token in API output
pub const REDACTED_TOKEN: &str = "********";

/// Chatwoot bridge configuration for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatwootConfig {
    pub session_id: String,
    pub enabled: bool,
    pub account_id: String,
    pub token: String,
    pub base_url: String,
    pub inbox_name: String,
    /// Append the agent name to messages sent from Chatwoot
    pub sign_msg: bool,
    pub sign_delimiter: String,
    /// Reopen a resolved conversation instead of starting a new one
    pub reopen_conversation: bool,
    /// New conversations start as `pending` rather than `open`
    pub conversation_pending: bool,
    /// Create contacts (and the inbox) when missing
    pub auto_create: bool,
    /// Treat Brazilian numbers with and without the 9th digit as one contact
    pub merge_brazil_contacts: bool,
    /// History-sync window in days; 0 disables history import
    pub import_days: u32,
    /// JIDs never bridged; entries starting with `@` match by suffix
    pub ignore_jids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ChatwootConfig {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            session_id: String::new(),
            enabled: false,
            account_id: String::new(),
            token: String::new(),
            base_url: String::new(),
            inbox_name: DEFAULT_INBOX_NAME.to_string(),
            sign_msg: false,
            sign_delimiter: "\n".to_string(),
            reopen_conversation: true,
            conversation_pending: false,
            auto_create: true,
            merge_brazil_contacts: false,
            import_days: 0,
            ignore_jids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ChatwootConfig {
    /// Enabling requires account id, token and base URL
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut missing = Vec::new();
        if self.account_id.trim().is_empty() {
            missing.push("account_id");
        }
        if self.token.trim().is_empty() {
            missing.push("token");
        }
        if self.base_url.trim().is_empty() {
            missing.push("base_url");
        }
        if !missing.is_empty() {
            return Err(Error::ConfigInvalid(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::ConfigInvalid(format!(
                "base_url must be an http(s) URL: {}",
                self.base_url
            )));
        }

        Ok(())
    }

    /// Copy with the account token masked
    pub fn redacted(mut self) -> Self {
        if !self.token.is_empty() {
            self.token = REDACTED_TOKEN.to_string();
        }
        self
    }

    /// Empty or masked token, as sent back by a client that read the config
    pub fn token_withheld(&self) -> bool {
        let token = self.token.trim();
        token.is_empty() || token == REDACTED_TOKEN
    }

    /// Base URL without trailing slash
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn inbox_name(&self) -> &str {
        if self.inbox_name.trim().is_empty() {
            DEFAULT_INBOX_NAME
        } else {
            self.inbox_name.trim()
        }
    }

    /// Whether a chat JID is excluded from bridging
    pub fn ignores(&self, jid: &str) -> bool {
        self.ignore_jids.iter().any(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                false
            } else if entry.starts_with('@') {
                jid.ends_with(entry)
            } else {
                jid == entry
            }
        })
    }
}
