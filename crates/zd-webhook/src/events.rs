//! Subscribable event names
//!
//! The canonical names come from [`EventType`]; two aliases widen a
//! subscription: `message.any` (both message directions) and `all`.

use std::collections::HashSet;

use zd_core::EventType;

use crate::error::{Result, WebhookError};

pub const ALL: &str = "all";
pub const MESSAGE_ANY: &str = "message.any";

pub fn is_supported(name: &str) -> bool {
    name == ALL || name == MESSAGE_ANY || EventType::parse(name).is_some()
}

/// Every name a subscription may contain
pub fn supported_events() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = EventType::ALL.iter().map(|t| t.as_str()).collect();
    names.push(MESSAGE_ANY);
    names.push(ALL);
    names
}

/// Check a requested event list.
///
/// Blank entries are dropped and duplicates collapsed. The first unknown
/// name fails the whole list.
pub fn validate_events(events: &[String]) -> Result<Vec<String>> {
    let mut accepted: Vec<String> = Vec::new();

    for name in events.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
        if !is_supported(name) {
            return Err(WebhookError::InvalidEvent(name.to_string()));
        }
        if !accepted.iter().any(|a| a == name) {
            accepted.push(name.to_string());
        }
    }

    if accepted.is_empty() {
        return Err(WebhookError::InvalidEvents);
    }
    Ok(accepted)
}

/// Compiled form of a subscription's event list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    all: bool,
    types: HashSet<EventType>,
}

impl EventFilter {
    /// Unknown names are ignored
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut filter = Self::default();
        for name in names.iter().map(|n| n.as_ref().trim()) {
            match name {
                ALL => filter.all = true,
                MESSAGE_ANY => {
                    filter.types.insert(EventType::MessageReceived);
                    filter.types.insert(EventType::MessageSent);
                }
                other => {
                    if let Some(t) = EventType::parse(other) {
                        filter.types.insert(t);
                    }
                }
            }
        }
        filter
    }

    pub fn matches(&self, event_type: EventType) -> bool {
        self.all || self.types.contains(&event_type)
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.types.is_empty()
    }
}
