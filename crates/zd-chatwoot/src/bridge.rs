//! Chatwoot bridge for one session
//!
//! Outbound: WhatsApp messages become Chatwoot messages in the contact's
//! conversation, creating contact and conversation on first contact.
//! Inbound: agent replies from Chatwoot webhooks are sent over WhatsApp.
//!
//! Echo suppression works both ways. Messages posted to Chatwoot carry
//! `source_id = "WAID:<whatsapp id>"` and are never sent back; ids of
//! WhatsApp messages sent on behalf of Chatwoot are remembered so their
//! `from_me` echo is not posted again. The echo can arrive before `send`
//! returns, so replies hold the send gate until their ids are recorded and
//! `from_me` messages pass through the gate before the echo check.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tracing::{debug, info, warn};
use zd_core::event::{MessageEvent, ProtocolEvent};
use zd_core::{ChatwootConfig, SessionEvent};
use zd_whatsapp::jid;
use zd_whatsapp::{MediaSource, SendContent, SendRequest};

use crate::client::{Attachment, ChatwootClient};
use crate::error::{ChatwootError, Result};
use crate::phone;
use crate::sender::MessageSender;
use crate::types::{Contact, MessageDirection, NewContact, NewConversation, NewMessage};
use crate::webhook::{ChatwootEvent, WebhookAttachment, WebhookContact, WebhookMessage};

/// `source_id` prefix marking messages that originated on WhatsApp
pub const SOURCE_PREFIX: &str = "WAID:";

/// Remembered ids of Chatwoot-originated sends
const ECHO_MEMORY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub contact_id: i64,
    pub conversation_id: i64,
}

/// Why an inbound webhook did not produce a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Private,
    NotOutgoing,
    Echo,
    UnresolvedContact,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Number of WhatsApp messages sent
    Sent(usize),
    Skipped(SkipReason),
    Ignored,
}

#[derive(Default)]
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RecentIds {
    fn insert(&mut self, id: String) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > ECHO_MEMORY {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }

    fn take(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            self.order.retain(|o| o != id);
            true
        } else {
            false
        }
    }
}

/// Who a WhatsApp chat maps to on the Chatwoot side
struct ContactKey {
    key: String,
    /// Digit forms to search for, empty for groups and non-phone JIDs
    phones: Vec<String>,
    identifier: String,
    name: String,
}

pub struct ChatwootBridge {
    session_id: String,
    config: ChatwootConfig,
    client: ChatwootClient,
    sender: Arc<dyn MessageSender>,
    inbox_id: OnceCell<i64>,
    identities: DashMap<String, Identity>,
    echoes: Mutex<RecentIds>,
    send_gate: AsyncMutex<()>,
}

impl std::fmt::Debug for ChatwootBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatwootBridge")
            .field("session_id", &self.session_id)
            .field("client", &self.client)
            .finish()
    }
}

impl ChatwootBridge {
    pub fn new(
        session_id: &str,
        config: ChatwootConfig,
        sender: Arc<dyn MessageSender>,
        timeout: Duration,
    ) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            return Err(zd_core::Error::ConfigInvalid("integration is disabled".to_string()).into());
        }

        Ok(Self {
            session_id: session_id.to_string(),
            client: ChatwootClient::new(&config, timeout)?,
            config,
            sender,
            inbox_id: OnceCell::new(),
            identities: DashMap::new(),
            echoes: Mutex::new(RecentIds::default()),
            send_gate: AsyncMutex::new(()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &ChatwootConfig {
        &self.config
    }

    pub fn client(&self) -> &ChatwootClient {
        &self.client
    }

    /// Contacts with a cached conversation
    pub fn known_contacts(&self) -> usize {
        self.identities.len()
    }

    /// Configured inbox id, resolved once
    pub async fn inbox_id(&self) -> Result<i64> {
        self.inbox_id
            .get_or_try_init(|| self.resolve_inbox())
            .await
            .copied()
    }

    async fn resolve_inbox(&self) -> Result<i64> {
        let name = self.config.inbox_name();
        let inboxes = self.client.list_inboxes().await?;
        if let Some(inbox) = inboxes.iter().find(|i| i.name == name) {
            debug!(session_id = %self.session_id, inbox_id = inbox.id, "Inbox resolved");
            return Ok(inbox.id);
        }
        if !self.config.auto_create {
            return Err(ChatwootError::InboxNotFound(name.to_string()));
        }

        let inbox = self.client.create_inbox(name).await?;
        info!(session_id = %self.session_id, inbox_id = inbox.id, name, "Inbox created");
        Ok(inbox.id)
    }

    /// Handle one WhatsApp-side event
    pub async fn handle_event(&self, event: &SessionEvent) -> Result<()> {
        match &event.event {
            ProtocolEvent::Message(msg) => self.forward_message(msg).await.map(|_| ()),
            ProtocolEvent::HistorySync(sync) => {
                let Some(cutoff) = self.import_cutoff() else {
                    debug!(session_id = %self.session_id, "History import disabled, skipping sync");
                    return Ok(());
                };
                let mut imported = 0;
                for msg in sync.messages.iter().filter(|m| m.timestamp >= cutoff) {
                    match self.forward_message(msg).await {
                        Ok(true) => imported += 1,
                        Ok(false) => {}
                        Err(e) => warn!(
                            session_id = %self.session_id,
                            message_id = %msg.id,
                            error = %e,
                            "Failed to import history message"
                        ),
                    }
                }
                info!(session_id = %self.session_id, imported, "History sync imported");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn import_cutoff(&self) -> Option<DateTime<Utc>> {
        if self.config.import_days == 0 {
            return None;
        }
        Some(Utc::now() - chrono::Duration::days(i64::from(self.config.import_days)))
    }

    /// Post a WhatsApp message to Chatwoot. Returns whether anything was posted.
    pub async fn forward_message(&self, msg: &MessageEvent) -> Result<bool> {
        if self.config.ignores(&msg.chat_jid) || self.config.ignores(&msg.sender_jid) {
            debug!(session_id = %self.session_id, chat = %msg.chat_jid, "Chat ignored");
            return Ok(false);
        }
        if msg.from_me {
            let _gate = self.send_gate.lock().await;
            if self.take_echo(&msg.id) {
                debug!(session_id = %self.session_id, message_id = %msg.id, "Skipping echo of a Chatwoot reply");
                return Ok(false);
            }
        }

        let text = msg.content.display_text().unwrap_or_default();
        let media = msg.content.media();
        if text.trim().is_empty() && media.is_none() {
            debug!(session_id = %self.session_id, message_id = %msg.id, "Nothing to post");
            return Ok(false);
        }

        let key = self.contact_key(msg);
        let Some(identity) = self.resolve_identity(&key).await? else {
            debug!(session_id = %self.session_id, contact = %key.key, "Unknown contact and auto create is off");
            return Ok(false);
        };

        let mut message = NewMessage::new(
            self.render_content(msg, text),
            if msg.from_me {
                MessageDirection::Outgoing
            } else {
                MessageDirection::Incoming
            },
        );
        message.source_id = Some(format!("{}{}", SOURCE_PREFIX, msg.id));
        message.content_attributes = msg.quoted_id.as_ref().map(|quoted| {
            serde_json::json!({ "in_reply_to_external_id": format!("{}{}", SOURCE_PREFIX, quoted) })
        });

        let posted = match media {
            Some(media) => match self.sender.download_media(&self.session_id, media).await {
                Ok(data) => {
                    let attachment = Attachment {
                        filename: media.upload_filename(&msg.id),
                        mimetype: media.mimetype.clone(),
                        data,
                    };
                    self.client
                        .create_message_with_attachment(identity.conversation_id, &message, attachment)
                        .await
                }
                Err(e) => {
                    warn!(session_id = %self.session_id, message_id = %msg.id, error = %e, "Media download failed, posting text only");
                    if message.content.trim().is_empty() {
                        message.content = "[media unavailable]".to_string();
                    }
                    self.client
                        .create_message(identity.conversation_id, &message)
                        .await
                }
            },
            None => {
                self.client
                    .create_message(identity.conversation_id, &message)
                    .await
            }
        };

        match posted {
            Ok(created) => {
                debug!(
                    session_id = %self.session_id,
                    message_id = %msg.id,
                    chatwoot_id = created.id,
                    "Message posted to Chatwoot"
                );
                Ok(true)
            }
            Err(e) => {
                // Conversation may be gone; look it up again next time.
                self.identities.remove(&key.key);
                Err(e)
            }
        }
    }

    fn render_content(&self, msg: &MessageEvent, text: String) -> String {
        if !msg.is_group || msg.from_me {
            return text;
        }
        let author = msg
            .push_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| jid::jid_to_phone(&msg.sender_jid))
            .unwrap_or_else(|| msg.sender_jid.clone());
        if text.is_empty() {
            format!("**{}:**", author)
        } else {
            format!("**{}:**\n{}", author, text)
        }
    }

    fn contact_key(&self, msg: &MessageEvent) -> ContactKey {
        let merge = self.config.merge_brazil_contacts;

        if !msg.is_group && !jid::is_group(&msg.chat_jid) {
            if let Some(phone) = jid::jid_to_phone(&msg.chat_jid) {
                let digits = jid::digits(&phone);
                let name = if msg.from_me {
                    None
                } else {
                    msg.push_name.clone().filter(|n| !n.trim().is_empty())
                };
                return ContactKey {
                    key: phone::canonical(&digits, merge),
                    phones: phone::variants(&digits, merge),
                    identifier: msg.chat_jid.clone(),
                    name: name.unwrap_or(phone),
                };
            }
        }

        ContactKey {
            key: msg.chat_jid.clone(),
            phones: Vec::new(),
            identifier: msg.chat_jid.clone(),
            name: if jid::is_group(&msg.chat_jid) {
                format!("Group {}", jid::user_part(&msg.chat_jid))
            } else {
                jid::user_part(&msg.chat_jid).to_string()
            },
        }
    }

    async fn resolve_identity(&self, key: &ContactKey) -> Result<Option<Identity>> {
        if let Some(identity) = self.identities.get(&key.key).map(|i| *i.value()) {
            return Ok(Some(identity));
        }

        let inbox_id = self.inbox_id().await?;
        let (contact_id, source_id) = match self.find_contact(key).await? {
            Some(contact) => (contact.id, None),
            None if !self.config.auto_create => return Ok(None),
            None => {
                let new_contact = NewContact {
                    inbox_id,
                    name: key.name.clone(),
                    phone_number: key.phones.first().map(|d| format!("+{}", d)),
                    identifier: Some(key.identifier.clone()),
                };
                let (contact, source_id) = self.client.create_contact(&new_contact).await?;
                info!(session_id = %self.session_id, contact_id = contact.id, "Chatwoot contact created");
                (contact.id, source_id)
            }
        };

        let conversation_id = self
            .open_conversation(inbox_id, contact_id, source_id)
            .await?;
        let identity = Identity {
            contact_id,
            conversation_id,
        };
        self.identities.insert(key.key.clone(), identity);
        Ok(Some(identity))
    }

    async fn find_contact(&self, key: &ContactKey) -> Result<Option<Contact>> {
        if key.phones.is_empty() {
            let found = self.client.search_contact(&key.identifier).await?;
            return Ok(found
                .into_iter()
                .find(|c| c.identifier.as_deref() == Some(key.identifier.as_str())));
        }

        for digits in &key.phones {
            let found = self.client.search_contact(&format!("+{}", digits)).await?;
            let matched = found.into_iter().find(|c| {
                c.phone_number
                    .as_deref()
                    .map(|p| key.phones.contains(&jid::digits(p)))
                    .unwrap_or(false)
                    || c.identifier.as_deref() == Some(key.identifier.as_str())
            });
            if matched.is_some() {
                return Ok(matched);
            }
        }
        Ok(None)
    }

    fn reopen_status(&self) -> &'static str {
        if self.config.conversation_pending {
            "pending"
        } else {
            "open"
        }
    }

    async fn open_conversation(
        &self,
        inbox_id: i64,
        contact_id: i64,
        source_id: Option<String>,
    ) -> Result<i64> {
        let conversations: Vec<_> = self
            .client
            .list_contact_conversations(contact_id)
            .await?
            .into_iter()
            .filter(|c| c.inbox_id.map(|id| id == inbox_id).unwrap_or(true))
            .collect();

        if let Some(active) = conversations.iter().find(|c| !c.is_resolved()) {
            return Ok(active.id);
        }

        if self.config.reopen_conversation {
            if let Some(latest) = conversations.iter().max_by_key(|c| c.id) {
                self.client
                    .toggle_status(latest.id, self.reopen_status())
                    .await?;
                info!(session_id = %self.session_id, conversation_id = latest.id, "Conversation reopened");
                return Ok(latest.id);
            }
        }

        let created = self
            .client
            .create_conversation(&NewConversation {
                inbox_id,
                contact_id,
                source_id,
                status: Some(self.reopen_status().to_string()),
            })
            .await?;
        info!(session_id = %self.session_id, conversation_id = created.id, "Conversation created");
        Ok(created.id)
    }

    /// Forget cached identities pointing at a conversation
    pub fn invalidate_conversation(&self, conversation_id: i64) {
        self.identities
            .retain(|_, identity| identity.conversation_id != conversation_id);
    }

    fn remember_echo(&self, id: String) {
        if let Ok(mut echoes) = self.echoes.lock() {
            echoes.insert(id);
        }
    }

    fn take_echo(&self, id: &str) -> bool {
        self.echoes
            .lock()
            .map(|mut echoes| echoes.take(id))
            .unwrap_or(false)
    }

    /// Handle one parsed Chatwoot webhook
    pub async fn process_webhook(&self, event: ChatwootEvent) -> Result<InboundOutcome> {
        match event {
            ChatwootEvent::MessageCreated(msg) => self.forward_reply(msg).await,
            ChatwootEvent::ConversationStatusChanged {
                conversation_id: Some(id),
                status: Some(status),
            } if status == "resolved" => {
                self.invalidate_conversation(id);
                Ok(InboundOutcome::Ignored)
            }
            _ => Ok(InboundOutcome::Ignored),
        }
    }

    async fn forward_reply(&self, msg: WebhookMessage) -> Result<InboundOutcome> {
        if msg.private {
            return Ok(InboundOutcome::Skipped(SkipReason::Private));
        }
        if msg.direction != Some(MessageDirection::Outgoing) {
            return Ok(InboundOutcome::Skipped(SkipReason::NotOutgoing));
        }
        if msg
            .source_id
            .as_deref()
            .map(|s| s.starts_with(SOURCE_PREFIX))
            .unwrap_or(false)
        {
            return Ok(InboundOutcome::Skipped(SkipReason::Echo));
        }

        let Some(to) = msg.contact.as_ref().and_then(recipient) else {
            info!(
                session_id = %self.session_id,
                conversation_id = ?msg.conversation_id,
                "Webhook contact has no phone number, skipping send"
            );
            return Ok(InboundOutcome::Skipped(SkipReason::UnresolvedContact));
        };

        let text = self.sign(msg.content.unwrap_or_default(), msg.sender_name.as_deref());
        let requests = build_requests(&to, text, &msg.attachments, msg.in_reply_to);
        if requests.is_empty() {
            return Ok(InboundOutcome::Skipped(SkipReason::Empty));
        }

        let _gate = self.send_gate.lock().await;
        let mut sent = 0;
        for request in requests {
            let kind = request.content.kind();
            let receipt = self.sender.send(&self.session_id, request).await?;
            debug!(session_id = %self.session_id, to = %to, kind, id = %receipt.id, "Chatwoot reply sent");
            self.remember_echo(receipt.id);
            sent += 1;
        }
        Ok(InboundOutcome::Sent(sent))
    }

    fn sign(&self, text: String, agent: Option<&str>) -> String {
        match agent {
            Some(agent) if self.config.sign_msg && !text.trim().is_empty() => {
                format!("{}{}*{}*", text, self.config.sign_delimiter, agent)
            }
            _ => text,
        }
    }
}

/// Phone number or JID to send a reply to
fn recipient(contact: &WebhookContact) -> Option<String> {
    if let Some(phone) = &contact.phone_number {
        if !jid::digits(phone).is_empty() {
            return Some(phone.clone());
        }
    }
    contact
        .identifier
        .as_ref()
        .filter(|id| id.contains('@'))
        .cloned()
}

fn attachment_filename(url: &str) -> String {
    url.split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("file")
        .to_string()
}

fn build_requests(
    to: &str,
    text: String,
    attachments: &[WebhookAttachment],
    quoted_id: Option<String>,
) -> Vec<SendRequest> {
    let mut requests = Vec::new();
    let mut caption = Some(text).filter(|t| !t.trim().is_empty());

    for attachment in attachments {
        let media = MediaSource::Url(attachment.data_url.clone());
        let content = match attachment.file_type.as_str() {
            "image" => SendContent::Image {
                media,
                caption: caption.take(),
                mimetype: None,
            },
            "video" => SendContent::Video {
                media,
                caption: caption.take(),
                mimetype: None,
            },
            "audio" => SendContent::Audio {
                media,
                ptt: false,
                mimetype: None,
            },
            _ => SendContent::Document {
                media,
                filename: attachment_filename(&attachment.data_url),
                caption: caption.take(),
                mimetype: None,
            },
        };
        requests.push(SendRequest {
            to: to.to_string(),
            content,
            quoted_id: None,
        });
    }

    // Text left over: no attachments, or only captionless ones.
    if let Some(body) = caption {
        requests.insert(
            0,
            SendRequest {
                to: to.to_string(),
                content: SendContent::Text { body },
                quoted_id: None,
            },
        );
    }

    if let Some(first) = requests.first_mut() {
        first.quoted_id = quoted_id;
    }
    requests
}
