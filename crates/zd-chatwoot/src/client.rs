//! Chatwoot account API client
//!
//! Stateless wrapper: every call carries the account token and fails with
//! [`ChatwootError::Api`] on a non-2xx answer. No retries.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use zd_core::ChatwootConfig;

use crate::error::{ChatwootError, Result};
use crate::types::{
    Contact, ContactEnvelope, Conversation, Inbox, Message, NewContact, NewConversation,
    NewMessage, Payload,
};

const TOKEN_HEADER: &str = "api_access_token";

pub struct ChatwootClient {
    client: Client,
    base_url: String,
    account_id: String,
    token: String,
}

impl std::fmt::Debug for ChatwootClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatwootClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Uploaded file for [`ChatwootClient::create_message_with_attachment`]
pub struct Attachment {
    pub filename: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

impl ChatwootClient {
    pub fn new(config: &ChatwootConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            account_id: config.account_id.trim().to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/{}",
            self.base_url, self.account_id, path
        )
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.header(TOKEN_HEADER, &self.token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Chatwoot request failed: {} - {}", status, body);
            return Err(ChatwootError::Api {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| ChatwootError::Parse(e.to_string()))
    }

    pub async fn list_inboxes(&self) -> Result<Vec<Inbox>> {
        let payload: Payload<Vec<Inbox>> = self.execute(self.client.get(self.url("inboxes"))).await?;
        Ok(payload.payload)
    }

    /// Create an API channel inbox
    pub async fn create_inbox(&self, name: &str) -> Result<Inbox> {
        let body = serde_json::json!({
            "name": name,
            "channel": { "type": "api" },
        });
        debug!(name, "Creating Chatwoot inbox");
        self.execute(self.client.post(self.url("inboxes")).json(&body))
            .await
    }

    pub async fn search_contact(&self, query: &str) -> Result<Vec<Contact>> {
        let request = self
            .client
            .get(self.url("contacts/search"))
            .query(&[("q", query)]);
        let payload: Payload<Vec<Contact>> = self.execute(request).await?;
        Ok(payload.payload)
    }

    /// Returns the contact and, when Chatwoot reports one, the contact inbox source id
    pub async fn create_contact(&self, contact: &NewContact) -> Result<(Contact, Option<String>)> {
        debug!(name = %contact.name, "Creating Chatwoot contact");
        let envelope: ContactEnvelope = self
            .execute(self.client.post(self.url("contacts")).json(contact))
            .await?;
        Ok(envelope.into_parts())
    }

    pub async fn list_contact_conversations(&self, contact_id: i64) -> Result<Vec<Conversation>> {
        let url = self.url(&format!("contacts/{}/conversations", contact_id));
        let payload: Payload<Vec<Conversation>> = self.execute(self.client.get(url)).await?;
        Ok(payload.payload)
    }

    pub async fn create_conversation(&self, conversation: &NewConversation) -> Result<Conversation> {
        self.execute(
            self.client
                .post(self.url("conversations"))
                .json(conversation),
        )
        .await
    }

    /// Set a conversation's status (`open`, `pending`, `resolved`)
    pub async fn toggle_status(&self, conversation_id: i64, status: &str) -> Result<()> {
        let url = self.url(&format!("conversations/{}/toggle_status", conversation_id));
        let _: serde_json::Value = self
            .execute(
                self.client
                    .post(url)
                    .json(&serde_json::json!({ "status": status })),
            )
            .await?;
        Ok(())
    }

    pub async fn create_message(&self, conversation_id: i64, message: &NewMessage) -> Result<Message> {
        let url = self.url(&format!("conversations/{}/messages", conversation_id));
        self.execute(self.client.post(url).json(message)).await
    }

    /// Post a message with one file attached, as multipart form data
    pub async fn create_message_with_attachment(
        &self,
        conversation_id: i64,
        message: &NewMessage,
        attachment: Attachment,
    ) -> Result<Message> {
        let url = self.url(&format!("conversations/{}/messages", conversation_id));

        let part = Part::bytes(attachment.data)
            .file_name(attachment.filename)
            .mime_str(&attachment.mimetype)
            .map_err(|e| ChatwootError::Parse(e.to_string()))?;

        let mut form = Form::new()
            .text("content", message.content.clone())
            .text("message_type", message.message_type.as_str())
            .text("private", message.private.to_string())
            .part("attachments[]", part);
        if let Some(source_id) = &message.source_id {
            form = form.text("source_id", source_id.clone());
        }
        if let Some(attributes) = &message.content_attributes {
            form = form.text("content_attributes", attributes.to_string());
        }

        self.execute(self.client.post(url).multipart(form)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageDirection;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ChatwootClient {
        let config = ChatwootConfig {
            enabled: true,
            account_id: "7".to_string(),
            token: "t".to_string(),
            base_url: format!("{}/", server.uri()),
            ..ChatwootConfig::default()
        };
        ChatwootClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_inboxes_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/7/inboxes"))
            .and(header("api_access_token", "t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "payload": [{ "id": 1, "name": "WhatsApp", "channel_type": "Channel::Api" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inboxes = client(&server).list_inboxes().await.unwrap();
        assert_eq!(inboxes.len(), 1);
        assert_eq!(inboxes[0].name, "WhatsApp");
    }

    #[tokio::test]
    async fn test_non_success_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        match client(&server).list_inboxes().await {
            Err(ChatwootError::Api { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_search_contact_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/accounts/7/contacts/search"))
            .and(query_param("q", "+15551234567"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "payload": [{ "id": 10, "phone_number": "+15551234567" }]
            })))
            .mount(&server)
            .await;

        let found = client(&server).search_contact("+15551234567").await.unwrap();
        assert_eq!(found[0].id, 10);
    }

    #[tokio::test]
    async fn test_create_message_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/accounts/7/conversations/20/messages"))
            .and(body_partial_json(serde_json::json!({
                "content": "hi",
                "message_type": "incoming",
                "source_id": "WAID:ABC"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 99 })))
            .expect(1)
            .mount(&server)
            .await;

        let mut message = NewMessage::new("hi", MessageDirection::Incoming);
        message.source_id = Some("WAID:ABC".to_string());
        let created = client(&server).create_message(20, &message).await.unwrap();
        assert_eq!(created.id, 99);
    }

    #[tokio::test]
    async fn test_attachment_is_multipart() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/accounts/7/conversations/20/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 5 })))
            .mount(&server)
            .await;

        let message = NewMessage::new("photo", MessageDirection::Incoming);
        let attachment = Attachment {
            filename: "ABC.jpeg".to_string(),
            mimetype: "image/jpeg".to_string(),
            data: vec![1, 2, 3],
        };
        client(&server)
            .create_message_with_attachment(20, &message, attachment)
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let content_type = received[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("multipart/form-data"));
    }
}
