//! Router-level tests: real handlers and core services, scripted WhatsApp client

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zd_api::{AppState, app};
use zd_chatwoot::IntegrationRegistry;
use zd_core::{Config, SessionService, SqliteRepository};
use zd_webhook::WebhookDispatcher;
use zd_whatsapp::ConnectionRegistry;
use zd_whatsapp::testing::{SCRIPTED_QR, Script, ScriptedFactory};

const ADMIN_KEY: &str = "admin-secret";
const DEVICE: &str = "15551234567:4@s.whatsapp.net";

struct Harness {
    app: Router,
    state: AppState,
    factory: Arc<ScriptedFactory>,
}

fn harness(script: Script) -> Harness {
    let mut config = Config::default();
    config.server.api_key = Some(ADMIN_KEY.to_string());

    let repo = Arc::new(SqliteRepository::in_memory().unwrap());
    let sessions = SessionService::new(repo.clone());
    let factory = Arc::new(ScriptedFactory::new(script));
    let registry =
        ConnectionRegistry::new(factory.clone(), sessions.clone(), Duration::from_secs(2));

    let webhooks = Arc::new(WebhookDispatcher::new(repo.clone(), &config.webhook).unwrap());
    let chatwoot = Arc::new(IntegrationRegistry::new(
        repo,
        Arc::new(registry.clone()),
        &config.chatwoot,
    ));
    registry.add_sink(webhooks.clone());
    registry.add_sink(chatwoot.clone());

    let state = AppState {
        config: Arc::new(config),
        sessions,
        registry,
        webhooks,
        chatwoot,
    };
    Harness {
        app: app(state.clone()),
        state,
        factory,
    }
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call_with_key(method, uri, body, Some(ADMIN_KEY)).await
    }

    async fn call_with_key(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {}", key));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create(&self, name: &str) -> String {
        let (status, body) = self
            .call("POST", "/sessions", Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Callback URL as it is configured on the Chatwoot side
    async fn callback(&self, id: &str) -> String {
        let session = self.state.sessions.get_session_by_id(id).await.unwrap();
        format!("/chatwoot/webhook/{}?token={}", id, session.api_key)
    }
}

#[tokio::test]
async fn health_is_open() {
    let h = harness(Script::qr());
    let (status, _) = h.call_with_key("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn management_requires_admin_key() {
    let h = harness(Script::qr());

    let (status, body) = h.call_with_key("GET", "/sessions", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = h.call_with_key("GET", "/sessions", None, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = h.call("GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "code": 200, "data": [] }));
}

#[tokio::test]
async fn create_and_resolve_sessions() {
    let h = harness(Script::qr());

    let (status, body) = h
        .call("POST", "/sessions", Some(json!({ "name": "support" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], 201);
    assert!(body["data"]["api_key"].is_string());
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = h.call("GET", "/sessions/support", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id.as_str());
    assert_eq!(body["data"]["status"], "created");
    assert!(body["data"].get("api_key").is_none());

    let (status, body) = h
        .call("POST", "/sessions", Some(json!({ "name": "support" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_NAME_TAKEN");

    let (status, body) = h.call("GET", "/sessions/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn connect_returns_qr() {
    let h = harness(Script::qr());
    let id = h.create("support").await;

    let (status, body) = h
        .call("POST", &format!("/sessions/{}/connect", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "awaiting_link");
    assert_eq!(body["data"]["qr_code"], SCRIPTED_QR);

    let (status, body) = h.call("GET", &format!("/sessions/{}/qr", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["qr_code"], SCRIPTED_QR);

    let (status, body) = h
        .call("POST", &format!("/sessions/{}/pair", id), Some(json!({ "phone": "+1 555 123 4567" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["code"].is_string());
}

#[tokio::test]
async fn qr_before_connect_is_conflict() {
    let h = harness(Script::qr());
    let id = h.create("support").await;

    let (status, body) = h.call("GET", &format!("/sessions/{}/qr", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_NOT_STARTED");
}

#[tokio::test]
async fn device_conflict_is_409() {
    let h = harness(Script::linked());
    let a = h.create("a").await;
    let b = h.create("b").await;
    h.state.sessions.bind_device(&a, DEVICE).await.unwrap();
    h.state.sessions.bind_device(&b, DEVICE).await.unwrap();

    let (status, _) = h.call("POST", &format!("/sessions/{}/connect", a), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.call("POST", &format!("/sessions/{}/connect", b), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DEVICE_ALREADY_IN_USE");
    assert!(h.state.registry.is_connected(&a));
}

#[tokio::test]
async fn send_requires_connection() {
    let h = harness(Script::linked());
    let id = h.create("support").await;
    let message = json!({ "to": "+15551234567", "type": "text", "body": "hello" });

    let (status, body) = h
        .call("POST", &format!("/sessions/{}/messages", id), Some(message.clone()))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "SESSION_NOT_CONNECTED");

    h.call("POST", &format!("/sessions/{}/connect", id), None).await;
    let (status, body) = h
        .call("POST", &format!("/sessions/{}/messages", id), Some(message))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "SCRIPTED1");

    let sent = h.factory.client(&id).unwrap().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "15551234567@s.whatsapp.net");
}

#[tokio::test]
async fn webhook_with_bogus_event_is_rejected() {
    let h = harness(Script::qr());
    let id = h.create("support").await;

    let (status, body) = h
        .call(
            "PUT",
            &format!("/sessions/{}/webhook", id),
            Some(json!({
                "url": "https://hooks.example/in",
                "events": ["message.any", "bogus.event"]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_EVENT");
    assert_eq!(body["error"]["details"]["event"], "bogus.event");

    let (status, _) = h.call("GET", &format!("/sessions/{}/webhook", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = h
        .call(
            "PUT",
            &format!("/sessions/{}/webhook", id),
            Some(json!({ "url": "https://hooks.example/in", "events": ["message.any"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["events"], json!(["message.any"]));
}

#[tokio::test]
async fn chatwoot_config_validation_and_redaction() {
    let h = harness(Script::qr());
    let id = h.create("support").await;
    let uri = format!("/sessions/{}/chatwoot", id);

    let (status, body) = h
        .call(
            "PUT",
            &uri,
            Some(json!({ "enabled": true, "account_id": "7", "base_url": "https://cw.example" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "CONFIG_INVALID");

    let (status, body) = h
        .call(
            "PUT",
            &uri,
            Some(json!({
                "enabled": true,
                "account_id": "7",
                "token": "t",
                "base_url": "https://cw.example"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["token"], "********");
    assert!(h.state.chatwoot.is_registered(&id));

    let (status, body) = h.call("DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
    assert!(!h.state.chatwoot.is_registered(&id));
}

#[tokio::test]
async fn chatwoot_reply_is_sent_and_private_note_is_not() {
    let h = harness(Script::linked());
    let id = h.create("support").await;
    h.call("POST", &format!("/sessions/{}/connect", id), None).await;
    h.call(
        "PUT",
        &format!("/sessions/{}/chatwoot", id),
        Some(json!({
            "enabled": true,
            "account_id": "7",
            "token": "t",
            "base_url": "https://cw.example"
        })),
    )
    .await;

    let callback = h.callback(&id).await;
    let mut payload = json!({
        "event": "message_created",
        "message_type": 1,
        "private": true,
        "content": "reply",
        "conversation": { "meta": { "sender": { "phone_number": "+15551234567" } } }
    });

    let (status, body) = h
        .call_with_key("POST", &callback, Some(payload.clone()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "result": "skipped", "reason": "private" }));
    assert!(h.factory.client(&id).unwrap().sent().is_empty());

    payload["private"] = json!(false);
    let (status, body) = h
        .call_with_key("POST", &callback, Some(payload), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "result": "sent", "sent": 1 }));

    let sent = h.factory.client(&id).unwrap().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "15551234567@s.whatsapp.net");
}

#[tokio::test]
async fn chatwoot_callback_errors() {
    let h = harness(Script::qr());
    let id = h.create("support").await;
    let callback = h.callback(&id).await;

    let (status, body) = h
        .call_with_key("POST", &callback, Some(json!({ "event": "message_created" })), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "INTEGRATION_NOT_FOUND");

    let (status, body) = h
        .call_with_key("POST", &callback, Some(json!({ "content": "no event" })), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn chatwoot_callback_requires_id_and_session_token() {
    let h = harness(Script::linked());
    let id = h.create("support").await;
    h.call("POST", &format!("/sessions/{}/connect", id), None).await;
    h.call(
        "PUT",
        &format!("/sessions/{}/chatwoot", id),
        Some(json!({
            "enabled": true,
            "account_id": "7",
            "token": "t",
            "base_url": "https://cw.example"
        })),
    )
    .await;

    let payload = json!({
        "event": "message_created",
        "message_type": 1,
        "content": "hello",
        "contact": { "phone_number": "+15559999999" }
    });
    let api_key = h.state.sessions.get_session_by_id(&id).await.unwrap().api_key;

    // The session name is not accepted in place of the id
    let by_name = format!("/chatwoot/webhook/support?token={}", api_key);
    let (status, body) = h
        .call_with_key("POST", &by_name, Some(payload.clone()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    for uri in [
        format!("/chatwoot/webhook/{}", id),
        format!("/chatwoot/webhook/{}?token=wrong", id),
    ] {
        let (status, body) = h
            .call_with_key("POST", &uri, Some(payload.clone()), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
    assert!(h.factory.client(&id).unwrap().sent().is_empty());

    let (status, _) = h
        .call_with_key("POST", &h.callback(&id).await, Some(payload), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.factory.client(&id).unwrap().sent().len(), 1);
}

#[tokio::test]
async fn chatwoot_config_round_trip_keeps_token() {
    let h = harness(Script::qr());
    let id = h.create("support").await;
    let uri = format!("/sessions/{}/chatwoot", id);
    h.call(
        "PUT",
        &uri,
        Some(json!({
            "enabled": true,
            "account_id": "7",
            "token": "t",
            "base_url": "https://cw.example"
        })),
    )
    .await;

    let (_, read) = h.call("GET", &uri, None).await;
    assert_eq!(read["data"]["token"], "********");

    let (status, _) = h.call("PUT", &uri, Some(read["data"].clone())).await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.state.chatwoot.get_config(&id).await.unwrap().unwrap();
    assert_eq!(stored.token, "t");
}

#[tokio::test]
async fn chatwoot_connection_test_uses_stored_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts/7/inboxes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payload": [{ "id": 3, "name": "WhatsApp" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(Script::qr());
    let id = h.create("support").await;
    let config = json!({ "enabled": false, "account_id": "7", "token": "t", "base_url": server.uri() });
    h.call("PUT", &format!("/sessions/{}/chatwoot", id), Some(config))
        .await;

    let (status, body) = h
        .call(
            "POST",
            &format!("/sessions/{}/chatwoot/test", id),
            Some(json!({ "account_id": "7", "base_url": server.uri() })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({ "inbox_count": 1, "inbox_found": true, "inbox_id": 3 })
    );
}

#[tokio::test]
async fn delete_session_tears_everything_down() {
    let h = harness(Script::linked());
    let id = h.create("support").await;
    h.call("POST", &format!("/sessions/{}/connect", id), None).await;
    h.call(
        "PUT",
        &format!("/sessions/{}/webhook", id),
        Some(json!({ "url": "https://hooks.example/in", "events": ["all"] })),
    )
    .await;

    let (status, _) = h.call("DELETE", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(!h.state.registry.is_registered(&id));
    assert!(h.state.webhooks.get_webhook(&id).is_none());
    let (status, _) = h.call("GET", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
