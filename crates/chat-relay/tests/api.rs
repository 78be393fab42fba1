use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{header as header_eq, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_relay::config::Settings;
use chat_relay::models::chat::Role;
use chat_relay::services::{ConversationStore, LlmService, RelayService};
use chat_relay::{build_router, AppState};

const API_KEY: &str = "test-api-key";

struct TestApp {
    router: Router,
    store: Arc<ConversationStore>,
}

impl TestApp {
    fn new(base_url: &str, api_key: Option<&str>) -> Self {
        Self::with_timeout(base_url, api_key, Duration::from_secs(5))
    }

    fn with_timeout(base_url: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let mut settings =
            Settings::from_config(Settings::defaults().unwrap().build().unwrap()).unwrap();
        settings.llm.base_url = base_url.to_string();
        settings.llm.api_key = api_key.map(str::to_string);
        settings.server.index_path =
            concat!(env!("CARGO_MANIFEST_DIR"), "/static/index.html").to_string();

        let store = Arc::new(ConversationStore::default());
        let llm_service = Arc::new(LlmService::with_timeout(settings.llm.clone(), timeout).unwrap());
        let relay = Arc::new(RelayService::new(
            store.clone(),
            llm_service,
            settings.prompts.system_prompt.clone(),
        ));

        Self {
            router: build_router(AppState::new(relay, settings)),
            store,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn chat(&self, body: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

fn messages_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "msg_test123",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": text }],
        "model": "claude-3-sonnet-20240229",
        "stop_reason": "end_turn",
        "usage": { "input_tokens": 10, "output_tokens": 20 }
    }))
}

async fn mount_reply(server: &MockServer, reply: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(reply)
        .expect(calls)
        .mount(server)
        .await;
}

async fn outbound_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.body_json::<Value>().unwrap())
        .collect()
}

#[tokio::test]
async fn test_first_exchange_creates_three_turn_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header_eq("x-api-key", API_KEY))
        .and(header_eq("anthropic-version", "2023-06-01"))
        .respond_with(messages_reply("Hello! How can I help?"))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server.uri(), Some(API_KEY));
    let (status, body) = app
        .chat(r#"{"message": "hi", "conversation_id": "c-1"}"#)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Hello! How can I help?");
    assert_eq!(body["conversation_id"], "c-1");

    let history = app.store.snapshot("c-1").await.unwrap();
    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);

    let sent = outbound_bodies(&server).await;
    assert_eq!(sent[0]["model"], "claude-3-sonnet-20240229");
    assert_eq!(sent[0]["max_tokens"], 1000);
    assert_eq!(sent[0]["messages"].as_array().unwrap().len(), 2);
    assert_eq!(sent[0]["messages"][0]["role"], "system");
    assert_eq!(sent[0]["messages"][1], json!({ "role": "user", "content": "hi" }));
}

#[tokio::test]
async fn test_default_conversation_accumulates_history() {
    let server = MockServer::start().await;
    mount_reply(&server, messages_reply("sure"), 2).await;

    let app = TestApp::new(&server.uri(), Some(API_KEY));
    let (_, first) = app.chat(r#"{"message": "hi"}"#).await;
    let (status, second) = app.chat(r#"{"message": "and then?"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["conversation_id"], "default");
    assert_eq!(second["conversation_id"], "default");
    assert_eq!(app.store.snapshot("default").await.unwrap().len(), 5);

    let sent = outbound_bodies(&server).await;
    let second_messages = sent[1]["messages"].as_array().unwrap();
    assert_eq!(second_messages.len(), 4);
    assert_eq!(second_messages[2], json!({ "role": "assistant", "content": "sure" }));
    assert_eq!(second_messages[3], json!({ "role": "user", "content": "and then?" }));
}

#[tokio::test]
async fn test_identical_requests_append_independent_exchanges() {
    let server = MockServer::start().await;
    mount_reply(&server, messages_reply("same"), 2).await;

    let app = TestApp::new(&server.uri(), Some(API_KEY));
    let request = r#"{"message": "hi", "conversation_id": "replay"}"#;
    app.chat(request).await;
    app.chat(request).await;

    let history = app.store.snapshot("replay").await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history.iter().filter(|t| t.role == Role::System).count(), 1);
}

#[tokio::test]
async fn test_missing_message_is_bad_request() {
    let server = MockServer::start().await;
    mount_reply(&server, messages_reply("unused"), 0).await;

    let app = TestApp::new(&server.uri(), Some(API_KEY));

    for body in [r#"{}"#, r#"{"message": ""}"#, r#"{"conversation_id": "x"}"#] {
        let (status, error) = app.chat(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(error["code"], "E3002");
        assert!(error["error"].is_string());
    }

    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let server = MockServer::start().await;
    mount_reply(&server, messages_reply("unused"), 0).await;

    let app = TestApp::new(&server.uri(), Some(API_KEY));

    for body in ["{not json", "[]", r#"{"message": 42}"#] {
        let (status, error) = app.chat(body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert_eq!(error["code"], "E3001");
    }

    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_missing_api_key_fails_without_outbound_call() {
    let server = MockServer::start().await;
    mount_reply(&server, messages_reply("unused"), 0).await;

    let app = TestApp::new(&server.uri(), None);
    let (status, error) = app.chat(r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["code"], "E1000");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_upstream_timeout_appends_nothing() {
    let server = MockServer::start().await;
    mount_reply(
        &server,
        messages_reply("too late").set_delay(Duration::from_secs(2)),
        1,
    )
    .await;

    let app = TestApp::with_timeout(&server.uri(), Some(API_KEY), Duration::from_millis(200));
    let (status, error) = app.chat(r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["code"], "E1002");
    assert!(app.store.snapshot("default").await.is_none());
}

#[tokio::test]
async fn test_upstream_status_errors_are_classified() {
    let cases = [
        (401, "authentication"),
        (403, "permission"),
        (429, "rate limit"),
        (500, "rejected"),
    ];

    for (upstream, expected) in cases {
        let server = MockServer::start().await;
        mount_reply(
            &server,
            ResponseTemplate::new(upstream).set_body_json(json!({
                "type": "error",
                "error": { "type": "api_error", "message": "secret upstream detail" }
            })),
            1,
        )
        .await;

        let app = TestApp::new(&server.uri(), Some(API_KEY));
        let (status, error) = app.chat(r#"{"message": "hi"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error["code"], "E1003");
        let message = error["error"].as_str().unwrap();
        assert!(message.contains(&upstream.to_string()), "{}", message);
        assert!(message.contains(expected), "{}", message);
        assert!(!message.contains("secret upstream detail"));
        assert!(app.store.is_empty());
    }
}

#[tokio::test]
async fn test_connection_failure_is_classified() {
    // Nothing listens on port 1
    let app = TestApp::new("http://127.0.0.1:1", Some(API_KEY));
    let (status, error) = app.chat(r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error["code"], "E1001");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_upstream_contract_violations_are_classified() {
    let cases = [
        (ResponseTemplate::new(200).set_body_string("not json"), "E2001"),
        (ResponseTemplate::new(200).set_body_json(json!({ "id": "msg" })), "E2002"),
        (ResponseTemplate::new(200).set_body_json(json!({ "content": [] })), "E2003"),
        (
            ResponseTemplate::new(200).set_body_json(json!({ "content": [{ "type": "tool_use" }] })),
            "E2004",
        ),
    ];

    for (reply, code) in cases {
        let server = MockServer::start().await;
        mount_reply(&server, reply, 1).await;

        let app = TestApp::new(&server.uri(), Some(API_KEY));
        let (status, error) = app.chat(r#"{"message": "hi", "conversation_id": "c"}"#).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error["code"], code);
        assert!(!app.store.contains("c"), "{} left history behind", code);
    }
}

#[tokio::test]
async fn test_health_reports_configuration() {
    let app = TestApp::new("http://127.0.0.1:1", Some(API_KEY));
    let (status, body) = app
        .send(Request::get("/api/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");
    assert_eq!(body["has_api_key"], true);
    assert!(body["timestamp"].is_string());
    assert!(body["server_time"].is_string());

    let app = TestApp::new("http://127.0.0.1:1", None);
    let (_, body) = app
        .send(Request::get("/api/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(body["has_api_key"], false);
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = TestApp::new("http://127.0.0.1:1", Some(API_KEY));
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/chat")
                .header(header::ORIGIN, "http://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_index_page_is_served() {
    let app = TestApp::new("http://127.0.0.1:1", Some(API_KEY));
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
}
