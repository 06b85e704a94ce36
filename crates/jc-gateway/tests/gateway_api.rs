//! HTTP-level tests for the gateway router, with a fake backend for the bridge.

use axum::{
    body::Body,
    extract::Path,
    http::{header, HeaderMap, Request, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use jc_auth::domain::keys::parse_key_list;
use jc_auth::{ApiKeyRegistry, AuthContext, Quota, TokenService};
use jc_gateway::{GatewayConfig, GatewayService};
use jc_hub::{Client, EventHub, EventKind, HubConfig, Mailbox};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

const KEY: &str = "gateway-test-key-0001";
const SECRET: &str = "gateway-secret";

struct Harness {
    app: Router,
    hub: EventHub,
    tokens: Arc<TokenService>,
}

fn auth_context() -> AuthContext {
    let keys = parse_key_list(KEY, Quota::default()).unwrap();
    let registry = ApiKeyRegistry::new(keys, Quota::default(), None).unwrap();
    AuthContext::new(
        Arc::new(registry),
        Arc::new(TokenService::new(SECRET, Duration::from_secs(3600))),
        None,
    )
}

fn harness(backend_url: &str) -> Harness {
    let (hub, _task) = EventHub::spawn(HubConfig::default());
    let auth = auth_context();
    let tokens = Arc::clone(&auth.tokens);

    let mut config = GatewayConfig::default();
    config.bridge.backend_url = backend_url.to_string();
    config.bridge.timeout = Duration::from_secs(2);
    config.bridge.connect_timeout = Duration::from_secs(1);

    let service = GatewayService::new(config, hub.clone(), auth).unwrap();
    Harness {
        app: service.router(),
        hub,
        tokens,
    }
}

/// Backend stand-in: model loads and command edits succeed, chat fails.
async fn fake_backend() -> String {
    let app = Router::new()
        .route(
            "/api/models/load",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"status": "loaded", "model": body["model"]}))
            }),
        )
        .route(
            "/api/chat",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model crashed") }),
        )
        .route(
            "/api/commands/:name",
            delete(|Path(name): Path<String>| async move { Json(json!({"deleted": name})) }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn subscribe(hub: &EventHub, id: &str) -> Mailbox {
    let (client, mailbox) = Client::new(id);
    hub.register(client).await;
    mailbox
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn post_json(uri: &str, body: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_health_reports_clients() {
    let h = harness("http://127.0.0.1:9");
    let _mailbox = subscribe(&h.hub, "dash").await;

    let (status, _, body) = send(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 1);
}

#[tokio::test]
async fn test_metrics_is_public_prometheus_text() {
    jc_telemetry::register_metrics().unwrap();
    let h = harness("http://127.0.0.1:9");

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_publish_fans_out_to_subscribers() {
    let h = harness("http://127.0.0.1:9");
    let mut first = subscribe(&h.hub, "one").await;
    let mut second = subscribe(&h.hub, "two").await;

    let (status, _, body) = send(
        &h.app,
        post_json(
            "/api/events",
            r#"{"type": "chat_message", "data": {"text": "hello"}}"#,
            Some(KEY),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"status": "queued"}));

    for mailbox in [&mut first, &mut second] {
        let event = mailbox.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::ChatMessage);
        assert_eq!(event.data()["text"], "hello");
    }
}

#[tokio::test]
async fn test_publish_rejects_bad_bodies() {
    let h = harness("http://127.0.0.1:9");

    let (status, _, body) = send(
        &h.app,
        post_json("/api/events", r#"{"type": "chat_message", "data": {}, "priority": 1}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unknown field"));

    let (status, _, body) = send(
        &h.app,
        post_json("/api/events", r#"{"type": "self_destruct", "data": {}}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown event type: self_destruct");

    let (status, _, _) = send(
        &h.app,
        post_json("/api/events", r#"{"type": "chat_message", "data": "text"}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &h.app,
        post_json("/api/events", r#"{"type": "recording_started"}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("missing field `data`"));
    assert_eq!(h.hub.stats().published, 0);
}

#[tokio::test]
async fn test_publish_and_ws_require_auth() {
    let h = harness("http://127.0.0.1:9");

    let (status, _, body) = send(
        &h.app,
        post_json("/api/events", r#"{"type": "chat_message", "data": {}}"#, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "API key required"}));

    let (status, _, _) = send(&h.app, Request::get("/ws").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, body) = send(
        &h.app,
        Request::get("/ws?token=not-a-jwt").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid token"}));
}

#[tokio::test]
async fn test_session_token_admits_publisher() {
    let h = harness("http://127.0.0.1:9");
    let token = h.tokens.issue(KEY).unwrap().token;

    let req = Request::post("/api/events")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(r#"{"type": "recording_stopped", "data": {}}"#))
        .unwrap();
    let (status, headers, _) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers["X-RateLimit-Limit"], "60");
}

#[tokio::test]
async fn test_bridge_success_broadcasts() {
    let backend = fake_backend().await;
    let h = harness(&backend);
    let mut mailbox = subscribe(&h.hub, "ui").await;

    let (status, _, body) = send(
        &h.app,
        post_json("/api/models/load", r#"{"model": "llama3"}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "loaded", "model": "llama3"}));

    let event = mailbox.recv().await.unwrap();
    assert_eq!(event.kind(), EventKind::ModelLoaded);
    assert_eq!(event.data()["model"], "llama3");
    assert_eq!(event.data()["result"]["status"], "loaded");

    let req = Request::delete("/api/commands/open-browser")
        .header("X-API-Key", KEY)
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&h.app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], "open-browser");

    let event = mailbox.recv().await.unwrap();
    assert_eq!(event.kind(), EventKind::CommandDeleted);
    assert_eq!(event.data()["name"], "open-browser");
}

#[tokio::test]
async fn test_bridge_failure_is_bad_gateway_without_broadcast() {
    let backend = fake_backend().await;
    let h = harness(&backend);
    let _mailbox = subscribe(&h.hub, "ui").await;

    let (status, _, body) = send(
        &h.app,
        post_json("/api/chat", r#"{"message": "hi"}"#, Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "Backend request failed"}));
    assert_eq!(h.hub.stats().published, 0);
}

#[tokio::test]
async fn test_bridge_unreachable_backend() {
    let h = harness("http://127.0.0.1:9");
    let (status, _, _) = send(
        &h.app,
        post_json("/api/plugins/toggle", r#"{"plugin": "weather", "enabled": true}"#, Some(KEY)),
    )
    .await;
    assert!(status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(h.hub.stats().published, 0);
}
