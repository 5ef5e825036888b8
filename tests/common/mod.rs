#![allow(dead_code)]

pub mod backend;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use llm_ocr_rust::Gateway;
use llm_ocr_rust::auth::BackendAuth;
use llm_ocr_rust::server::{ServerState, build_router};
use llm_ocr_rust::settings::Settings;

pub const GOOD_TOKEN: &str = "good-token";
pub const USER_ID: &str = "user-1";
pub const PUBLISHABLE_KEY: &str = "pk-test";
pub const EMAIL: &str = "user@example.com";
pub const PASSWORD: &str = "correct horse";
pub const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Chat completions stand-in with a switchable status and reply.
#[derive(Clone)]
pub struct FakeGateway {
    pub status: Arc<AtomicU16>,
    pub reply: Arc<Mutex<String>>,
    pub calls: Arc<AtomicUsize>,
    pub last_body: Arc<Mutex<Option<Value>>>,
}

impl FakeGateway {
    fn new() -> Self {
        Self {
            status: Arc::new(AtomicU16::new(200)),
            reply: Arc::new(Mutex::new("Hello  world\nsecond line".to_string())),
            calls: Arc::new(AtomicUsize::new(0)),
            last_body: Arc::new(Mutex::new(None)),
        }
    }

    pub fn respond_with_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn respond_with_text(&self, text: &str) {
        *self.reply.lock().unwrap() = text.to_string();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_body(&self) -> Value {
        self.last_body.lock().unwrap().clone().unwrap_or(Value::Null)
    }
}

pub struct Harness {
    pub base_url: String,
    pub gateway: FakeGateway,
    pub auth_calls: Arc<AtomicUsize>,
    pub http: reqwest::Client,
}

impl Harness {
    pub fn ocr_url(&self) -> String {
        format!("{}/ocr", self.base_url)
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub async fn post_ocr(&self, body: Value) -> (u16, Value) {
        let response = self
            .http
            .post(self.ocr_url())
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

pub fn test_settings() -> Settings {
    Settings {
        max_file_mb: 1,
        publishable_key: Some(PUBLISHABLE_KEY.to_string()),
        allowed_mime_types: [
            "image/jpeg",
            "image/png",
            "image/webp",
            "image/gif",
            "application/pdf",
        ]
        .iter()
        .map(|mime| mime.to_string())
        .collect(),
        ..Settings::default()
    }
}

pub async fn start() -> Harness {
    start_with(|_| {}).await
}

/// Starts fake auth and gateway services and the OCR function in front of them.
pub async fn start_with(configure: impl FnOnce(&mut Settings)) -> Harness {
    let (auth_url, auth_calls) = start_auth().await;

    let gateway = FakeGateway::new();
    let gateway_url = spawn(
        Router::new()
            .route("/chat/completions", post(fake_completions))
            .with_state(gateway.clone()),
    )
    .await;

    let mut settings = test_settings();
    settings.backend_url = Some(auth_url.clone());
    settings.gateway_base_url = gateway_url.clone();
    configure(&mut settings);

    let auth = BackendAuth::new(auth_url, PUBLISHABLE_KEY);
    let provider = Gateway::new("gateway-key").with_base_url(gateway_url);
    let base_url = spawn(build_router(ServerState::new(settings, auth, provider))).await;

    Harness {
        base_url,
        gateway,
        auth_calls,
        http: reqwest::Client::new(),
    }
}

/// Starts only the fake auth service. Returns its url and a counter of
/// token verifications.
pub async fn start_auth() -> (String, Arc<AtomicUsize>) {
    let auth_calls = Arc::new(AtomicUsize::new(0));
    let auth_url = spawn(
        Router::new()
            .route("/auth/v1/user", get(fake_user))
            .route("/auth/v1/token", post(fake_token))
            .with_state(auth_calls.clone()),
    )
    .await;
    (auth_url, auth_calls)
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn fake_user(
    State(calls): State<Arc<AtomicUsize>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    calls.fetch_add(1, Ordering::SeqCst);
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if bearer == Some(GOOD_TOKEN) {
        return (
            StatusCode::OK,
            Json(json!({"id": USER_ID, "email": "user@example.com"})),
        );
    }
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"msg": "invalid JWT"})),
    )
}

async fn fake_token(
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let apikey = headers.get("apikey").and_then(|value| value.to_str().ok());
    if apikey != Some(PUBLISHABLE_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid API key"})),
        );
    }
    if query.get("grant_type").map(String::as_str) != Some("password") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        );
    }
    if body["email"] != EMAIL || body["password"] != PASSWORD {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "access_token": GOOD_TOKEN,
            "token_type": "bearer",
            "expires_in": 3600,
            "user": {"id": USER_ID, "email": EMAIL}
        })),
    )
}

async fn fake_completions(
    State(gateway): State<FakeGateway>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    gateway.calls.fetch_add(1, Ordering::SeqCst);
    *gateway.last_body.lock().unwrap() = Some(body);
    let status = StatusCode::from_u16(gateway.status.load(Ordering::SeqCst)).unwrap();
    if status != StatusCode::OK {
        return (
            status,
            Json(json!({"error": {"message": "upstream refused"}})),
        );
    }
    let reply = gateway.reply.lock().unwrap().clone();
    (
        StatusCode::OK,
        Json(json!({
            "model": "fake-vision",
            "choices": [{"message": {"role": "assistant", "content": reply}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4, "total_tokens": 14}
        })),
    )
}

pub fn png_request(token: Option<&str>) -> Value {
    json!({
        "imageBase64": format!("data:image/png;base64,{}", PNG_BASE64),
        "fileName": "scan.png",
        "fileType": "image/png",
        "mode": "printed",
        "userAccessToken": token,
    })
}
