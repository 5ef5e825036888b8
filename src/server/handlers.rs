use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{ErrorResponse, OcrRequest};
use super::ocr::{ServerError, ocr_request};
use super::state::ServerState;
use crate::auth::Authenticator;
use crate::normalize::OcrResult;
use crate::providers::Provider;

const BODY_LIMIT_SLACK: usize = 1024 * 1024;

type ErrorReply = (StatusCode, Json<ErrorResponse>);

pub fn build_router<A: Authenticator, P: Provider>(state: ServerState<A, P>) -> Router {
    let body_limit = state
        .settings
        .max_file_bytes()
        .saturating_mul(2)
        .saturating_add(BODY_LIMIT_SLACK);
    let state = Arc::new(state);
    let ocr_routes = Router::new()
        .route("/ocr", post(ocr::<A, P>))
        .route("/functions/v1/ocr-process", post(ocr::<A, P>))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key::<A, P>,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);
    Router::new()
        .route("/health", get(health))
        .merge(ocr_routes)
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server<A: Authenticator, P: Provider>(
    state: ServerState<A, P>,
    addr: String,
) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!(%addr, "OCR function listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("authorization, x-client-info, apikey, content-type"),
    );
}

/// Gateway admission: when enabled, OCR calls must present the publishable
/// key either as `apikey` or as a bearer token.
async fn require_api_key<A: Authenticator, P: Provider>(
    State(state): State<Arc<ServerState<A, P>>>,
    req: Request<Body>,
    next: Next,
) -> Response<Body> {
    if !state.settings.require_api_key {
        return next.run(req).await;
    }
    let expected = state.settings.publishable_key.as_deref().unwrap_or_default();
    if expected.is_empty() || !presents_key(req.headers(), expected) {
        warn!("rejected OCR call without a valid api key");
        return error_reply(ServerError::unauthorized("Invalid API key")).into_response();
    }
    next.run(req).await
}

fn presents_key(headers: &HeaderMap, expected: &str) -> bool {
    let apikey = headers
        .get("apikey")
        .and_then(|value| value.to_str().ok())
        .map(str::trim);
    let bearer = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("Bearer "))
        .map(str::trim);
    apikey == Some(expected) || bearer == Some(expected)
}

async fn ocr<A: Authenticator, P: Provider>(
    State(state): State<Arc<ServerState<A, P>>>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<OcrResult>, ErrorReply> {
    let Json(request) = payload.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            error_reply(ServerError::file_too_large(state.settings.max_file_mb))
        } else {
            warn!(error = %rejection.body_text(), "rejected malformed OCR request body");
            error_reply(ServerError::bad_request("Invalid request body"))
        }
    })?;

    match ocr_request(state.as_ref(), request).await {
        Ok(result) => Ok(Json(result)),
        Err(err) => Err(error_reply(err)),
    }
}

fn error_reply(err: ServerError) -> ErrorReply {
    (err.status, Json(ErrorResponse { error: err.message }))
}
