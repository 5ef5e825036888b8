use axum::http::StatusCode;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::{AuthError, AuthUser, Authenticator};
use crate::data::{self, DataAttachment};
use crate::normalize::OcrResult;
use crate::prompts::{self, OcrMode};
use crate::providers::{Provider, ProviderError};

use super::models::OcrRequest;
use super::state::ServerState;

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const CREDITS_EXHAUSTED_MESSAGE: &str =
    "AI credits exhausted. Please add credits to continue.";
pub const EMPTY_RESULT_MESSAGE: &str = "No text could be extracted from the document";
pub const PROCESSING_FAILED_MESSAGE: &str = "OCR processing failed";

#[derive(Debug)]
pub struct ServerError {
    pub status: StatusCode,
    pub message: String,
}

impl ServerError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub(crate) fn file_too_large(max_file_mb: usize) -> Self {
        Self::bad_request(format!(
            "File too large. Maximum size is {}MB.",
            max_file_mb
        ))
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ServerError::unauthorized("Invalid or expired session"),
            AuthError::Unavailable(detail) => {
                warn!(%detail, "auth service unavailable");
                ServerError::internal("Authentication service unavailable")
            }
        }
    }
}

impl From<ProviderError> for ServerError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited => {
                ServerError::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE)
            }
            ProviderError::PaymentRequired => {
                ServerError::new(StatusCode::PAYMENT_REQUIRED, CREDITS_EXHAUSTED_MESSAGE)
            }
            ProviderError::EmptyResponse => ServerError::internal(EMPTY_RESULT_MESSAGE),
            other => {
                warn!(error = %other, "gateway call failed");
                ServerError::internal(PROCESSING_FAILED_MESSAGE)
            }
        }
    }
}

pub(crate) async fn ocr_request<A: Authenticator, P: Provider>(
    state: &ServerState<A, P>,
    request: OcrRequest,
) -> Result<OcrResult, ServerError> {
    let started = Instant::now();

    let token = non_blank(request.user_access_token.as_deref())
        .ok_or_else(|| ServerError::unauthorized("Authentication required"))?;
    let user = state.auth.verify(token).await?;

    let attachment = decode_attachment(state, &request)?;
    let mode = resolve_mode(&request, attachment.display_name())?;
    info!(
        user = %user.id,
        mode = %mode,
        mime = %attachment.mime,
        bytes = attachment.bytes.len(),
        "processing OCR request"
    );

    let result = extract(state, &user, attachment, mode, started).await?;
    info!(
        user = %user.id,
        words = result.word_count,
        elapsed_ms = result.processing_time_ms,
        "OCR request completed"
    );
    Ok(result)
}

fn decode_attachment<A, P>(
    state: &ServerState<A, P>,
    request: &OcrRequest,
) -> Result<DataAttachment, ServerError> {
    let settings = &state.settings;
    let image = non_blank(request.image_base64.as_deref())
        .ok_or_else(|| ServerError::bad_request("No image data provided"))?;
    let (url_mime, payload) =
        data::split_data_url(image).map_err(|_| ServerError::bad_request("Invalid image data"))?;
    if payload.trim().is_empty() {
        return Err(ServerError::bad_request("No image data provided"));
    }
    if data::estimated_decoded_len(payload) > settings.max_file_bytes() {
        return Err(ServerError::file_too_large(settings.max_file_mb));
    }

    let declared = non_blank(request.file_type.as_deref())
        .map(|value| value.to_lowercase())
        .or(url_mime);
    if let Some(mime) = declared.as_deref() {
        ensure_allowed(settings, mime)?;
    }

    let bytes =
        data::decode_base64(payload).map_err(|_| ServerError::bad_request("Invalid image data"))?;
    let mime = match declared {
        Some(mime) => mime,
        None => {
            let sniffed = data::sniff_mime(&bytes)
                .ok_or_else(|| ServerError::bad_request("Unsupported file type: unknown"))?;
            ensure_allowed(settings, &sniffed)?;
            sniffed
        }
    };
    let name = non_blank(request.file_name.as_deref()).map(|value| value.to_string());
    Ok(DataAttachment::new(bytes, mime, name))
}

fn ensure_allowed(settings: &crate::settings::Settings, mime: &str) -> Result<(), ServerError> {
    if settings.is_allowed_mime(mime) {
        return Ok(());
    }
    Err(ServerError::bad_request(format!(
        "Unsupported file type: {}",
        mime
    )))
}

fn resolve_mode(request: &OcrRequest, file_name: &str) -> Result<OcrMode, ServerError> {
    match non_blank(request.mode.as_deref()) {
        Some(value) => value
            .parse::<OcrMode>()
            .map_err(|_| ServerError::bad_request(format!("Invalid mode: {}", value))),
        None => Ok(OcrMode::infer_from_file_name(file_name)),
    }
}

async fn extract<A, P: Provider>(
    state: &ServerState<A, P>,
    user: &AuthUser,
    attachment: DataAttachment,
    mode: OcrMode,
    started: Instant,
) -> Result<OcrResult, ServerError> {
    let prompt = prompts::render_prompt(mode, attachment.display_name()).map_err(|err| {
        warn!(user = %user.id, error = %err, "failed to render prompt");
        ServerError::internal(PROCESSING_FAILED_MESSAGE)
    })?;
    let response = state
        .provider
        .clone()
        .append_system_input(prompt.system)
        .append_user_data(attachment)
        .append_user_input(prompt.user)
        .complete()
        .await?;
    if response.text.trim().is_empty() {
        return Err(ServerError::internal(EMPTY_RESULT_MESSAGE));
    }
    Ok(OcrResult::from_extraction(&response.text, mode, started))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
