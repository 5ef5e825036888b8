use reqwest::StatusCode;
use tracing::debug;

use crate::auth::Session;
use crate::data::{DataAttachment, encode_data_url};
use crate::normalize::OcrResult;
use crate::prompts::OcrMode;
use crate::server::{ErrorResponse, OcrRequest};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("OCR request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to reach OCR function: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to parse OCR response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Sends files to the hosted OCR function.
#[derive(Debug, Clone)]
pub struct OcrClient {
    function_url: String,
    publishable_key: String,
    http: reqwest::Client,
}

impl OcrClient {
    pub fn new(function_url: impl Into<String>, publishable_key: impl Into<String>) -> Self {
        Self {
            function_url: function_url.into().trim().to_string(),
            publishable_key: publishable_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn function_url(&self) -> &str {
        &self.function_url
    }

    pub async fn extract(
        &self,
        data: &DataAttachment,
        mode: Option<OcrMode>,
        session: &Session,
    ) -> Result<OcrResult, ClientError> {
        let mode = mode.unwrap_or_else(|| OcrMode::infer_from_file_name(data.display_name()));
        let body = build_request(data, mode, session);
        debug!(file = data.display_name(), %mode, "dispatching OCR request");

        let response = self
            .http
            .post(&self.function_url)
            .header("apikey", &self.publishable_key)
            .bearer_auth(&self.publishable_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                message: rejection_message(&text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn build_request(data: &DataAttachment, mode: OcrMode, session: &Session) -> OcrRequest {
    OcrRequest {
        image_base64: Some(encode_data_url(data)),
        file_name: Some(data.display_name().to_string()),
        file_type: Some(data.mime.clone()),
        mode: Some(mode.as_str().to_string()),
        user_access_token: Some(session.access_token.clone()),
    }
}

fn rejection_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|reply| reply.error)
        .unwrap_or_else(|_| body.trim().to_string())
}
