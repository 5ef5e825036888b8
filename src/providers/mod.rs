use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

use crate::data::DataAttachment;

mod gateway;

pub use gateway::Gateway;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderResponse {
    pub text: String,
    pub model: Option<String>,
    pub usage: Option<ProviderUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("gateway rate limit exceeded")]
    RateLimited,
    #[error("gateway credits exhausted")]
    PaymentRequired,
    #[error("gateway error ({status}): {message}")]
    Status { status: u16, message: String },
    #[error("gateway returned no text")]
    EmptyResponse,
    #[error("failed to parse gateway response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Data(DataAttachment),
}

impl Message {
    pub fn system(content: String) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(content)],
        }
    }

    pub fn user_data(data: DataAttachment) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Data(data)],
        }
    }
}

pub type ProviderFuture =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, ProviderError>> + Send>>;

/// Builder-style chat provider. Each call consumes and returns the provider so
/// a configured template can be cloned per request.
pub trait Provider: Clone + Send + Sync + 'static {
    fn append_system_input(self, input: String) -> Self;
    fn append_user_input(self, input: String) -> Self;
    fn append_user_data(self, data: DataAttachment) -> Self;
    fn complete(self) -> ProviderFuture;
}

pub fn resolve_gateway_key(override_key: Option<&str>) -> Option<String> {
    if let Some(key) = override_key.filter(|value| !value.trim().is_empty()) {
        return Some(key.to_string());
    }
    std::env::var("OCR_GATEWAY_API_KEY")
        .ok()
        .filter(|value| !value.trim().is_empty())
}
