use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{
    Message, MessagePart, MessageRole, Provider, ProviderError, ProviderFuture, ProviderResponse,
    ProviderUsage,
};
use crate::data::{self, DataAttachment};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub(crate) const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat completion gateway with vision input.
#[derive(Debug, Clone)]
pub struct Gateway {
    key: String,
    model: String,
    base_url: String,
    messages: Vec<Message>,
}

impl Gateway {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            messages: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let base_url = base_url.trim().trim_end_matches('/');
        if !base_url.is_empty() {
            self.base_url = base_url.to_string();
        }
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Provider for Gateway {
    fn append_system_input(mut self, input: String) -> Self {
        self.messages.push(Message::system(input));
        self
    }

    fn append_user_input(mut self, input: String) -> Self {
        self.messages.push(Message::user(input));
        self
    }

    fn append_user_data(mut self, data: DataAttachment) -> Self {
        self.messages.push(Message::user_data(data));
        self
    }

    fn complete(self) -> ProviderFuture {
        Box::pin(async move { call_chat_completions(self).await })
    }
}

async fn call_chat_completions(provider: Gateway) -> Result<ProviderResponse, ProviderError> {
    let client = reqwest::Client::new();
    let url = format!("{}/chat/completions", provider.base_url);
    let body = build_request_body(&provider.model, &provider.messages);

    debug!(model = %provider.model, "sending chat completion request");
    let response = client
        .post(&url)
        .bearer_auth(&provider.key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        return extract_completion(&text, &provider.model);
    }
    warn!(status = status.as_u16(), "gateway returned an error status");
    Err(status_error(status, &text))
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::PAYMENT_REQUIRED => ProviderError::PaymentRequired,
        _ => ProviderError::Status {
            status: status.as_u16(),
            message: extract_gateway_error(body).unwrap_or_else(|| body.to_string()),
        },
    }
}

/// Consecutive user parts are folded into a single multi-part user message.
fn build_request_body(model: &str, messages: &[Message]) -> Value {
    let mut system = Vec::new();
    let mut user_parts = Vec::new();
    for message in messages {
        for part in &message.parts {
            match (message.role, part) {
                (MessageRole::System, MessagePart::Text(text)) => system.push(text.as_str()),
                (MessageRole::System, MessagePart::Data(_)) => {}
                (MessageRole::User, MessagePart::Text(text)) => {
                    user_parts.push(json!({"type": "text", "text": text}));
                }
                (MessageRole::User, MessagePart::Data(data)) => {
                    user_parts.push(data_part(data));
                }
            }
        }
    }

    let mut payload = Vec::new();
    if !system.is_empty() {
        payload.push(json!({"role": "system", "content": system.join("\n\n")}));
    }
    payload.push(json!({"role": "user", "content": user_parts}));
    json!({
        "model": model,
        "messages": payload,
    })
}

fn data_part(data: &DataAttachment) -> Value {
    if data.is_image() {
        return json!({
            "type": "image_url",
            "image_url": {"url": data::encode_data_url(data)}
        });
    }
    json!({
        "type": "file",
        "file": {
            "filename": data.display_name(),
            "file_data": data::encode_data_url(data),
        }
    })
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse, ProviderError> {
    let payload: ChatResponse = serde_json::from_str(text)?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.into_text())
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }

    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        text: content,
        model,
        usage,
    })
}

fn extract_gateway_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ErrorField>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorField {
        Message(String),
        Detail { message: Option<String> },
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let message = match parsed.error? {
        ErrorField::Message(message) => Some(message),
        ErrorField::Detail { message } => message,
    };
    message.filter(|message| !message.trim().is_empty())
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<ChatContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

impl ChatContent {
    fn into_text(self) -> String {
        match self {
            ChatContent::Text(text) => text,
            ChatContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatContentPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
