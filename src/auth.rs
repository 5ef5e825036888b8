use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated user session as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired session")]
    InvalidToken,
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

pub type AuthFuture = Pin<Box<dyn Future<Output = Result<AuthUser, AuthError>> + Send>>;

pub trait Authenticator: Clone + Send + Sync + 'static {
    fn verify(&self, token: &str) -> AuthFuture;
}

/// Client for the backend platform's auth endpoints.
#[derive(Debug, Clone)]
pub struct BackendAuth {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl BackendAuth {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            settings.backend_url()?,
            settings.publishable_key()?,
        ))
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(&json!({"email": email, "password": password}))
            .send()
            .await
            .with_context(|| "failed to reach auth service")?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("sign in failed ({}): {}", status, text));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            user: AuthUser,
        }

        let token: TokenResponse =
            serde_json::from_str(&text).with_context(|| "failed to parse sign in response")?;
        Ok(Session {
            access_token: token.access_token,
            user_id: token.user.id,
        })
    }

    pub async fn session_from_token(&self, token: &str) -> Result<Session> {
        let user = self.verify(token).await?;
        Ok(Session {
            access_token: token.to_string(),
            user_id: user.id,
        })
    }
}

impl Authenticator for BackendAuth {
    fn verify(&self, token: &str) -> AuthFuture {
        let url = format!("{}/auth/v1/user", self.base_url);
        let request = self
            .http
            .get(url)
            .header("apikey", &self.api_key)
            .bearer_auth(token);
        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|err| AuthError::Unavailable(err.to_string()))?;
            let status = response.status();
            match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    debug!(status = status.as_u16(), "auth service rejected token");
                    Err(AuthError::InvalidToken)
                }
                _ if status.is_success() => response
                    .json::<AuthUser>()
                    .await
                    .map_err(|err| AuthError::Unavailable(err.to_string())),
                _ => {
                    warn!(status = status.as_u16(), "unexpected auth service status");
                    Err(AuthError::Unavailable(format!("status {}", status)))
                }
            }
        })
    }
}

/// Resolves the current session from `OCR_ACCESS_TOKEN`, falling back to a
/// password sign-in with `OCR_EMAIL` and `OCR_PASSWORD`.
pub async fn resolve_session(auth: &BackendAuth) -> Result<Session> {
    if let Some(token) = get_env("OCR_ACCESS_TOKEN") {
        return auth.session_from_token(&token).await;
    }
    match (get_env("OCR_EMAIL"), get_env("OCR_PASSWORD")) {
        (Some(email), Some(password)) => auth.sign_in_with_password(&email, &password).await,
        _ => Err(anyhow!(
            "not signed in (set OCR_ACCESS_TOKEN, or OCR_EMAIL and OCR_PASSWORD)"
        )),
    }
}

fn get_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
