use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode, header};
use serde_json::Value;
use thiserror::Error;

pub const API_KEY_HEADER: &str = "x-vault-club-api-key";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing x-vault-club-api-key header")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
    #[error("missing bearer token")]
    MissingBearer,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: String,
}

/// Resolves a bearer token to the user it was issued for.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str, request_id: &str) -> Result<VerifiedUser, AuthError>;
}

/// Asks the hosted auth provider who owns a token via `GET {base}/auth/v1/user`.
pub struct HttpIdentityVerifier {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpIdentityVerifier {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AuthError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str, request_id: &str) -> Result<VerifiedUser, AuthError> {
        let mut request = self
            .http
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("x-request-id", request_id);
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.header("apikey", api_key);
        }

        let response = request.send().await.map_err(|error| {
            tracing::warn!(request_id, reason = %error, "identity provider request failed");
            AuthError::ProviderUnavailable(error.to_string())
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            tracing::warn!(request_id, %status, "identity provider rejected lookup");
            return Err(AuthError::ProviderUnavailable(format!(
                "identity provider returned {status}"
            )));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|error| AuthError::ProviderUnavailable(format!("invalid payload: {error}")))?;
        let user_id = payload
            .pointer("/id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::InvalidToken)?;

        Ok(VerifiedUser {
            user_id: user_id.to_string(),
        })
    }
}

/// Fixed token table, for tests and local runs without a provider.
#[derive(Debug, Default, Clone)]
pub struct StaticIdentityVerifier {
    tokens: HashMap<String, String>,
}

impl StaticIdentityVerifier {
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let _ = self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str, _request_id: &str) -> Result<VerifiedUser, AuthError> {
        self.tokens
            .get(token)
            .map(|user_id| VerifiedUser {
                user_id: user_id.clone(),
            })
            .ok_or(AuthError::InvalidToken)
    }
}

/// Used when no provider is configured: no token is ever accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectingIdentityVerifier;

#[async_trait]
impl IdentityVerifier for RejectingIdentityVerifier {
    async fn verify(&self, _token: &str, request_id: &str) -> Result<VerifiedUser, AuthError> {
        tracing::debug!(request_id, "bearer rejected: no identity provider configured");
        Err(AuthError::InvalidToken)
    }
}

pub fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

pub fn bearer_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let trimmed = raw.trim();
    let (scheme, token) = trimmed.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

pub fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

/// An unset service key rejects every caller.
pub fn check_api_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AuthError> {
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingApiKey)?;
    match expected {
        Some(expected) if constant_time_eq(provided, expected) => Ok(()),
        _ => Err(AuthError::InvalidApiKey),
    }
}
