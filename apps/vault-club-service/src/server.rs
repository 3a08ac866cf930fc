use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api_envelope::{ApiErrorCode, error_response, json_response, ok_body};
use crate::auth::{
    API_KEY_HEADER, AuthError, IdentityVerifier, VerifiedUser, bearer_token_from_headers,
    check_api_key, request_id_from_headers,
};
use crate::config::Config;
use crate::idempotency::{
    ClaimInput, ClaimOutcome, IdempotencyRecord, IdempotencyScope, IdempotencyState,
    IdempotencyStore, IdempotencyStoreError,
};
use crate::rate_limit::{RateLimited, RateLimiter};
use crate::vault::service::canonical_sha256;
use crate::vault::types::DepositRequest;
use crate::vault::{AuditEntry, VaultError, VaultService};


pub const DEPOSIT_PATH: &str = "/v1/vault/deposit";
pub const HARVEST_PATH: &str = "/v1/vault/harvest";
pub const STATS_PATH: &str = "/v1/vault/stats";
pub const CURRENT_EPOCH_PATH: &str = "/v1/vault/epochs/current";
pub const BALANCE_PATH: &str = "/v1/vault/balance";

const IDEMPOTENCY_KEY_HEADERS: [&str; 2] = ["idempotency-key", "x-idempotency-key"];
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const IN_FLIGHT_POLL_ATTEMPTS: u32 = 5;
const IN_FLIGHT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const COMPLETE_ATTEMPTS: u32 = 3;
const COMPLETE_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const API_KEY_RATE_LIMIT_KEY: &str = "api-key";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    vault: VaultService,
    idempotency: Arc<dyn IdempotencyStore>,
    identity: Arc<dyn IdentityVerifier>,
    rate_limiter: Arc<RateLimiter>,
    claim_ttl: chrono::Duration,
    started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        vault: VaultService,
        idempotency: Arc<dyn IdempotencyStore>,
        identity: Arc<dyn IdentityVerifier>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window_seconds,
        ));
        let claim_ttl = claim_ttl(&config);
        Self {
            config: Arc::new(config),
            vault,
            idempotency,
            identity,
            rate_limiter,
            claim_ttl,
            started_at: Utc::now(),
        }
    }

    pub fn vault(&self) -> &VaultService {
        &self.vault
    }
}

/// An in-flight claim older than this is treated as abandoned. It never
/// undercuts the request timeout.
fn claim_ttl(config: &Config) -> chrono::Duration {
    let ttl = Duration::from_secs(config.idempotency_claim_ttl_seconds)
        .max(Duration::from_millis(config.request_timeout_ms));
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1))
}

#[derive(Debug)]
enum ApiError {
    Auth(AuthError),
    Vault(VaultError),
    InvalidRequest(String),
    RateLimited(RateLimited),
    IdempotencyInFlight,
    IdempotencyKeyReused,
    Internal(String),
}

impl ApiError {
    fn code(&self) -> ApiErrorCode {
        match self {
            Self::Auth(AuthError::MissingApiKey | AuthError::InvalidApiKey) => {
                ApiErrorCode::Forbidden
            }
            Self::Auth(AuthError::MissingBearer | AuthError::InvalidToken) => {
                ApiErrorCode::Unauthorized
            }
            Self::Auth(AuthError::ProviderUnavailable(_)) => ApiErrorCode::ServiceUnavailable,
            Self::Vault(VaultError::InvalidRequest(_)) | Self::InvalidRequest(_) => {
                ApiErrorCode::InvalidRequest
            }
            Self::Vault(VaultError::NothingToHarvest) => ApiErrorCode::NothingToHarvest,
            Self::Vault(VaultError::Conflict(_)) | Self::IdempotencyKeyReused => {
                ApiErrorCode::Conflict
            }
            Self::Vault(VaultError::Internal(_)) | Self::Internal(_) => ApiErrorCode::InternalError,
            Self::RateLimited(_) => ApiErrorCode::RateLimited,
            Self::IdempotencyInFlight => ApiErrorCode::IdempotencyInFlight,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Auth(AuthError::ProviderUnavailable(_)) => {
                "identity provider unavailable".to_string()
            }
            Self::Auth(error) => error.to_string(),
            Self::Vault(VaultError::Internal(_)) | Self::Internal(_) => {
                "internal error".to_string()
            }
            Self::Vault(error) => error.message(),
            Self::InvalidRequest(message) => message.clone(),
            Self::RateLimited(_) => "rate limit exceeded".to_string(),
            Self::IdempotencyInFlight => {
                "a request with this idempotency key is still in flight".to_string()
            }
            Self::IdempotencyKeyReused => {
                "idempotency key was issued by another caller".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Vault(VaultError::Internal(reason)) | Self::Internal(reason) => {
                tracing::error!(reason = %reason, "vault request failed");
            }
            Self::Auth(AuthError::ProviderUnavailable(reason)) => {
                tracing::warn!(reason = %reason, "identity provider unavailable");
            }
            _ => {}
        }

        let code = self.code();
        let mut response = error_response(code, self.message().as_str());
        let headers = response.headers_mut();
        match self {
            Self::RateLimited(limited) => {
                let _ = headers.insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(limited.retry_after_seconds),
                );
            }
            Self::Auth(AuthError::MissingBearer | AuthError::InvalidToken) => {
                let _ = headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"vault-club\""),
                );
            }
            _ => {}
        }
        response
    }
}

fn idempotency_error(error: IdempotencyStoreError) -> ApiError {
    ApiError::Internal(error.to_string())
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let timeout = Duration::from_millis(state.config.request_timeout_ms);

    Router::new()
        .route("/healthz", get(health))
        .route(DEPOSIT_PATH, post(deposit))
        .route(HARVEST_PATH, post(harvest))
        .route(STATS_PATH, get(stats))
        .route(CURRENT_EPOCH_PATH, get(current_epoch))
        .route(BALANCE_PATH, get(balance))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    timeout,
                ))
                .layer(cors),
        )
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static("idempotency-key"),
            HeaderName::from_static("x-idempotency-key"),
            HeaderName::from_static("x-request-id"),
        ])
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    build_sha: String,
    uptime_seconds: i64,
}

async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    success_response(&HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        build_sha: state.config.build_sha.clone(),
        uptime_seconds,
    })
}

/// Everything needed to make an accounting call idempotent and audited.
struct AccountingCall<'a> {
    endpoint: &'static str,
    method: &'static str,
    user_id: &'a str,
    request_hash: String,
    idempotency_key: Option<String>,
}

#[derive(Serialize)]
struct DepositFingerprint<'a> {
    user_id: &'a str,
    amount: Option<String>,
    wallet_address: Option<String>,
}

#[derive(Serialize)]
struct HarvestFingerprint<'a> {
    executed_by: &'a str,
}

async fn deposit(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from_headers(&headers);
    let user = match authenticate_user(&state, &headers, &request_id).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };

    let prepared = prepare_deposit(&headers, &body, &user);
    let (call, request) = match prepared {
        Ok(prepared) => prepared,
        Err(error) => {
            let response = error.into_response();
            audit_rejected(&state, &user, DEPOSIT_PATH, response.status()).await;
            return response;
        }
    };

    let vault = state.vault.clone();
    let user_id = user.user_id.clone();
    let operation = async move { vault.deposit(user_id.as_str(), &request).await };
    let result = run_idempotent(&state, &call, operation).await;
    finish_accounting(&state, &call, result).await
}

fn prepare_deposit<'a>(
    headers: &HeaderMap,
    body: &Bytes,
    user: &'a VerifiedUser,
) -> Result<(AccountingCall<'a>, DepositRequest), ApiError> {
    let idempotency_key = idempotency_key_from_headers(headers)?;
    let request: DepositRequest = parse_json_body(body)?;
    let request_hash = canonical_sha256(&DepositFingerprint {
        user_id: user.user_id.as_str(),
        amount: request.amount_text(),
        wallet_address: request.wallet(),
    })
    .map_err(ApiError::Vault)?;
    Ok((
        AccountingCall {
            endpoint: DEPOSIT_PATH,
            method: "POST",
            user_id: user.user_id.as_str(),
            request_hash,
            idempotency_key,
        },
        request,
    ))
}

async fn harvest(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = request_id_from_headers(&headers);
    let user = match authenticate_user(&state, &headers, &request_id).await {
        Ok(user) => user,
        Err(error) => return error.into_response(),
    };

    let call = match prepare_harvest(&headers, &body, &user) {
        Ok(call) => call,
        Err(error) => {
            let response = error.into_response();
            audit_rejected(&state, &user, HARVEST_PATH, response.status()).await;
            return response;
        }
    };

    let vault = state.vault.clone();
    let executed_by = user.user_id.clone();
    let operation = async move { vault.harvest(executed_by.as_str()).await };
    let result = run_idempotent(&state, &call, operation).await;
    finish_accounting(&state, &call, result).await
}

fn prepare_harvest<'a>(
    headers: &HeaderMap,
    body: &Bytes,
    user: &'a VerifiedUser,
) -> Result<AccountingCall<'a>, ApiError> {
    let idempotency_key = idempotency_key_from_headers(headers)?;
    // The body carries no fields; an empty body and `{}` are equivalent.
    if !body.iter().all(u8::is_ascii_whitespace) {
        let _: serde_json::Map<String, serde_json::Value> = parse_json_body(body)?;
    }
    let request_hash = canonical_sha256(&HarvestFingerprint {
        executed_by: user.user_id.as_str(),
    })
    .map_err(ApiError::Vault)?;
    Ok(AccountingCall {
        endpoint: HARVEST_PATH,
        method: "POST",
        user_id: user.user_id.as_str(),
        request_hash,
        idempotency_key,
    })
}

async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    authorize_service(&state, &headers).await?;
    let stats = state.vault.stats().await.map_err(ApiError::Vault)?;
    success_response(&stats)
}

async fn current_epoch(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    authorize_service(&state, &headers).await?;
    let epoch = state.vault.current_epoch().await.map_err(ApiError::Vault)?;
    success_response(&epoch)
}

#[derive(Debug, Deserialize)]
struct BalanceQuery {
    #[serde(default)]
    wallet: Option<String>,
}

async fn balance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BalanceQuery>,
) -> Result<Response, ApiError> {
    authorize_service(&state, &headers).await?;
    let wallet = query.wallet.unwrap_or_default();
    let balance = state
        .vault
        .wallet_balance(wallet.as_str())
        .await
        .map_err(ApiError::Vault)?;
    success_response(&balance)
}

/// API key, then bearer token, then the per-user rate limit.
async fn authenticate_user(
    state: &AppState,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<VerifiedUser, ApiError> {
    check_api_key(headers, state.config.api_key.as_deref()).map_err(ApiError::Auth)?;
    let token =
        bearer_token_from_headers(headers).ok_or(ApiError::Auth(AuthError::MissingBearer))?;
    let user = state
        .identity
        .verify(token.as_str(), request_id)
        .await
        .map_err(ApiError::Auth)?;
    enforce_rate_limit(state, format!("user:{}", user.user_id).as_str()).await?;
    Ok(user)
}

async fn authorize_service(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    check_api_key(headers, state.config.api_key.as_deref()).map_err(ApiError::Auth)?;
    enforce_rate_limit(state, API_KEY_RATE_LIMIT_KEY).await
}

async fn enforce_rate_limit(state: &AppState, key: &str) -> Result<(), ApiError> {
    state
        .rate_limiter
        .check(key, state.vault.now())
        .await
        .map_err(|limited| {
            tracing::warn!(
                caller = key,
                retry_after_seconds = limited.retry_after_seconds,
                "vault rate limit exceeded"
            );
            ApiError::RateLimited(limited)
        })
}

/// Runs `operation` at most once per idempotency key and replays the stored
/// response to every later request with the same key.
///
/// A claimed operation runs on its own task, so a dropped request (client
/// disconnect or timeout) still completes or releases its claim.
async fn run_idempotent<T, Fut>(
    state: &AppState,
    call: &AccountingCall<'_>,
    operation: Fut,
) -> Result<Response, ApiError>
where
    T: Serialize + Send + 'static,
    Fut: Future<Output = Result<T, VaultError>> + Send + 'static,
{
    let Some(key) = call.idempotency_key.as_deref() else {
        let data = operation.await.map_err(ApiError::Vault)?;
        return success_response(&data);
    };

    let scope = IdempotencyScope {
        key: key.to_string(),
        endpoint: call.endpoint.to_string(),
        method: call.method.to_string(),
    };
    let now = state.vault.now();
    let claim = state
        .idempotency
        .claim(ClaimInput {
            scope: scope.clone(),
            user_id: Some(call.user_id.to_string()),
            request_hash: call.request_hash.clone(),
            now,
            stale_before: now
                .checked_sub_signed(state.claim_ttl)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
        .await
        .map_err(idempotency_error)?;
    if let ClaimOutcome::Existing(record) = claim {
        return replay_or_wait(state, call, &scope, record).await;
    }

    let task = tokio::spawn(execute_claimed(state.clone(), scope, operation));
    let body = task
        .await
        .map_err(|error| ApiError::Internal(format!("idempotent task failed: {error}")))??;
    Ok(json_response(StatusCode::OK, body))
}

async fn execute_claimed<T, Fut>(
    state: AppState,
    scope: IdempotencyScope,
    operation: Fut,
) -> Result<String, ApiError>
where
    T: Serialize,
    Fut: Future<Output = Result<T, VaultError>>,
{
    let body = match operation.await {
        Ok(data) => ok_body(&data).map_err(|error| ApiError::Internal(error.to_string())),
        Err(error) => Err(ApiError::Vault(error)),
    };
    match body {
        Ok(body) => {
            complete_claim(&state, &scope, body.as_str()).await;
            Ok(body)
        }
        Err(error) => {
            release_claim(&state, &scope).await;
            Err(error)
        }
    }
}

/// Stores the response for replay. The write has already happened, so a
/// claim that cannot be completed stays in flight until it goes stale; it is
/// never released.
async fn complete_claim(state: &AppState, scope: &IdempotencyScope, body: &str) {
    for attempt in 1..=COMPLETE_ATTEMPTS {
        let completed = state
            .idempotency
            .complete(scope, StatusCode::OK.as_u16(), body, state.vault.now())
            .await;
        let Err(error) = completed else {
            return;
        };
        if attempt == COMPLETE_ATTEMPTS {
            tracing::error!(
                idempotency_key = %scope.key,
                endpoint = %scope.endpoint,
                attempts = attempt,
                reason = %error,
                "idempotency completion failed; claim left in flight"
            );
            return;
        }
        tracing::warn!(
            idempotency_key = %scope.key,
            endpoint = %scope.endpoint,
            attempt,
            reason = %error,
            "idempotency completion failed; retrying"
        );
        tokio::time::sleep(COMPLETE_RETRY_INTERVAL).await;
    }
}

async fn replay_or_wait(
    state: &AppState,
    call: &AccountingCall<'_>,
    scope: &IdempotencyScope,
    mut record: IdempotencyRecord,
) -> Result<Response, ApiError> {
    if record.user_id.as_deref() != Some(call.user_id) {
        return Err(ApiError::IdempotencyKeyReused);
    }
    for attempt in 0..=IN_FLIGHT_POLL_ATTEMPTS {
        if record.state == IdempotencyState::Completed {
            return Ok(replay_response(call, record));
        }
        if attempt == IN_FLIGHT_POLL_ATTEMPTS {
            break;
        }
        tokio::time::sleep(IN_FLIGHT_POLL_INTERVAL).await;
        match state.idempotency.get(scope).await.map_err(idempotency_error)? {
            Some(next) => record = next,
            None => break,
        }
    }
    Err(ApiError::IdempotencyInFlight)
}

fn replay_response(call: &AccountingCall<'_>, record: IdempotencyRecord) -> Response {
    if record.request_hash != call.request_hash {
        tracing::warn!(
            idempotency_key = %record.scope.key,
            endpoint = %record.scope.endpoint,
            "idempotency key reused with a different request; replaying stored response"
        );
    }
    let status = record
        .status_code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    json_response(status, record.response_body.unwrap_or_default())
}

async fn release_claim(state: &AppState, scope: &IdempotencyScope) {
    if let Err(error) = state.idempotency.release(scope).await {
        tracing::warn!(
            idempotency_key = %scope.key,
            endpoint = %scope.endpoint,
            reason = %error,
            "idempotency release failed"
        );
    }
}

async fn finish_accounting(
    state: &AppState,
    call: &AccountingCall<'_>,
    result: Result<Response, ApiError>,
) -> Response {
    let response = result.unwrap_or_else(ApiError::into_response);
    let status_code = response.status().as_u16();
    state
        .vault
        .record_audit(AuditEntry {
            user_id: Some(call.user_id),
            endpoint: call.endpoint,
            method: call.method,
            status_code,
            idempotency_key: call.idempotency_key.as_deref(),
            request_hash: Some(call.request_hash.as_str()),
        })
        .await;
    response
}

async fn audit_rejected(
    state: &AppState,
    user: &VerifiedUser,
    endpoint: &'static str,
    status: StatusCode,
) {
    state
        .vault
        .record_audit(AuditEntry {
            user_id: Some(user.user_id.as_str()),
            endpoint,
            method: "POST",
            status_code: status.as_u16(),
            idempotency_key: None,
            request_hash: None,
        })
        .await;
}

fn success_response<T: Serialize>(data: &T) -> Result<Response, ApiError> {
    let body = ok_body(data).map_err(|error| ApiError::Internal(error.to_string()))?;
    Ok(json_response(StatusCode::OK, body))
}

fn idempotency_key_from_headers(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let raw = IDEMPOTENCY_KEY_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .map(|value| {
            value.to_str().map_err(|_| {
                ApiError::InvalidRequest("idempotency key must be visible ASCII".to_string())
            })
        })
        .transpose()?;
    let Some(key) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ApiError::InvalidRequest(format!(
            "idempotency key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(Some(key.to_string()))
}

fn parse_json_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|error| ApiError::InvalidRequest(format!("invalid json body: {error}")))
}
