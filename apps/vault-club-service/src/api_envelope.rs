use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCode {
    InvalidRequest,
    NothingToHarvest,
    Unauthorized,
    Forbidden,
    RateLimited,
    Conflict,
    IdempotencyInFlight,
    ServiceUnavailable,
    InternalError,
}

impl ApiErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NothingToHarvest => "nothing_to_harvest",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
            Self::Conflict => "conflict",
            Self::IdempotencyInFlight => "idempotency_in_flight",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    pub const fn default_status(self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::NothingToHarvest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict | Self::IdempotencyInFlight => StatusCode::CONFLICT,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `{ success, data?, error?, code? }`, the shape of every response body.
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

/// Serialized success envelope. The string is what idempotent replays store.
pub fn ok_body<T: Serialize>(data: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&ApiEnvelope {
        success: true,
        data: Some(data),
        error: None,
        code: None,
    })
}

pub fn error_body(code: ApiErrorCode, message: &str) -> String {
    let envelope: ApiEnvelope<()> = ApiEnvelope {
        success: false,
        data: None,
        error: Some(message.to_string()),
        code: Some(code.as_str()),
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        format!(
            r#"{{"success":false,"error":"internal error","code":"{}"}}"#,
            ApiErrorCode::InternalError.as_str()
        )
    })
}

pub fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let _ = response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

pub fn error_response(code: ApiErrorCode, message: &str) -> Response {
    json_response(code.default_status(), error_body(code, message))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn error_codes_are_unique() {
        let codes = [
            ApiErrorCode::InvalidRequest,
            ApiErrorCode::NothingToHarvest,
            ApiErrorCode::Unauthorized,
            ApiErrorCode::Forbidden,
            ApiErrorCode::RateLimited,
            ApiErrorCode::Conflict,
            ApiErrorCode::IdempotencyInFlight,
            ApiErrorCode::ServiceUnavailable,
            ApiErrorCode::InternalError,
        ];
        let mut seen = HashSet::new();
        for code in codes {
            assert!(seen.insert(code.as_str()), "duplicate code {}", code.as_str());
        }
        assert_eq!(
            ApiErrorCode::NothingToHarvest.default_status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn ok_body_wraps_data_without_error_fields() -> Result<()> {
        let body: Value = serde_json::from_str(ok_body(&json!({ "accepted": true }))?.as_str())?;
        assert_eq!(body, json!({ "success": true, "data": { "accepted": true } }));
        Ok(())
    }

    #[test]
    fn error_body_carries_message_and_code() -> Result<()> {
        let body: Value =
            serde_json::from_str(error_body(ApiErrorCode::Forbidden, "bad key").as_str())?;
        assert_eq!(
            body,
            json!({ "success": false, "error": "bad key", "code": "forbidden" })
        );
        Ok(())
    }
}
