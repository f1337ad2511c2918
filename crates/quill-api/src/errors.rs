//! HTTP mapping of core errors.
//!
//! Every surface returns the uniform body `{"error":{"code","message"}}`.
//! Throttled responses additionally carry the rate-limit headers and
//! `Retry-After`.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use quill_quota::QuotaHeaders;
use quill_types::CoreError;
use serde_json::json;
use uuid::Uuid;

/// Result alias for handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// A core error on its way out of the HTTP surface.
#[derive(Debug)]
pub struct ApiError {
    error: CoreError,
    quota: Option<QuotaHeaders>,
}

impl ApiError {
    /// Attach a quota snapshot so the 429 response can be annotated.
    pub fn with_quota(error: CoreError, quota: QuotaHeaders) -> Self {
        Self {
            error,
            quota: Some(quota),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.error {
            CoreError::Unauthenticated(_) | CoreError::Expired(_) => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::VersionMismatch { .. } => StatusCode::PRECONDITION_FAILED,
            CoreError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Invalid(_) => StatusCode::BAD_REQUEST,
            CoreError::SlowConsumer | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self { error, quota: None }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error.code();

        // Internal details never reach the wire; the correlation id links
        // the response to the log line.
        let message = match &self.error {
            CoreError::Internal(detail) => {
                let correlation_id = Uuid::new_v4().to_string();
                tracing::error!(
                    correlation_id = %correlation_id,
                    detail = %detail,
                    "internal error"
                );
                format!("internal error (id: {correlation_id})")
            }
            other => {
                tracing::warn!(code = %code, error = %other, "request failed");
                other.to_string()
            }
        };

        let mut body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        if let CoreError::VersionMismatch { current } = &self.error {
            body["error"]["current_version"] = json!(current);
        }

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        if let Some(quota) = self.quota {
            extend_with_quota_headers(&mut headers, &quota);
        }
        if let CoreError::QuotaExceeded { retry_after_secs } = &self.error {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                headers.insert(header::RETRY_AFTER, value);
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Append the `X-RateLimit-*` annotation headers.
pub fn extend_with_quota_headers(headers: &mut HeaderMap, quota: &QuotaHeaders) {
    let pairs = [
        ("x-ratelimit-limit", quota.limit),
        ("x-ratelimit-remaining", quota.remaining),
        ("x-ratelimit-byteslimit", quota.bytes_limit),
        ("x-ratelimit-bytesremaining", quota.bytes_remaining),
        ("x-ratelimit-reset", quota.reset_epoch_secs),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}
