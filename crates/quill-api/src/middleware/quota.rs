//! Quota admission middleware.
//!
//! Charges one request plus the inbound byte length against the caller's
//! tenant buckets. Denials return 429 with the rate-limit headers and
//! `Retry-After`; they never reach the handler.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use quill_quota::QuotaDecision;
use quill_types::{AuthContext, CoreError, Surface};

use crate::errors::ApiError;
use crate::state::AppState;

pub async fn quota_middleware_rest(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(state, request, next, Surface::Rest).await
}

pub async fn quota_middleware_rpc(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check(state, request, next, Surface::Rpc).await
}

async fn check(
    State(state): State<AppState>,
    request: Request,
    next: Next,
    surface: Surface,
) -> Result<Response, ApiError> {
    // Public paths carry no context and are not metered
    let Some(ctx) = request.extensions().get::<AuthContext>().cloned() else {
        return Ok(next.run(request).await);
    };

    let bytes = content_length(request.headers());
    let decision = state.quota.try_consume(&ctx.tenant, surface, 1, bytes).await?;

    match decision {
        QuotaDecision::Allowed => Ok(next.run(request).await),
        QuotaDecision::Denied { retry_after_secs } => {
            let denied = CoreError::QuotaExceeded { retry_after_secs };
            match state.quota.observe_remaining(&ctx.tenant, surface).await {
                Ok(snapshot) => Err(ApiError::with_quota(denied, snapshot)),
                Err(_) => Err(ApiError::from(denied)),
            }
        }
    }
}

/// Declared request body size; bodies are metered by what the client
/// declares, which the transport enforces.
pub(crate) fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
