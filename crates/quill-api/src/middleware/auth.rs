//! Authentication middleware.
//!
//! Resolves the inbound credential to an [`AuthContext`] and attaches it to
//! the request; handlers and later middleware read it from the extensions.
//! Credentials: `x-api-key` header, or `Authorization: Bearer` carrying
//! either a signed token or a prefixed API key.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use quill_auth::API_KEY_PREFIX;
use tracing::debug;

use crate::errors::ApiError;
use crate::state::AppState;

/// Paths served without authentication
const PUBLIC_PATHS: &[&str] = &["/healthz"];

/// Check if a path is public (no credentials required)
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| path == *p)
}

/// Extract `(api_key, bearer_token)` from request headers.
pub fn extract_credentials(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let mut api_key = headers
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let mut bearer = None;
    if let Some(value) = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
    {
        // A prefixed key in the Authorization header is still an API key
        if value.starts_with(API_KEY_PREFIX) {
            api_key.get_or_insert_with(|| value.to_string());
        } else {
            bearer = Some(value.to_string());
        }
    }

    (api_key, bearer)
}

/// Resolve the caller or fail closed.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if is_public_path(path) {
        return Ok(next.run(request).await);
    }

    let (api_key, bearer) = extract_credentials(request.headers());
    let ctx = state
        .gate
        .authenticate(api_key.as_deref(), bearer.as_deref())
        .await?;

    debug!(
        path = %request.uri().path(),
        org_id = %ctx.tenant_id(),
        user_id = %ctx.principal.user_id,
        "authenticated"
    );

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
