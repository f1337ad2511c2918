//! Bearer-token issuance: `/v1/auth/token`.
//!
//! Exchanges an authenticated call (typically API-key backed) for a
//! short-lived bearer token of a principal in the same tenant. Principals
//! of other tenants are indistinguishable from absent ones.

use axum::extract::State;
use axum::{Extension, Json};
use quill_types::{AuthContext, CoreError};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub email: String,
}

pub async fn issue_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<TokenRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = state
        .identity
        .find_user_by_email(&request.email)
        .await?
        .filter(|user| user.org_id == ctx.tenant_id())
        .ok_or_else(|| CoreError::not_found(format!("user {}", request.email)))?;

    let access_token = state.gate.signer().issue(&user.user_id)?;
    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": state.config.token_ttl.as_secs(),
    })))
}
