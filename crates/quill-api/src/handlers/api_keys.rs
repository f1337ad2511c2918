//! Credential management: `/v1/api-keys`.
//!
//! The created secret is returned exactly once; only its digest is stored
//! and listings never include it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use quill_auth::{digest_key, generate_api_key, require_role};
use quill_types::{ApiKeyRecord, AuthContext, Role};
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /v1/api-keys` — mint a key for the caller's tenant. Requires
/// owner.
pub async fn create_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateKeyRequest>,
) -> ApiResult<Response> {
    require_role(&ctx, Role::Owner)?;

    let secret = generate_api_key();
    let record = state
        .api_keys
        .create_key(
            ctx.tenant_id(),
            &request.name,
            &digest_key(&secret),
            request.expires_at,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "key_id": record.key_id,
            "name": record.name,
            "created_at": record.created_at,
            "expires_at": record.expires_at,
            // Shown exactly once; only the digest survives
            "api_key": secret,
        })),
    )
        .into_response())
}

/// `GET /v1/api-keys` — list the tenant's keys, secrets excluded.
/// Requires viewer.
pub async fn list_keys(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<Vec<ApiKeyRecord>>> {
    require_role(&ctx, Role::Viewer)?;
    let keys = state.api_keys.list_keys(ctx.tenant_id()).await?;
    Ok(Json(keys))
}

/// `DELETE /v1/api-keys/{id}`. Requires owner.
pub async fn delete_key(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(key_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&ctx, Role::Owner)?;
    state.api_keys.delete_key(ctx.tenant_id(), &key_id).await?;
    Ok(Json(json!({ "deleted": true })))
}
