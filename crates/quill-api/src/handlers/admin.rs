//! Admin operations: `/v1/admin`.

use axum::extract::State;
use axum::{Extension, Json};
use quill_auth::require_role;
use quill_types::{AuthContext, Role};
use serde_json::json;
use tracing::info;

use crate::errors::ApiResult;
use crate::state::AppState;

/// `POST /v1/admin/search/rebuild` — re-enumerate the tenant's notes and
/// replace its index. Requires owner.
pub async fn rebuild_index(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&ctx, Role::Owner)?;

    let indexed = state
        .index
        .rebuild(ctx.tenant_id(), state.notes.as_ref())
        .await?;

    info!(org_id = %ctx.tenant_id(), indexed, "search index rebuilt on request");
    Ok(Json(json!({ "indexed": indexed })))
}
