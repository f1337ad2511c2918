//! Similarity search: `/v1/search`.

use axum::extract::State;
use axum::{Extension, Json};
use quill_auth::require_role;
use quill_types::{AuthContext, CoreError, Role};
use serde::Deserialize;
use serde_json::json;

use crate::dto::{snippet, SearchResult};
use crate::errors::ApiResult;
use crate::state::AppState;

const DEFAULT_TOP_K: usize = 10;
const MAX_TOP_K: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// `POST /v1/search` — nearest notes by embedding similarity, scoped to the
/// caller's tenant. Requires viewer.
pub async fn search_notes(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<SearchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&ctx, Role::Viewer)?;

    if request.query.trim().is_empty() {
        return Err(CoreError::invalid("query must not be empty").into());
    }
    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(CoreError::invalid(format!("top_k must be between 1 and {MAX_TOP_K}")).into());
    }

    let hits = state
        .index
        .search(ctx.tenant_id(), &request.query, top_k)
        .await?;

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        // The index may briefly hold an entry for a note deleted since the
        // last snapshot; such hits are dropped, not surfaced.
        match state.notes.get(ctx.tenant_id(), &hit.note_id).await {
            Ok(note) => results.push(SearchResult {
                note_id: note.note_id,
                similarity: hit.similarity,
                title: note.title,
                snippet: snippet(&note.body),
                created_at: note.created_at,
                updated_at: note.updated_at,
            }),
            Err(CoreError::NotFound(_)) => continue,
            Err(other) => return Err(other.into()),
        }
    }

    Ok(Json(json!({ "results": results })))
}
