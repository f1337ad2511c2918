//! Note CRUD: `/v1/notes`.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use quill_auth::require_role;
use quill_types::{AuthContext, CoreError, NotePatch, Role};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::dto::NoteResponse;
use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

/// `POST /v1/notes` — create a note at version 1. Requires editor.
pub async fn create_note(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateNoteRequest>,
) -> ApiResult<Response> {
    require_role(&ctx, Role::Editor)?;

    let note = state
        .notes
        .create(ctx.tenant_id(), &request.title, &request.body)
        .await?;

    if let Err(e) = state.index.index_note(&note).await {
        warn!(note_id = %note.note_id, error = %e, "indexing new note failed");
    }

    Ok((StatusCode::CREATED, Json(NoteResponse::from(note))).into_response())
}

/// `GET /v1/notes/{id}` — fetch with `ETag: W/"{version}"`; honours
/// `If-None-Match`. Requires viewer.
pub async fn get_note(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_role(&ctx, Role::Viewer)?;

    let note = state.notes.get(ctx.tenant_id(), &note_id).await?;
    let etag = note.etag();

    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    if if_none_match == Some(etag.as_str()) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    Ok((
        StatusCode::OK,
        [(header::ETAG, etag)],
        Json(NoteResponse::from(note)),
    )
        .into_response())
}

/// `GET /v1/notes?skip=&limit=` — newest first. Requires viewer.
pub async fn list_notes(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<NoteResponse>>> {
    require_role(&ctx, Role::Viewer)?;

    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if skip < 0 {
        return Err(CoreError::invalid("skip must be non-negative").into());
    }
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(
            CoreError::invalid(format!("limit must be between 1 and {MAX_LIST_LIMIT}")).into(),
        );
    }

    let notes = state.notes.list(ctx.tenant_id(), skip, limit).await?;
    Ok(Json(notes.into_iter().map(NoteResponse::from).collect()))
}

/// `PATCH /v1/notes/{id}` — partial update, version + 1. With an
/// `If-Match: W/"<version>"` header the update is version-guarded and a
/// stale version yields the version-mismatch error. Requires editor.
pub async fn patch_note(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(patch): Json<NotePatch>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&ctx, Role::Editor)?;

    let updated = match parse_if_match(&headers)? {
        Some(expected_version) => {
            state
                .notes
                .commit_versioned(ctx.tenant_id(), &note_id, expected_version, &patch)
                .await?
        }
        None => state.notes.patch(ctx.tenant_id(), &note_id, &patch).await?,
    };

    if let Err(e) = state.index.index_note(&updated).await {
        warn!(note_id = %updated.note_id, error = %e, "re-indexing patched note failed");
    }

    Ok(Json(json!({ "version": updated.version })))
}

/// `DELETE /v1/notes/{id}` — soft delete; the row persists, visibility
/// ends. Requires editor.
pub async fn delete_note(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(note_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    require_role(&ctx, Role::Editor)?;

    state.notes.soft_delete(ctx.tenant_id(), &note_id).await?;
    if let Err(e) = state.index.remove_note(ctx.tenant_id(), &note_id).await {
        warn!(note_id = %note_id, error = %e, "removing deleted note from index failed");
    }

    Ok(Json(json!({ "deleted": true })))
}

/// Parse an `If-Match: W/"<version>"` header into the expected version.
fn parse_if_match(headers: &HeaderMap) -> Result<Option<i64>, ApiError> {
    let Some(value) = headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) else {
        return Ok(None);
    };

    let version = value
        .trim()
        .strip_prefix("W/")
        .unwrap_or(value.trim())
        .trim_matches('"')
        .parse::<i64>()
        .map_err(|_| CoreError::invalid(format!("malformed If-Match header: {value}")))?;
    Ok(Some(version))
}
