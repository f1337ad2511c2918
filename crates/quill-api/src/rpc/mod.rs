//! RPC surface: JSON over HTTP with RPC status codes.
//!
//! Unary `notes.get` and `notes.search` plus a duplex `notes.edit` that
//! mirrors the streaming hub. Credentials travel in call metadata
//! (headers); errors map onto RPC status strings rather than HTTP
//! statuses.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use quill_auth::require_role;
use quill_types::{AuthContext, CoreError, Role, Surface};
use serde::{Deserialize, Serialize};

use crate::dto::{snippet, NoteResponse, SearchResult};
use crate::state::AppState;
use crate::streaming::{run_edit_socket, StreamQuery};

/// RPC status strings, after the conventional RPC code set
fn rpc_status(err: &CoreError) -> &'static str {
    match err {
        CoreError::Unauthenticated(_) | CoreError::Expired(_) => "unauthenticated",
        CoreError::Forbidden(_) => "permission-denied",
        CoreError::NotFound(_) => "not-found",
        CoreError::VersionMismatch { .. } => "failed-precondition",
        CoreError::QuotaExceeded { .. } => "resource-exhausted",
        CoreError::Invalid(_) => "invalid-argument",
        CoreError::SlowConsumer | CoreError::Internal(_) => "internal",
    }
}

/// Uniform RPC response envelope
#[derive(Debug, Serialize)]
pub struct RpcEnvelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> RpcEnvelope<T> {
    fn ok(result: T) -> Json<Self> {
        Json(Self {
            status: "ok",
            result: Some(result),
            message: None,
        })
    }

    fn err(error: &CoreError) -> Json<Self> {
        let message = match error {
            // Opaque on the wire, detailed in the log
            CoreError::Internal(detail) => {
                tracing::error!(detail = %detail, "rpc internal error");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        Json(Self {
            status: rpc_status(error),
            result: None,
            message: Some(message),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct GetNoteRequest {
    pub note_id: String,
}

/// `POST /rpc/notes.get`
pub async fn notes_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<GetNoteRequest>,
) -> Json<RpcEnvelope<NoteResponse>> {
    if let Err(e) = require_role(&ctx, Role::Viewer) {
        return RpcEnvelope::err(&e);
    }
    match state.notes.get(ctx.tenant_id(), &request.note_id).await {
        Ok(note) => RpcEnvelope::ok(NoteResponse::from(note)),
        Err(e) => RpcEnvelope::err(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchNotesRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

/// `POST /rpc/notes.search`
pub async fn notes_search(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<SearchNotesRequest>,
) -> Json<RpcEnvelope<Vec<SearchResult>>> {
    if let Err(e) = require_role(&ctx, Role::Viewer) {
        return RpcEnvelope::err(&e);
    }

    let top_k = request.top_k.unwrap_or(10);
    if !(1..=100).contains(&top_k) {
        return RpcEnvelope::err(&CoreError::invalid("top_k must be between 1 and 100"));
    }

    let hits = match state.index.search(ctx.tenant_id(), &request.query, top_k).await {
        Ok(hits) => hits,
        Err(e) => return RpcEnvelope::err(&e),
    };

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
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
            Err(e) => return RpcEnvelope::err(&e),
        }
    }
    RpcEnvelope::ok(results)
}

#[derive(Debug, Deserialize)]
pub struct EditQuery {
    pub note_id: String,
    pub api_key: Option<String>,
    pub token: Option<String>,
}

/// `GET /rpc/notes.edit?note_id=` — duplex edit channel mirroring the
/// streaming surface.
pub async fn notes_edit(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<EditQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        run_edit_socket(
            socket,
            state,
            query.note_id.clone(),
            StreamQuery {
                api_key: query.api_key,
                token: query.token,
            },
            headers,
            Surface::Rpc,
            "/rpc/notes.edit".to_string(),
        )
    })
}
