//! Router assembly for the three surfaces.

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, api_keys, health, notes, search, tokens};
use crate::middleware::{
    auth_middleware, quota_middleware_rest, quota_middleware_rpc, usage_middleware_rest,
    usage_middleware_rpc,
};
use crate::rpc;
use crate::state::AppState;
use crate::streaming;

/// Request/response surface: `/v1` plus the public health probe.
pub fn rest_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/notes", post(notes::create_note).get(notes::list_notes))
        .route(
            "/v1/notes/:id",
            get(notes::get_note)
                .patch(notes::patch_note)
                .delete(notes::delete_note),
        )
        .route("/v1/search", post(search::search_notes))
        .route(
            "/v1/api-keys",
            post(api_keys::create_key).get(api_keys::list_keys),
        )
        .route("/v1/api-keys/:id", delete(api_keys::delete_key))
        .route("/v1/auth/token", post(tokens::issue_token))
        .route("/v1/admin/search/rebuild", post(admin::rebuild_index))
        // auth outermost, then quota, then usage around the handler
        .layer(from_fn_with_state(state.clone(), usage_middleware_rest))
        .layer(from_fn_with_state(state.clone(), quota_middleware_rest))
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .route("/healthz", get(health::healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Streaming surface: per-note duplex edit channels. Authentication runs
/// inside the socket handler so query-string credentials work for clients
/// that cannot set upgrade headers.
pub fn stream_router(state: AppState) -> Router {
    Router::new()
        .route("/stream/notes/:id", get(streaming::note_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// RPC surface: unary calls behind the middleware chain, the duplex edit
/// endpoint authenticating inside the handler like the streaming surface.
pub fn rpc_router(state: AppState) -> Router {
    let unary = Router::new()
        .route("/rpc/notes.get", post(rpc::notes_get))
        .route("/rpc/notes.search", post(rpc::notes_search))
        .layer(from_fn_with_state(state.clone(), usage_middleware_rpc))
        .layer(from_fn_with_state(state.clone(), quota_middleware_rpc))
        .layer(from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/rpc/notes.edit", get(rpc::notes_edit))
        .merge(unary)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
