//! Usage recording middleware.
//!
//! Observes completions on every authenticated path and emits
//! `(tenant, principal, surface, endpoint, bytes)` for billing. Emission is
//! fire-and-forget; it cannot fail the response.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use quill_types::{AuthContext, Surface};

use super::quota::content_length;
use crate::state::AppState;

pub async fn usage_middleware_rest(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    track(state, request, next, Surface::Rest).await
}

pub async fn usage_middleware_rpc(
    state: State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    track(state, request, next, Surface::Rpc).await
}

async fn track(
    State(state): State<AppState>,
    request: Request,
    next: Next,
    surface: Surface,
) -> Response {
    let ctx = request.extensions().get::<AuthContext>().cloned();
    let endpoint = request.uri().path().to_string();
    let request_bytes = content_length(request.headers());

    let response = next.run(request).await;

    if let Some(ctx) = ctx {
        let response_bytes = content_length(response.headers());
        state.usage.emit(
            ctx.tenant_id(),
            Some(&ctx.principal.user_id),
            surface,
            &endpoint,
            request_bytes + response_bytes,
        );
    }

    response
}
