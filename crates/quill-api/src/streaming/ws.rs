//! WebSocket transport for the edit hub: `/stream/notes/{id}`.
//!
//! The socket splits into a writer task draining the session's bounded
//! outbound queue and a reader loop feeding patches into the hub. Either
//! side ending runs the cleanup path exactly once; the hub's cancellation
//! token closes the peer with the session's close code.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use quill_hub::{ClientFrame, CLOSE_INTERNAL, CLOSE_NOT_FOUND, CLOSE_POLICY, CLOSE_QUOTA};
use quill_quota::QuotaDecision;
use quill_types::{CoreError, Surface};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::middleware::extract_credentials;
use crate::state::AppState;

/// Credentials accepted in the query string for clients that cannot set
/// headers on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub api_key: Option<String>,
    pub token: Option<String>,
}

/// `GET /stream/notes/{id}` — upgrade and attach to the note's edit
/// channel.
pub async fn note_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(note_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let endpoint = format!("/stream/notes/{note_id}");
        run_edit_socket(
            socket,
            state,
            note_id,
            query,
            headers,
            Surface::Stream,
            endpoint,
        )
    })
}

/// Drive one edit socket to completion. Shared by the streaming and RPC
/// surfaces, which differ only in surface tag and endpoint label.
pub(crate) async fn run_edit_socket(
    socket: WebSocket,
    state: AppState,
    note_id: String,
    query: StreamQuery,
    headers: HeaderMap,
    surface: Surface,
    endpoint: String,
) {
    // Gate first, quota second, then admission — the same order as every
    // other surface.
    let (mut api_key, mut bearer) = extract_credentials(&headers);
    if api_key.is_none() {
        api_key = query.api_key;
    }
    if bearer.is_none() {
        bearer = query.token;
    }

    let ctx = match state
        .gate
        .authenticate(api_key.as_deref(), bearer.as_deref())
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => {
            debug!(note_id = %note_id, error = %e, "stream authentication failed");
            return reject(socket, CLOSE_POLICY, e.code()).await;
        }
    };

    match state.quota.try_consume(&ctx.tenant, surface, 1, 0).await {
        Ok(QuotaDecision::Allowed) => {}
        Ok(QuotaDecision::Denied { .. }) => {
            return reject(socket, CLOSE_QUOTA, "RATE_LIMIT").await;
        }
        Err(_) => return reject(socket, CLOSE_INTERNAL, "INTERNAL").await,
    }

    let session = match state.hub.open(&ctx, &note_id).await {
        Ok(session) => session,
        Err(e) => {
            let code = match e {
                CoreError::NotFound(_) => CLOSE_NOT_FOUND,
                CoreError::Forbidden(_) => CLOSE_POLICY,
                _ => CLOSE_INTERNAL,
            };
            return reject(socket, code, e.code()).await;
        }
    };

    let handle = session.handle;
    let mut frames = session.frames;
    let (mut sink, mut stream) = socket.split();

    let writer_handle = handle.clone();
    let writer_cancel = handle.cancelled();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                maybe = frames.recv() => match maybe {
                    Some(frame) => {
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        writer_handle.add_bytes_sent(text.len() as u64);
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        let (code, reason) = writer_handle
            .close_reason()
            .unwrap_or((1000, String::new()));
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    });

    let reader_cancel = handle.cancelled();
    loop {
        tokio::select! {
            _ = reader_cancel.cancelled() => break,
            maybe = stream.next() => match maybe {
                Some(Ok(Message::Text(text))) => {
                    handle.add_bytes_received(text.len() as u64);
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(ClientFrame::Patch(patch)) => {
                            if let Err(e) = state
                                .hub
                                .apply_patch(&ctx, &handle, &patch, text.len() as u64)
                                .await
                            {
                                state.hub.send_error(&handle, &e);
                                match e {
                                    CoreError::NotFound(_) => {
                                        handle.close(CLOSE_NOT_FOUND, "NOT_FOUND")
                                    }
                                    CoreError::QuotaExceeded { .. } => {
                                        handle.close(CLOSE_QUOTA, "RATE_LIMIT")
                                    }
                                    CoreError::Unauthenticated(_)
                                    | CoreError::Expired(_)
                                    | CoreError::Forbidden(_) => {
                                        handle.close(CLOSE_POLICY, "POLICY_VIOLATION")
                                    }
                                    // Version mismatch, invalid patch and
                                    // internal failures leave the session
                                    // active; the client may retry.
                                    _ => {}
                                }
                            }
                        }
                        Err(e) => {
                            state
                                .hub
                                .send_error(&handle, &CoreError::invalid(format!("bad frame: {e}")));
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary, ping and pong frames are not part of the protocol
                Some(Err(e)) => {
                    warn!(session_id = %handle.session_id(), error = %e, "socket error");
                    break;
                }
            },
        }
    }

    state.hub.close_session(&handle).await;
    // Wakes the writer when no close reason was set by an error path
    handle.close(1000, "");

    state.usage.emit(
        ctx.tenant_id(),
        Some(&ctx.principal.user_id),
        surface,
        &endpoint,
        handle.total_bytes(),
    );
    let _ = writer.await;

    info!(
        session_id = %handle.session_id(),
        note_id = %note_id,
        bytes = handle.total_bytes(),
        "stream finished"
    );
}

async fn reject(mut socket: WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
