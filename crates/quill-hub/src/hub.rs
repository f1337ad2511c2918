//! The edit hub itself.

use crate::frames::{
    note_channel, InitData, PatchData, ServerFrame, UpdateEvent, CLOSE_SLOW_CONSUMER,
};
use crate::session::{DeliverError, SessionHandle, SessionRegistry};
use quill_index::IndexRegistry;
use quill_quota::QuotaEngine;
use quill_types::{AuthContext, CoreError, CoreResult, EditBus, Note, NoteStore, Role, Surface};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One admitted streaming session: the registry handle plus the outbound
/// frame queue drained by the transport writer.
#[derive(Debug)]
pub struct EditSession {
    pub handle: Arc<SessionHandle>,
    pub frames: mpsc::Receiver<ServerFrame>,
}

/// Per-process edit coordinator.
///
/// Admits sessions, applies version-guarded patches through the store,
/// re-indexes committed state, and publishes every commit on the edit bus.
/// Fan-out to local sessions happens in the per-note forward task fed by
/// the bus subscription, so commits made by other process instances take
/// exactly the same path as local ones.
pub struct EditHub {
    store: Arc<dyn NoteStore>,
    index: Arc<IndexRegistry>,
    quota: QuotaEngine,
    bus: Arc<dyn EditBus>,
    registry: Arc<SessionRegistry>,
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
    queue_depth: usize,
    op_timeout: Duration,
}

impl EditHub {
    pub fn new(
        store: Arc<dyn NoteStore>,
        index: Arc<IndexRegistry>,
        quota: QuotaEngine,
        bus: Arc<dyn EditBus>,
        queue_depth: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            store,
            index,
            quota,
            bus,
            registry: Arc::new(SessionRegistry::new()),
            subscriptions: Mutex::new(HashMap::new()),
            queue_depth,
            op_timeout,
        }
    }

    /// Sessions currently attached to a note on this instance.
    pub fn session_count(&self, note_id: &str) -> usize {
        self.registry.session_count(note_id)
    }

    /// Admit a session: requires role Editor or higher and an existing,
    /// non-deleted note. The session's first frame is the current note
    /// state.
    ///
    /// The channel subscription is established before the state read, and
    /// the init frame enters the queue before the registry makes the
    /// session visible to fan-out: every session starts from its init
    /// version and observes later commits in order.
    pub async fn open(&self, ctx: &AuthContext, note_id: &str) -> CoreResult<EditSession> {
        if ctx.principal.role < Role::Editor {
            return Err(CoreError::forbidden("editing requires role editor or higher"));
        }

        self.ensure_subscribed(note_id).await?;

        let note = match self
            .bounded("note load", self.store.get(ctx.tenant_id(), note_id))
            .await
        {
            Ok(note) => note,
            Err(e) => {
                self.release_if_unused(note_id).await;
                return Err(e);
            }
        };

        let (frames_tx, frames_rx) = mpsc::channel(self.queue_depth);
        let handle = Arc::new(SessionHandle::new(
            Uuid::new_v4().to_string(),
            note_id.to_string(),
            ctx.tenant_id().to_string(),
            ctx.principal.user_id.clone(),
            frames_tx,
        ));

        // A fresh queue cannot be full
        let _ = handle.deliver(ServerFrame::Init(InitData {
            note_id: note.note_id.clone(),
            title: note.title,
            body: note.body,
            version: note.version,
        }));
        self.registry.insert(Arc::clone(&handle));

        info!(
            session_id = %handle.session_id(),
            note_id = %note_id,
            org_id = %ctx.tenant_id(),
            "edit session admitted"
        );

        Ok(EditSession {
            handle,
            frames: frames_rx,
        })
    }

    /// Apply one client patch frame.
    ///
    /// Charges quota (one request plus the frame's byte length), commits
    /// with the client's expected version, re-indexes the committed state
    /// and publishes on the note's edit channel. Every error is returned to
    /// the caller for framing; nothing is published on failure.
    pub async fn apply_patch(
        &self,
        ctx: &AuthContext,
        handle: &SessionHandle,
        patch_frame: &PatchData,
        frame_bytes: u64,
    ) -> CoreResult<Note> {
        let patch = patch_frame.decode()?;

        let decision = self
            .quota
            .try_consume(&ctx.tenant, Surface::Stream, 1, frame_bytes)
            .await?;
        if let quill_quota::QuotaDecision::Denied { retry_after_secs } = decision {
            return Err(CoreError::QuotaExceeded { retry_after_secs });
        }

        let committed = self
            .bounded(
                "versioned commit",
                self.store.commit_versioned(
                    ctx.tenant_id(),
                    handle.note_id(),
                    patch_frame.version,
                    &patch,
                ),
            )
            .await?;

        // The index converges through rebuild; a failed upsert must not
        // fail a commit that is already durable.
        if let Err(e) = self.index.index_note(&committed).await {
            warn!(
                note_id = %committed.note_id,
                error = %e,
                "re-index after commit failed"
            );
        }

        let event = UpdateEvent::from_note(&committed);
        let payload = serde_json::to_vec(&event)
            .map_err(|e| CoreError::internal(format!("event encode: {e}")))?;
        self.bounded(
            "bus publish",
            self.bus.publish(&note_channel(&committed.note_id), payload),
        )
        .await?;

        debug!(
            session_id = %handle.session_id(),
            note_id = %committed.note_id,
            version = committed.version,
            "patch committed and published"
        );

        Ok(committed)
    }

    /// Deliver an error frame to one session only.
    pub fn send_error(&self, handle: &SessionHandle, err: &CoreError) {
        let frame = ServerFrame::Error(crate::frames::ErrorData::from_error(err));
        if handle.deliver(frame) == Err(DeliverError::Overflow) {
            self.close_slow_consumer(handle);
        }
    }

    /// Remove a session from the registry and drop the note's bus
    /// subscription when it was the last one. Returns `true` only for the
    /// call that actually removed the session.
    pub async fn close_session(&self, handle: &SessionHandle) -> bool {
        let removed = self
            .registry
            .remove(handle.note_id(), handle.session_id());

        self.release_if_unused(handle.note_id()).await;

        if removed {
            info!(
                session_id = %handle.session_id(),
                note_id = %handle.note_id(),
                bytes = handle.total_bytes(),
                "edit session closed"
            );
        }
        removed
    }

    /// Drop the note's bus subscription when no local session needs it.
    async fn release_if_unused(&self, note_id: &str) {
        if self.registry.session_count(note_id) == 0 {
            if let Some(cancel) = self.subscriptions.lock().await.remove(note_id) {
                cancel.cancel();
            }
        }
    }

    fn close_slow_consumer(&self, handle: &SessionHandle) {
        warn!(
            session_id = %handle.session_id(),
            note_id = %handle.note_id(),
            "closing slow consumer"
        );
        self.registry.remove(handle.note_id(), handle.session_id());
        handle.close(CLOSE_SLOW_CONSUMER, "SLOW_CONSUMER");
    }

    /// Subscribe the hub to a note's channel on first use and spawn the
    /// forward task that fans bus payloads out to local sessions.
    async fn ensure_subscribed(&self, note_id: &str) -> CoreResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(note_id) {
            return Ok(());
        }

        let mut subscription = self
            .bounded("bus subscribe", self.bus.subscribe(&note_channel(note_id)))
            .await?;

        let cancel = CancellationToken::new();
        subscriptions.insert(note_id.to_string(), cancel.clone());
        drop(subscriptions);

        let registry = Arc::clone(&self.registry);
        let note_id = note_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = subscription.recv() => match maybe {
                        Some(payload) => match serde_json::from_slice::<UpdateEvent>(&payload) {
                            Ok(event) => dispatch_update(&registry, &event),
                            Err(e) => {
                                warn!(note_id = %note_id, error = %e, "undecodable bus payload")
                            }
                        },
                        None => break,
                    },
                }
            }
            debug!(note_id = %note_id, "forward task ended");
        });

        Ok(())
    }

    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = CoreResult<T>>,
    ) -> CoreResult<T> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::internal(format!("{what} timed out"))),
        }
    }
}

/// Fan one committed update out to every local session of the note. The
/// originating session receives it too: that confirms the globally
/// observed commit order. Slow consumers are closed, not waited on.
fn dispatch_update(registry: &SessionRegistry, event: &UpdateEvent) {
    for handle in registry.snapshot(&event.note_id) {
        match handle.deliver(event.to_update_frame()) {
            Ok(()) => {}
            Err(DeliverError::Overflow) => {
                warn!(
                    session_id = %handle.session_id(),
                    note_id = %event.note_id,
                    "outbound queue overflow, closing session"
                );
                registry.remove(&event.note_id, handle.session_id());
                handle.close(CLOSE_SLOW_CONSUMER, "SLOW_CONSUMER");
            }
            Err(DeliverError::Closed) => {
                registry.remove(&event.note_id, handle.session_id());
            }
        }
    }
}
