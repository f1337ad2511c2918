//! Session handles and the per-hub registry.

use crate::frames::ServerFrame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why delivery into a session queue failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// Bounded outbound queue overflowed
    Overflow,
    /// The receiving side is gone
    Closed,
}

/// One streaming client attached to one note.
///
/// Holds the bounded outbound queue, the last-delivered version (updates
/// must be strictly increasing per session, starting from the init
/// version), byte counters and the cancellation token that tears the
/// session down exactly once.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: String,
    note_id: String,
    org_id: String,
    user_id: String,
    frames: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<(u16, String)>>,
    last_version: AtomicI64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: String,
        note_id: String,
        org_id: String,
        user_id: String,
        frames: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            session_id,
            note_id,
            org_id,
            user_id,
            frames,
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            last_version: AtomicI64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Enqueue a frame without blocking.
    ///
    /// Update frames at or below the last delivered version are silently
    /// skipped, which makes every session observe a strictly increasing
    /// version sequence regardless of bus delivery races. Init frames set
    /// the baseline; error frames always pass.
    pub fn deliver(&self, frame: ServerFrame) -> Result<(), DeliverError> {
        match &frame {
            ServerFrame::Init(data) => {
                self.last_version.store(data.version, Ordering::SeqCst);
            }
            ServerFrame::Update(data) => {
                let previous = self.last_version.fetch_max(data.version, Ordering::SeqCst);
                if previous >= data.version {
                    return Ok(());
                }
            }
            ServerFrame::Error(_) => {}
        }

        self.frames.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliverError::Overflow,
            mpsc::error::TrySendError::Closed(_) => DeliverError::Closed,
        })
    }

    /// Request teardown with a close code; the transport writer observes
    /// the cancellation and sends the close frame.
    pub fn close(&self, code: u16, reason: &str) {
        let mut close_reason = self.close_reason.lock();
        if close_reason.is_none() {
            *close_reason = Some((code, reason.to_string()));
        }
        drop(close_reason);
        self.cancel.cancel();
    }

    /// The pending close code and reason, if any.
    pub fn close_reason(&self) -> Option<(u16, String)> {
        self.close_reason.lock().clone()
    }

    /// Token observed by the transport writer.
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Last version delivered to this session.
    pub fn last_version(&self) -> i64 {
        self.last_version.load(Ordering::SeqCst)
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes in both directions, for the usage record on close.
    pub fn total_bytes(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed) + self.bytes_received.load(Ordering::Relaxed)
    }
}

/// `note_id -> {session_id -> handle}` registry, mutated under the per-hub
/// lock; readers take a snapshot under the lock and iterate outside it.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, HashMap<String, Arc<SessionHandle>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions
            .lock()
            .entry(handle.note_id().to_string())
            .or_default()
            .insert(handle.session_id().to_string(), handle.clone());
    }

    /// Remove a session; `true` only for the call that actually removed it,
    /// so cleanup side effects run exactly once.
    pub fn remove(&self, note_id: &str, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(per_note) = sessions.get_mut(note_id) else {
            return false;
        };
        let removed = per_note.remove(session_id).is_some();
        if per_note.is_empty() {
            sessions.remove(note_id);
        }
        removed
    }

    /// Handles attached to a note at this instant.
    pub fn snapshot(&self, note_id: &str) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .get(note_id)
            .map(|per_note| per_note.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self, note_id: &str) -> usize {
        self.sessions
            .lock()
            .get(note_id)
            .map(|per_note| per_note.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{InitData, UpdateData};

    fn handle_with_queue(depth: usize) -> (Arc<SessionHandle>, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(depth);
        let handle = Arc::new(SessionHandle::new(
            "s1".into(),
            "n1".into(),
            "org1".into(),
            "u1".into(),
            tx,
        ));
        (handle, rx)
    }

    fn update(version: i64) -> ServerFrame {
        ServerFrame::Update(UpdateData {
            title: "t".into(),
            body: "b".into(),
            version,
        })
    }

    #[tokio::test]
    async fn stale_updates_are_skipped() {
        let (handle, mut rx) = handle_with_queue(8);
        handle
            .deliver(ServerFrame::Init(InitData {
                note_id: "n1".into(),
                title: "t".into(),
                body: "b".into(),
                version: 3,
            }))
            .unwrap();

        handle.deliver(update(3)).unwrap(); // at init version: skipped
        handle.deliver(update(5)).unwrap();
        handle.deliver(update(4)).unwrap(); // behind: skipped
        handle.deliver(update(6)).unwrap();

        let mut versions = Vec::new();
        rx.recv().await.unwrap(); // init
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Update(data) = frame {
                versions.push(data.version);
            }
        }
        assert_eq!(versions, vec![5, 6]);
        assert_eq!(handle.last_version(), 6);
    }

    #[tokio::test]
    async fn overflow_is_reported() {
        let (handle, _rx) = handle_with_queue(1);
        handle.deliver(update(1)).unwrap();
        assert_eq!(handle.deliver(update(2)), Err(DeliverError::Overflow));
    }

    #[tokio::test]
    async fn first_close_reason_wins() {
        let (handle, _rx) = handle_with_queue(1);
        handle.close(4009, "SLOW_CONSUMER");
        handle.close(1011, "INTERNAL");

        assert!(handle.is_closed());
        let (code, reason) = handle.close_reason().unwrap();
        assert_eq!(code, 4009);
        assert_eq!(reason, "SLOW_CONSUMER");
    }

    #[tokio::test]
    async fn registry_removal_happens_once() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = handle_with_queue(1);
        registry.insert(handle);

        assert_eq!(registry.session_count("n1"), 1);
        assert!(registry.remove("n1", "s1"));
        assert!(!registry.remove("n1", "s1"));
        assert_eq!(registry.session_count("n1"), 0);
    }
}
