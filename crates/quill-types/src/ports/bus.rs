//! Cross-process edit bus port.
//!
//! The contract is publish-subscribe on keyed channels with at-least-once
//! delivery and per-subscriber FIFO. The hub keys channels as
//! `note:{note_id}` so that every process instance fans commits out to its
//! local sessions.

use crate::error::CoreResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Keyed publish/subscribe bus.
#[async_trait]
pub trait EditBus: Send + Sync {
    /// Publish a payload to every subscriber of `channel`, across processes.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CoreResult<()>;

    /// Subscribe to `channel`. Delivery to the returned subscription is FIFO;
    /// dropping it ends the subscription.
    async fn subscribe(&self, channel: &str) -> CoreResult<BusSubscription>;
}

/// A live subscription to one bus channel.
///
/// Payloads arrive in publish order per publisher. The optional guard is
/// dropped together with the subscription so implementations can release
/// backend resources (e.g. a Redis UNSUBSCRIBE) deterministically.
pub struct BusSubscription {
    rx: mpsc::Receiver<Vec<u8>>,
    _guard: Option<Box<dyn std::any::Any + Send>>,
}

impl BusSubscription {
    /// Subscription without backend resources to release
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx, _guard: None }
    }

    /// Subscription tied to a guard object dropped on unsubscribe
    pub fn with_guard(rx: mpsc::Receiver<Vec<u8>>, guard: Box<dyn std::any::Any + Send>) -> Self {
        Self {
            rx,
            _guard: Some(guard),
        }
    }

    /// Receive the next payload; `None` once the bus side closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription").finish_non_exhaustive()
    }
}
