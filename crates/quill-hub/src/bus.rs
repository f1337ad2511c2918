//! Single-process edit bus.
//!
//! Meets the bus contract within one process: per-channel fan-out with
//! per-subscriber FIFO. Tests use two hubs over one `LocalBus` to exercise
//! the cross-instance path without Redis.

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_types::{BusSubscription, CoreResult, EditBus};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::warn;

const SUBSCRIBER_BUFFER: usize = 256;

/// In-process keyed pub/sub.
#[derive(Default)]
pub struct LocalBus {
    channels: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers currently attached to a channel (test observer).
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EditBus for LocalBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CoreResult<()> {
        let senders = {
            let mut channels = self.channels.lock();
            let Some(senders) = channels.get_mut(channel) else {
                return Ok(());
            };
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                channels.remove(channel);
                return Ok(());
            }
            senders.clone()
        };

        for tx in senders {
            // The hub drains subscriptions promptly; a full buffer here means
            // the whole forward task stalled, not one slow client.
            if tx.try_send(payload.clone()).is_err() {
                warn!(channel = %channel, "dropping bus payload for stalled subscriber");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CoreResult<BusSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(BusSubscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payloads_reach_every_subscriber_in_order() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("note:1").await.unwrap();
        let mut b = bus.subscribe("note:1").await.unwrap();

        bus.publish("note:1", b"one".to_vec()).await.unwrap();
        bus.publish("note:1", b"two".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"one");
        assert_eq!(a.recv().await.unwrap(), b"two");
        assert_eq!(b.recv().await.unwrap(), b"one");
        assert_eq!(b.recv().await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe("note:1").await.unwrap();
        let _b = bus.subscribe("note:2").await.unwrap();

        bus.publish("note:2", b"other".to_vec()).await.unwrap();
        bus.publish("note:1", b"mine".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"mine");
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = LocalBus::new();
        let sub = bus.subscribe("note:1").await.unwrap();
        assert_eq!(bus.subscriber_count("note:1"), 1);

        drop(sub);
        bus.publish("note:1", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.subscriber_count("note:1"), 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = LocalBus::new();
        bus.publish("note:none", b"x".to_vec()).await.unwrap();
    }
}
