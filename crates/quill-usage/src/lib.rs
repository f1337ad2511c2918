//! Usage emitter.
//!
//! Records `(tenant, principal, surface, endpoint, bytes)` for downstream
//! billing without ever blocking the serving path: emission appends to a
//! bounded in-memory queue and a background task drains batches into the
//! sink. On overflow the oldest records are dropped and counted — billing
//! tolerates gaps, the serving path tolerates no stalls.

use parking_lot::Mutex;
use quill_types::{Surface, UsageRecord, UsageSink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

const FLUSH_BATCH: usize = 128;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

struct Shared {
    queue: Mutex<VecDeque<UsageRecord>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// Handle for emitting usage records.
#[derive(Clone)]
pub struct UsageEmitter {
    shared: Arc<Shared>,
}

impl UsageEmitter {
    /// Create the emitter and spawn its flusher task.
    pub fn start(sink: Arc<dyn UsageSink>, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        });

        let flusher_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            flusher(flusher_shared, sink).await;
        });

        Self { shared }
    }

    /// Enqueue one record. Never blocks, never raises; the oldest backlog
    /// entry is sacrificed when the queue is full.
    pub fn emit(
        &self,
        org_id: &str,
        user_id: Option<&str>,
        surface: Surface,
        endpoint: &str,
        bytes: u64,
    ) {
        let record = UsageRecord::now(
            org_id,
            user_id.map(str::to_string),
            surface,
            endpoint,
            bytes,
        );

        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(record);
        }
        self.shared.notify.notify_one();
    }

    /// Records dropped due to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Backlog length (test observer).
    pub fn backlog(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

async fn flusher(shared: Arc<Shared>, sink: Arc<dyn UsageSink>) {
    loop {
        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = tokio::time::sleep(FLUSH_INTERVAL) => {}
        }

        loop {
            let batch: Vec<UsageRecord> = {
                let mut queue = shared.queue.lock();
                let take = queue.len().min(FLUSH_BATCH);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }

            if let Err(e) = sink.record_batch(&batch).await {
                // Billing is lossy by contract; the serving path never sees
                // this failure.
                warn!(error = %e, lost = batch.len(), "usage batch discarded");
            } else {
                debug!(count = batch.len(), "usage batch flushed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quill_store::MemoryStore;
    use quill_types::{CoreError, CoreResult};

    #[tokio::test]
    async fn emitted_records_reach_the_sink() {
        let store = Arc::new(MemoryStore::new());
        let emitter = UsageEmitter::start(store.clone(), 100);

        emitter.emit("org1", Some("u1"), Surface::Rest, "/v1/notes", 42);
        emitter.emit("org1", None, Surface::Stream, "/stream/notes/n1", 7);

        let mut flushed = Vec::new();
        for _ in 0..50 {
            flushed = store.usage_records();
            if flushed.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].endpoint, "/v1/notes");
        assert_eq!(flushed[0].bytes, 42);
        assert_eq!(flushed[1].surface, Surface::Stream);
        assert_eq!(flushed[1].user_id, None);
    }

    struct StuckSink;

    #[async_trait]
    impl UsageSink for StuckSink {
        async fn record_batch(&self, _records: &[UsageRecord]) -> CoreResult<()> {
            // Never drains in time
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(CoreError::internal("unreachable"))
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let emitter = UsageEmitter::start(Arc::new(StuckSink), 4);

        for i in 0..10u64 {
            emitter.emit("org1", None, Surface::Rest, &format!("/{i}"), i);
        }

        // Capacity 4: six oldest records were sacrificed
        assert!(emitter.dropped() >= 5);
        assert!(emitter.backlog() <= 4);
    }
}
