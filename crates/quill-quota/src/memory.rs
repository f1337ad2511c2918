//! Process-local bucket backend.
//!
//! Same arithmetic as the Redis script behind a process-wide mutex. This is
//! correct only while a single process serves the tenant; deployments with
//! more than one instance must use [`crate::RedisQuota`].

use async_trait::async_trait;
use parking_lot::Mutex;
use quill_types::{BucketOutcome, CoreResult, QuotaBackend};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u64,
    last_refill: u64,
}

/// In-memory bucket backend for tests and single-process development.
#[derive(Default)]
pub struct MemoryQuota {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryQuota {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotaBackend for MemoryQuota {
    async fn consume(
        &self,
        key: &str,
        capacity: u64,
        window_secs: u64,
        requested: u64,
        now_epoch_secs: u64,
    ) -> CoreResult<BucketOutcome> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: 0,
        });

        let elapsed = now_epoch_secs.saturating_sub(bucket.last_refill);
        let refill = elapsed.saturating_mul(capacity) / window_secs;
        let tokens = capacity.min(bucket.tokens.saturating_add(refill));

        if tokens >= requested {
            bucket.tokens = tokens - requested;
            bucket.last_refill = now_epoch_secs;
            Ok(BucketOutcome {
                tokens: bucket.tokens,
                retry_after_secs: 0,
            })
        } else {
            // Denied: nothing is written back
            let deficit = requested - tokens;
            let retry_after = deficit
                .saturating_mul(window_secs)
                .saturating_add(capacity - 1)
                / capacity;
            Ok(BucketOutcome {
                tokens,
                retry_after_secs: retry_after,
            })
        }
    }

    async fn peek(&self, key: &str) -> CoreResult<Option<u64>> {
        Ok(self.buckets.lock().get(key).map(|b| b.tokens))
    }
}
