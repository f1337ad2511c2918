//! Shared token-bucket primitive.

use crate::error::CoreResult;
use async_trait::async_trait;

/// Outcome of one bucket access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketOutcome {
    /// Tokens remaining after the access
    pub tokens: u64,
    /// Zero when the requested amount was granted; otherwise the seconds
    /// until the bucket refills enough to grant it
    pub retry_after_secs: u64,
}

impl BucketOutcome {
    /// Whether the requested amount was granted
    pub fn allowed(&self) -> bool {
        self.retry_after_secs == 0
    }
}

/// One serialized refill-then-consume step against a shared bucket.
///
/// The read-modify-write must be atomic per key across every process in the
/// deployment: no two concurrent callers may both spend the same tokens.
/// A denied access writes nothing back.
#[async_trait]
pub trait QuotaBackend: Send + Sync {
    /// Refill the bucket linearly to `now`, then try to take `requested`
    /// tokens from a bucket of `capacity` tokens per `window_secs`.
    async fn consume(
        &self,
        key: &str,
        capacity: u64,
        window_secs: u64,
        requested: u64,
        now_epoch_secs: u64,
    ) -> CoreResult<BucketOutcome>;

    /// Read-only token snapshot; never refills, never writes. `None` when
    /// the bucket has never been touched (i.e. it is full).
    async fn peek(&self, key: &str) -> CoreResult<Option<u64>>;
}
