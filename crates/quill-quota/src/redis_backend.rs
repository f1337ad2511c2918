//! Redis-backed bucket: one Lua script per access.
//!
//! The script performs refill and consumption as a single scripted store
//! operation, which Redis serializes per key across every process in the
//! deployment. A denied access returns without writing.

use async_trait::async_trait;
use quill_types::{BucketOutcome, CoreError, CoreResult, QuotaBackend};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::debug;

/// Refill-then-consume, executed atomically inside Redis.
///
/// KEYS[1] bucket key; ARGV: now, window, capacity, requested.
/// Returns `{tokens_remaining, retry_after_seconds}`.
const BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])

local bucket = redis.call('hmget', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1] or capacity)
local last_refill = tonumber(bucket[2] or 0)

local elapsed = math.max(0, now - last_refill)
tokens = math.min(capacity, tokens + math.floor(elapsed * capacity / window))

if tokens >= requested then
    tokens = tokens - requested
    redis.call('hmset', key, 'tokens', tokens, 'last_refill', now)
    redis.call('expire', key, window)
    return {tokens, 0}
else
    local retry_after = math.ceil((requested - tokens) * window / capacity)
    return {tokens, retry_after}
end
"#;

/// Shared-atomic bucket backend over Redis.
pub struct RedisQuota {
    conn: MultiplexedConnection,
    script: Script,
}

impl RedisQuota {
    /// Connect to the shared-atomic service.
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CoreError::internal(format!("invalid redis URL: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CoreError::internal(format!("redis connection failed: {e}")))?;

        Ok(Self::with_connection(conn))
    }

    /// Build over an existing multiplexed connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            script: Script::new(BUCKET_SCRIPT),
        }
    }
}

#[async_trait]
impl QuotaBackend for RedisQuota {
    async fn consume(
        &self,
        key: &str,
        capacity: u64,
        window_secs: u64,
        requested: u64,
        now_epoch_secs: u64,
    ) -> CoreResult<BucketOutcome> {
        let mut conn = self.conn.clone();
        let (tokens, retry_after): (i64, i64) = self
            .script
            .key(key)
            .arg(now_epoch_secs)
            .arg(window_secs)
            .arg(capacity)
            .arg(requested)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CoreError::internal(format!("quota script failed: {e}")))?;

        debug!(key = %key, tokens, retry_after, "bucket access");

        Ok(BucketOutcome {
            tokens: tokens.max(0) as u64,
            retry_after_secs: retry_after.max(0) as u64,
        })
    }

    async fn peek(&self, key: &str) -> CoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let tokens: Option<i64> = conn
            .hget(key, "tokens")
            .await
            .map_err(|e| CoreError::internal(format!("quota read failed: {e}")))?;
        Ok(tokens.map(|t| t.max(0) as u64))
    }
}
