//! Token-bucket quota enforcement.
//!
//! Every tenant holds one bucket per `(surface, metric)` pair, where the
//! metric is either request count or byte volume. Buckets refill linearly
//! over a fixed window and are consumed through a single serialized
//! read-modify-write step, so no two concurrent callers can spend the same
//! tokens — across processes when backed by Redis ([`RedisQuota`]), within
//! one process when backed by memory ([`MemoryQuota`], tests and local
//! development only).

mod engine;
mod memory;
mod redis_backend;

pub use engine::{QuotaDecision, QuotaEngine, QuotaHeaders, QuotaLimits};
pub use memory::MemoryQuota;
pub use redis_backend::RedisQuota;
