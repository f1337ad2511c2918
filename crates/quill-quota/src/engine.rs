//! The quota engine: per-tenant request and byte buckets.

use quill_types::{CoreError, CoreResult, QuotaBackend, Surface, Tenant};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Effective bucket capacities for one tenant
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub requests_per_minute: u64,
    pub bytes_per_minute: u64,
    pub window_secs: u64,
}

/// Outcome of a combined request/byte admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { retry_after_secs: u64 },
}

impl QuotaDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }
}

/// Read-only snapshot for response annotation
#[derive(Debug, Clone, Copy)]
pub struct QuotaHeaders {
    pub limit: u64,
    pub remaining: u64,
    pub bytes_limit: u64,
    pub bytes_remaining: u64,
    pub reset_epoch_secs: u64,
}

/// Enforces per-tenant request-count and byte-volume limits through a shared
/// bucket backend. Both metric checks must succeed; the first failure
/// short-circuits and never consumes from the other bucket.
#[derive(Clone)]
pub struct QuotaEngine {
    backend: Arc<dyn QuotaBackend>,
    defaults: QuotaLimits,
}

impl QuotaEngine {
    pub fn new(backend: Arc<dyn QuotaBackend>, defaults: QuotaLimits) -> Self {
        Self { backend, defaults }
    }

    /// Effective limits for a tenant: stored overrides win over defaults.
    pub fn limits_for(&self, tenant: &Tenant) -> QuotaLimits {
        let mut limits = self.defaults;
        if let Some(ref quota) = tenant.quota {
            if let Some(requests) = quota.requests_per_minute {
                limits.requests_per_minute = requests;
            }
            if let Some(bytes) = quota.bytes_per_minute {
                limits.bytes_per_minute = bytes;
            }
        }
        limits
    }

    /// Consume `requests` from the request bucket and, when that was
    /// granted and `bytes > 0`, `bytes` from the byte bucket.
    pub async fn try_consume(
        &self,
        tenant: &Tenant,
        surface: Surface,
        requests: u64,
        bytes: u64,
    ) -> CoreResult<QuotaDecision> {
        let limits = self.limits_for(tenant);
        let now = epoch_secs()?;

        let request_outcome = self
            .backend
            .consume(
                &bucket_key(&tenant.org_id, surface, "requests"),
                limits.requests_per_minute,
                limits.window_secs,
                requests,
                now,
            )
            .await?;

        if !request_outcome.allowed() {
            warn!(
                org_id = %tenant.org_id,
                surface = %surface,
                retry_after = request_outcome.retry_after_secs,
                "request quota exceeded"
            );
            return Ok(QuotaDecision::Denied {
                retry_after_secs: request_outcome.retry_after_secs,
            });
        }

        if bytes > 0 {
            let byte_outcome = self
                .backend
                .consume(
                    &bucket_key(&tenant.org_id, surface, "bytes"),
                    limits.bytes_per_minute,
                    limits.window_secs,
                    bytes,
                    now,
                )
                .await?;

            if !byte_outcome.allowed() {
                warn!(
                    org_id = %tenant.org_id,
                    surface = %surface,
                    bytes,
                    retry_after = byte_outcome.retry_after_secs,
                    "byte quota exceeded"
                );
                return Ok(QuotaDecision::Denied {
                    retry_after_secs: byte_outcome.retry_after_secs,
                });
            }
        }

        Ok(QuotaDecision::Allowed)
    }

    /// Current token counts and reset horizon; a read-only snapshot that
    /// never refills.
    pub async fn observe_remaining(
        &self,
        tenant: &Tenant,
        surface: Surface,
    ) -> CoreResult<QuotaHeaders> {
        let limits = self.limits_for(tenant);

        let remaining = self
            .backend
            .peek(&bucket_key(&tenant.org_id, surface, "requests"))
            .await?
            .unwrap_or(limits.requests_per_minute);
        let bytes_remaining = self
            .backend
            .peek(&bucket_key(&tenant.org_id, surface, "bytes"))
            .await?
            .unwrap_or(limits.bytes_per_minute);

        Ok(QuotaHeaders {
            limit: limits.requests_per_minute,
            remaining,
            bytes_limit: limits.bytes_per_minute,
            bytes_remaining,
            reset_epoch_secs: epoch_secs()? + limits.window_secs,
        })
    }
}

fn bucket_key(org_id: &str, surface: Surface, metric: &str) -> String {
    format!("quota:{org_id}:{surface}:{metric}")
}

fn epoch_secs() -> CoreResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| CoreError::internal(format!("system clock before epoch: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryQuota;
    use chrono::Utc;
    use quill_types::QuotaOverride;

    fn tenant(quota: Option<QuotaOverride>) -> Tenant {
        Tenant {
            org_id: "org1".into(),
            name: "Acme".into(),
            created_at: Utc::now(),
            quota,
        }
    }

    fn engine() -> QuotaEngine {
        QuotaEngine::new(
            Arc::new(MemoryQuota::new()),
            QuotaLimits {
                requests_per_minute: 2,
                bytes_per_minute: 100,
                window_secs: 60,
            },
        )
    }

    #[tokio::test]
    async fn third_request_in_window_is_denied() {
        let engine = engine();
        let tenant = tenant(None);

        assert!(engine
            .try_consume(&tenant, Surface::Rest, 1, 0)
            .await
            .unwrap()
            .allowed());
        assert!(engine
            .try_consume(&tenant, Surface::Rest, 1, 0)
            .await
            .unwrap()
            .allowed());

        match engine.try_consume(&tenant, Surface::Rest, 1, 0).await.unwrap() {
            QuotaDecision::Denied { retry_after_secs } => assert!(retry_after_secs > 0),
            QuotaDecision::Allowed => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn byte_denial_does_not_refund_requests() {
        let engine = engine();
        let tenant = tenant(None);

        // Byte bucket holds 100; asking for 1000 is denied while the request
        // bucket was already charged.
        let decision = engine
            .try_consume(&tenant, Surface::Rest, 1, 1_000)
            .await
            .unwrap();
        assert!(!decision.allowed());

        let headers = engine
            .observe_remaining(&tenant, Surface::Rest)
            .await
            .unwrap();
        assert_eq!(headers.remaining, 1);
        assert_eq!(headers.bytes_remaining, 100);
    }

    #[tokio::test]
    async fn request_denial_never_touches_byte_bucket() {
        let engine = engine();
        let tenant = tenant(None);

        for _ in 0..2 {
            engine
                .try_consume(&tenant, Surface::Rest, 1, 10)
                .await
                .unwrap();
        }
        let denied = engine
            .try_consume(&tenant, Surface::Rest, 1, 10)
            .await
            .unwrap();
        assert!(!denied.allowed());

        let headers = engine
            .observe_remaining(&tenant, Surface::Rest)
            .await
            .unwrap();
        // Two granted requests charged 20 bytes; the denied one charged
        // none. One refill tick may land between the two charges.
        assert!((80..=81).contains(&headers.bytes_remaining));
    }

    #[tokio::test]
    async fn tenant_override_wins_over_defaults() {
        let engine = engine();
        let tenant = tenant(Some(QuotaOverride {
            requests_per_minute: Some(1),
            bytes_per_minute: None,
        }));

        let limits = engine.limits_for(&tenant);
        assert_eq!(limits.requests_per_minute, 1);
        assert_eq!(limits.bytes_per_minute, 100);

        assert!(engine
            .try_consume(&tenant, Surface::Rest, 1, 0)
            .await
            .unwrap()
            .allowed());
        assert!(!engine
            .try_consume(&tenant, Surface::Rest, 1, 0)
            .await
            .unwrap()
            .allowed());
    }

    #[tokio::test]
    async fn surfaces_use_independent_buckets() {
        let engine = engine();
        let tenant = tenant(None);

        for _ in 0..2 {
            assert!(engine
                .try_consume(&tenant, Surface::Rest, 1, 0)
                .await
                .unwrap()
                .allowed());
        }
        // REST exhausted; STREAM still has its own bucket
        assert!(!engine
            .try_consume(&tenant, Surface::Rest, 1, 0)
            .await
            .unwrap()
            .allowed());
        assert!(engine
            .try_consume(&tenant, Surface::Stream, 1, 0)
            .await
            .unwrap()
            .allowed());
    }
}
