//! Store ports: notes, identities, API keys and usage.
//!
//! Every operation takes an explicit tenant identifier and implementations
//! must include it in the query predicate; row-level tenant filtering is the
//! store's responsibility, the ports make it structural.

use crate::error::CoreResult;
use crate::note::{Note, NotePatch};
use crate::tenant::{ApiKeyRecord, Principal, Tenant};
use crate::usage::UsageRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Narrow, tenant-scoped facade over the note rows.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Create a note with `version = 1` and fresh timestamps.
    async fn create(&self, org_id: &str, title: &str, body: &str) -> CoreResult<Note>;

    /// Fetch a note; soft-deleted notes report `NotFound`.
    async fn get(&self, org_id: &str, note_id: &str) -> CoreResult<Note>;

    /// List non-deleted notes, last-modified first.
    async fn list(&self, org_id: &str, offset: i64, limit: i64) -> CoreResult<Vec<Note>>;

    /// Apply a blind partial update, incrementing the version by 1.
    async fn patch(&self, org_id: &str, note_id: &str, patch: &NotePatch) -> CoreResult<Note>;

    /// Version-guarded commit: mutate only if the stored version equals
    /// `expected_version`. The check and the write are a single atomic step;
    /// of two concurrent callers with the same expected version exactly one
    /// succeeds and the other observes `VersionMismatch` with the current
    /// version. Returns the note state produced by the commit's own read.
    async fn commit_versioned(
        &self,
        org_id: &str,
        note_id: &str,
        expected_version: i64,
        patch: &NotePatch,
    ) -> CoreResult<Note>;

    /// Set the deletion flag without bumping the version. A second call
    /// reports `NotFound`.
    async fn soft_delete(&self, org_id: &str, note_id: &str) -> CoreResult<()>;

    /// Enumerate every non-deleted note for index rebuilds.
    async fn list_for_index(&self, org_id: &str) -> CoreResult<Vec<Note>>;
}

/// Credential and principal resolution.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up an API-key record by the digest of the presented secret.
    async fn find_api_key_by_digest(&self, digest: &str) -> CoreResult<Option<ApiKeyRecord>>;

    /// Resolve a principal by id (bearer-token subject).
    async fn resolve_user(&self, user_id: &str) -> CoreResult<Option<Principal>>;

    /// Resolve a principal by email (token issuance).
    async fn find_user_by_email(&self, email: &str) -> CoreResult<Option<Principal>>;

    /// The tenant's Owner principal, used when an API key authenticates.
    async fn find_owner(&self, org_id: &str) -> CoreResult<Option<Principal>>;

    /// Load a tenant record.
    async fn load_tenant(&self, org_id: &str) -> CoreResult<Option<Tenant>>;
}

/// API-key lifecycle; only digests are ever stored.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn create_key(
        &self,
        org_id: &str,
        name: &str,
        digest: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<ApiKeyRecord>;

    async fn list_keys(&self, org_id: &str) -> CoreResult<Vec<ApiKeyRecord>>;

    /// Delete a key scoped to its tenant; missing keys report `NotFound`.
    async fn delete_key(&self, org_id: &str, key_id: &str) -> CoreResult<()>;
}

/// Append-only sink for usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_batch(&self, records: &[UsageRecord]) -> CoreResult<()>;
}
