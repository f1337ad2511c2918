//! # Quill Types
//!
//! Shared types and ports for the Quill collaborative note service.
//! This crate provides the domain model used across all Quill crates and the
//! backend-agnostic ports that let the core be wired against PostgreSQL and
//! Redis in production or in-memory implementations in tests.
//!
//! ## Organization
//!
//! - `tenant`: tenants, principals, roles, credentials
//! - `note`: notes and the closed patch schema
//! - `usage`: usage records emitted for billing
//! - `error`: the unified error type surfaced across the core
//! - `ports`: store, quota, bus and embedding ports

pub mod error;
pub mod note;
pub mod ports;
pub mod tenant;
pub mod usage;

pub use error::{CoreError, CoreResult};
pub use note::{Note, NotePatch};
pub use ports::{
    ApiKeyStore, BucketOutcome, BusSubscription, EditBus, Embedder, IdentityStore, NoteStore,
    QuotaBackend, UsageSink,
};
pub use tenant::{ApiKeyRecord, AuthContext, Credential, Principal, QuotaOverride, Role, Tenant};
pub use usage::{Surface, UsageRecord};
