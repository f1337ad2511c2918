//! Tenants, principals, roles and credentials.
//!
//! The tenant is the unit of isolation: every note, credential, session,
//! index and quota belongs to exactly one tenant. Tenants are created
//! out-of-band and never mutated by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant (organization) as held by the external store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant identifier
    pub org_id: String,
    /// Display name
    pub name: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Optional per-tenant quota override
    pub quota: Option<QuotaOverride>,
}

/// Per-tenant override of the default quota values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaOverride {
    pub requests_per_minute: Option<u64>,
    pub bytes_per_minute: Option<u64>,
}

/// Principal roles, totally ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Owner,
    Admin,
}

impl Role {
    /// Stable lowercase name, matching the stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
            Role::Admin => "admin",
        }
    }

    /// Parse the stored representation
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "viewer" => Some(Role::Viewer),
            "editor" => Some(Role::Editor),
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user within a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// User identifier
    pub user_id: String,
    /// Owning tenant
    pub org_id: String,
    /// Contact email
    pub email: String,
    /// Role within the tenant
    pub role: Role,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Stored API-key record; the secret itself is never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    /// Key identifier
    pub key_id: String,
    /// Owning tenant
    pub org_id: String,
    /// Human-readable label
    pub name: String,
    /// One-way digest of the full bearer string
    #[serde(skip_serializing)]
    pub digest: String,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Optional expiry; expired keys fail authentication
    pub expires_at: Option<DateTime<Utc>>,
}

/// An inbound credential, already extracted from transport metadata
#[derive(Debug, Clone)]
pub enum Credential {
    /// Opaque prefixed bearer string, matched by digest against the store
    ApiKey(String),
    /// Signed short-lived token carrying the principal id
    Bearer(String),
}

/// Resolved identity attached to every operation after the gate
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
    pub tenant: Tenant,
}

impl AuthContext {
    /// Tenant identifier this context is scoped to
    pub fn tenant_id(&self) -> &str {
        &self.tenant.org_id
    }
}
