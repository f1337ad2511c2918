//! Usage records emitted for downstream billing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The protocol surface an operation arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Surface {
    /// Request/response CRUD
    Rest,
    /// Bidirectional streaming edit
    Stream,
    /// Unary / server-streaming RPC
    Rpc,
}

impl Surface {
    /// Stable uppercase name, matching the stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Rest => "REST",
            Surface::Stream => "STREAM",
            Surface::Rpc => "RPC",
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only usage record; never read on the serving path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub org_id: String,
    pub user_id: Option<String>,
    pub surface: Surface,
    pub endpoint: String,
    pub bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Convenience constructor stamping the current time
    pub fn now(
        org_id: impl Into<String>,
        user_id: Option<String>,
        surface: Surface,
        endpoint: impl Into<String>,
        bytes: u64,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            user_id,
            surface,
            endpoint: endpoint.into(),
            bytes,
            timestamp: Utc::now(),
        }
    }
}
