//! Unified error type surfaced across the Quill core.
//!
//! Every component maps its backend failures into [`CoreError`]; the surface
//! adapters translate the kinds into HTTP statuses, WebSocket close codes and
//! RPC status strings. The core recovers nothing locally: no kind is retried
//! on the serving path.

use thiserror::Error;

/// Result type alias using CoreError
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Error kinds surfaced across the core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Missing or invalid credential
    #[error("authentication required: {0}")]
    Unauthenticated(String),

    /// Credential past its TTL
    #[error("credential expired: {0}")]
    Expired(String),

    /// Valid credential, insufficient role
    #[error("insufficient permissions: {0}")]
    Forbidden(String),

    /// Note absent or soft-deleted
    #[error("not found: {0}")]
    NotFound(String),

    /// Stale expected version on a guarded commit
    #[error("version mismatch: current version is {current}")]
    VersionMismatch {
        /// Version currently stored for the note
        current: i64,
    },

    /// Token bucket empty
    #[error("quota exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        /// Seconds until the bucket holds enough tokens again
        retry_after_secs: u64,
    },

    /// Malformed input
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Session outbound queue overflowed
    #[error("session outbound queue overflow")]
    SlowConsumer,

    /// Store, bus or other unexpected failure; surfaced as opaque
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create an unauthenticated error
    pub fn unauthenticated<S: Into<String>>(msg: S) -> Self {
        CoreError::Unauthenticated(msg.into())
    }

    /// Create an expired-credential error
    pub fn expired<S: Into<String>>(msg: S) -> Self {
        CoreError::Expired(msg.into())
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        CoreError::Forbidden(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        CoreError::NotFound(resource.into())
    }

    /// Create an invalid-input error
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        CoreError::Invalid(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        CoreError::Internal(msg.into())
    }

    /// Stable kebab-case code used in error bodies across every surface
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated(_) => "unauthenticated",
            CoreError::Expired(_) => "expired",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::NotFound(_) => "not-found",
            CoreError::VersionMismatch { .. } => "version-mismatch",
            CoreError::QuotaExceeded { .. } => "quota-exceeded",
            CoreError::Invalid(_) => "invalid",
            CoreError::SlowConsumer => "slow-consumer",
            CoreError::Internal(_) => "internal",
        }
    }

    /// Check if the error is attributable to the caller (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CoreError::Internal(_) | CoreError::SlowConsumer)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Invalid(format!("malformed JSON: {err}"))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(format!("I/O failure: {err}"))
    }
}
