//! Request middleware: authentication, quota admission, usage recording.
//!
//! Every inbound call passes the gate and the quota engine before dispatch;
//! usage is recorded on completion. The chain is auth → quota → handler →
//! usage, applied per surface.

mod auth;
mod quota;
mod usage;

pub use auth::{auth_middleware, extract_credentials, is_public_path};
pub use quota::{quota_middleware_rest, quota_middleware_rpc};
pub use usage::{usage_middleware_rest, usage_middleware_rpc};
