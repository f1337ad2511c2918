//! Authentication gate and tenant resolution.
//!
//! Every inbound operation passes through [`AuthGate::authenticate`] before
//! any other component acts: the gate resolves the presented credential to
//! exactly one `(principal, tenant)` pair, or fails closed. Two credential
//! kinds are accepted: prefixed API keys matched by constant-time digest
//! comparison, and signed short-lived bearer tokens. When both are present
//! the bearer token wins.

mod gate;
mod keys;
mod token;

pub use gate::{require_role, AuthGate};
pub use keys::{digest_key, generate_api_key, verify_digest, API_KEY_PREFIX};
pub use token::{Claims, TokenSigner};
