//! The authentication gate: credential → (principal, tenant).

use crate::keys::{digest_key, verify_digest, API_KEY_PREFIX};
use crate::token::TokenSigner;
use chrono::Utc;
use quill_types::{AuthContext, CoreError, CoreResult, Credential, IdentityStore, Role};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves inbound credentials against the identity store.
///
/// The gate never mutates global state; the resolved [`AuthContext`] travels
/// with the request and the store facade enforces the tenant predicate
/// structurally.
#[derive(Clone)]
pub struct AuthGate {
    identity: Arc<dyn IdentityStore>,
    signer: TokenSigner,
}

impl AuthGate {
    /// Create a gate over an identity store and token signer
    pub fn new(identity: Arc<dyn IdentityStore>, signer: TokenSigner) -> Self {
        Self { identity, signer }
    }

    /// The signer, for token issuance endpoints
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Resolve the presented credentials to exactly one principal and
    /// tenant. When both an API key and a bearer token are presented the
    /// bearer token wins; when neither is present the caller is
    /// unauthenticated.
    pub async fn authenticate(
        &self,
        api_key: Option<&str>,
        bearer: Option<&str>,
    ) -> CoreResult<AuthContext> {
        if let Some(token) = bearer {
            return self.resolve(Credential::Bearer(token.to_string())).await;
        }
        if let Some(key) = api_key {
            return self.resolve(Credential::ApiKey(key.to_string())).await;
        }
        Err(CoreError::unauthenticated("credentials required"))
    }

    /// Resolve a single, already-extracted credential.
    pub async fn resolve(&self, credential: Credential) -> CoreResult<AuthContext> {
        match credential {
            Credential::ApiKey(key) => self.resolve_api_key(&key).await,
            Credential::Bearer(token) => self.resolve_bearer(&token).await,
        }
    }

    async fn resolve_api_key(&self, key: &str) -> CoreResult<AuthContext> {
        if !key.starts_with(API_KEY_PREFIX) {
            return Err(CoreError::unauthenticated("invalid API key"));
        }

        let presented = digest_key(key);
        let record = self
            .identity
            .find_api_key_by_digest(&presented)
            .await?
            .ok_or_else(|| CoreError::unauthenticated("invalid API key"))?;

        if !verify_digest(&presented, &record.digest) {
            return Err(CoreError::unauthenticated("invalid API key"));
        }

        if let Some(expires_at) = record.expires_at {
            if expires_at < Utc::now() {
                debug!(key_id = %record.key_id, "API key past its expiry");
                return Err(CoreError::expired("API key has expired"));
            }
        }

        // An API key acts as the tenant's Owner; a tenant without one is an
        // inconsistency the gate refuses to paper over.
        let principal = self
            .identity
            .find_owner(&record.org_id)
            .await?
            .ok_or_else(|| {
                warn!(org_id = %record.org_id, "tenant has no owner principal");
                CoreError::internal("tenant has no owner")
            })?;

        let tenant = self.load_tenant(&record.org_id).await?;
        Ok(AuthContext { principal, tenant })
    }

    async fn resolve_bearer(&self, token: &str) -> CoreResult<AuthContext> {
        let claims = self.signer.verify(token)?;

        let principal = self
            .identity
            .resolve_user(&claims.sub)
            .await?
            .ok_or_else(|| CoreError::unauthenticated("unknown principal"))?;

        let tenant = self.load_tenant(&principal.org_id).await?;
        Ok(AuthContext { principal, tenant })
    }

    async fn load_tenant(&self, org_id: &str) -> CoreResult<quill_types::Tenant> {
        self.identity.load_tenant(org_id).await?.ok_or_else(|| {
            warn!(org_id = %org_id, "credential references a missing tenant");
            CoreError::internal("tenant record missing")
        })
    }
}

/// Derived role check: `principal.role >= min_role`, else `Forbidden`.
pub fn require_role(ctx: &AuthContext, min_role: Role) -> CoreResult<()> {
    if ctx.principal.role >= min_role {
        Ok(())
    } else {
        Err(CoreError::forbidden(format!(
            "requires role {min_role} or higher"
        )))
    }
}
