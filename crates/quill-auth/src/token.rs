//! Bearer tokens: signed, short-lived, carrying the principal id.

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use quill_types::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id
    pub sub: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

/// Signs and validates bearer tokens with a configured algorithm and secret.
#[derive(Clone)]
pub struct TokenSigner {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenSigner {
    /// Build a signer from configuration. Only the HMAC family is supported;
    /// unknown algorithm names are rejected at startup.
    pub fn new(secret: &str, algorithm: &str, ttl: Duration) -> CoreResult<Self> {
        let algorithm = match algorithm {
            "HS256" => Algorithm::HS256,
            "HS384" => Algorithm::HS384,
            "HS512" => Algorithm::HS512,
            other => {
                return Err(CoreError::invalid(format!(
                    "unsupported token algorithm: {other}"
                )))
            }
        };

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        })
    }

    /// Issue a token for a principal with the configured lifetime.
    pub fn issue(&self, user_id: &str) -> CoreResult<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default())
                .timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| CoreError::internal(format!("token signing failed: {e}")))
    }

    /// Validate signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> CoreResult<Claims> {
        let validation = Validation::new(self.algorithm);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    CoreError::expired("bearer token past its expiry")
                }
                _ => CoreError::unauthenticated("invalid bearer token"),
            })
    }
}
