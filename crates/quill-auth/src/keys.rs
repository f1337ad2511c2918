//! API-key generation, digesting and constant-time verification.
//!
//! The store holds only the SHA-256 hex digest of the full bearer string;
//! the secret is shown to the caller exactly once at creation time.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Fixed prefix of every Quill API key
pub const API_KEY_PREFIX: &str = "qk_";

const SECRET_BYTES: usize = 24;

/// Generate a fresh API key: `qk_` followed by a base64url secret.
pub fn generate_api_key() -> String {
    let mut secret = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(secret))
}

/// One-way digest of a presented key, hex-encoded for storage.
pub fn digest_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Constant-time comparison of two digests.
///
/// Length mismatch short-circuits, which leaks only the digest length (a
/// fixed property of the digest function, not of the secret).
pub fn verify_digest(presented: &str, stored: &str) -> bool {
    if presented.len() != stored.len() {
        return false;
    }
    presented.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_differ() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert!(a.starts_with(API_KEY_PREFIX));
        assert!(b.starts_with(API_KEY_PREFIX));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_deterministic() {
        let key = "qk_fixed-secret";
        assert_eq!(digest_key(key), digest_key(key));
        assert_eq!(digest_key(key).len(), 64);
    }

    #[test]
    fn digest_avalanche() {
        // A single flipped bit must change at least 30% of the output bits.
        let base = digest_key("qk_avalanche-probe");
        let flipped = digest_key("qk_avalanche-proce"); // 'b' ^ 0x01

        let base_bytes = hex_bytes(&base);
        let flipped_bytes = hex_bytes(&flipped);

        let differing: u32 = base_bytes
            .iter()
            .zip(flipped_bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        let total_bits = (base_bytes.len() * 8) as f64;

        assert!(f64::from(differing) / total_bits >= 0.30);
    }

    #[test]
    fn verify_digest_matches_only_equal_inputs() {
        let stored = digest_key("qk_secret");
        assert!(verify_digest(&digest_key("qk_secret"), &stored));
        assert!(!verify_digest(&digest_key("qk_secret2"), &stored));
        assert!(!verify_digest("short", &stored));
    }

    fn hex_bytes(hex: &str) -> Vec<u8> {
        hex.as_bytes()
            .chunks(2)
            .map(|pair| {
                let s = std::str::from_utf8(pair).unwrap();
                u8::from_str_radix(s, 16).unwrap()
            })
            .collect()
    }
}
