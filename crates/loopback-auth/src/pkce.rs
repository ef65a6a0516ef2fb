//! PKCE (RFC 7636) and CSRF state generation
//!
//! The verifier stays in memory for the duration of one flow and is sent with
//! the code exchange; the S256 challenge goes into the authorization URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Generate a random PKCE code verifier.
///
/// 64 random bytes encode to 86 URL-safe characters, inside the 43-128
/// range RFC 7636 allows.
pub fn generate_verifier() -> String {
    random_token::<64>()
}

/// `BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate the opaque `state` value echoed back on the redirect.
pub fn generate_state() -> String {
    random_token::<32>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verifier/challenge pair for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_url_safe(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_length_is_within_rfc_bounds() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!(is_url_safe(&verifier), "verifier: {verifier}");
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") base64url-encoded
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn states_are_unique_and_url_safe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(is_url_safe(&a));
    }

    #[test]
    fn pair_challenge_derives_from_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, compute_challenge(&pair.verifier));
        let decoded = URL_SAFE_NO_PAD.decode(&pair.challenge).unwrap();
        assert_eq!(decoded.len(), 32);
    }
}
