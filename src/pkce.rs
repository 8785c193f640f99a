//! PKCE (RFC 7636) verifier/challenge generation and CSRF nonces.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distr::Alphanumeric;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng, TryRngCore};
use sha2::{Digest, Sha256};

/// Number of random bytes behind a verifier; encodes to 128 characters.
const VERIFIER_BYTES: usize = 96;
const VERIFIER_LEN: usize = 128;
const URL_SAFE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// A PKCE verifier and its S256 challenge.
#[derive(Clone)]
pub struct PkceChallenge {
    verifier: String,
    challenge: String,
    fallback: bool,
}

impl PkceChallenge {
    /// Generate a fresh verifier from the OS random source.
    ///
    /// If the OS source is unavailable the verifier is built from a
    /// time-seeded generator instead. That verifier is not suitable
    /// against an attacker who can guess the seed; the event is logged at
    /// `warn` and reported through [`PkceChallenge::is_fallback`].
    pub fn generate() -> Self {
        Self::generate_with(|buf| OsRng.try_fill_bytes(buf).map_err(|e| e.to_string()))
    }

    pub(crate) fn generate_with<F>(fill: F) -> Self
    where
        F: FnOnce(&mut [u8]) -> Result<(), String>,
    {
        let mut bytes = [0u8; VERIFIER_BYTES];
        let (verifier, fallback) = match fill(&mut bytes) {
            Ok(()) => (URL_SAFE_NO_PAD.encode(bytes), false),
            Err(error) => {
                tracing::warn!(
                    error = %error,
                    "secure random source unavailable; PKCE verifier uses a non-cryptographic fallback"
                );
                (fallback_verifier(), true)
            }
        };
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
            fallback,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Always `"S256"`.
    pub fn method(&self) -> &'static str {
        "S256"
    }

    /// True when the verifier came from the non-cryptographic fallback.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Base64-URL (no padding) SHA-256 digest of the verifier's bytes.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Random alphanumeric string used as the CSRF `state` value.
pub fn state_nonce(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn fallback_verifier() -> String {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
        ^ u64::from(std::process::id());
    let mut rng = StdRng::seed_from_u64(seed);
    (0..VERIFIER_LEN)
        .map(|_| URL_SAFE_ALPHABET[rng.random_range(0..URL_SAFE_ALPHABET.len())] as char)
        .collect()
}
