//! PKCE (Proof Key for Code Exchange) and state-id generation
//!
//! Implements RFC 7636: the challenge is BASE64URL(SHA256(ASCII(verifier))),
//! computed over the verifier's text representation, never over decoded
//! bytes. Randomness comes from the operating-system CSPRNG; a failing RNG
//! is reported, not papered over, so callers can degrade by omitting PKCE.

use authrelay_domain::{AuthError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// The only challenge method this client emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Number of random bytes behind a code verifier (86 base64url chars,
/// within RFC 7636's 43-128 limit).
const VERIFIER_BYTES: usize = 64;

/// Number of random bytes behind a state id (43 base64url chars, 256 bits
/// of entropy).
const STATE_BYTES: usize = 32;

/// Generate a code challenge from a verifier.
///
/// The digest input is the verifier's ASCII bytes.
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate an unguessable state id for CSRF/replay protection.
///
/// # Errors
/// Returns `AuthError::RandomnessUnavailable` if the OS randomness source
/// fails.
pub fn generate_state_id() -> Result<String> {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(|_| AuthError::RandomnessUnavailable)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// PKCE verifier/challenge pair for one authorization request.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    /// Random string sent during token exchange; secret until then
    pub code_verifier: String,

    /// SHA-256 of the verifier text, sent with the authorization request
    pub code_challenge: String,
}

impl PkceChallenge {
    /// Generate a fresh pair from the OS CSPRNG.
    ///
    /// # Errors
    /// Returns `AuthError::RandomnessUnavailable` if the randomness source
    /// fails; callers treat PKCE as unavailable for the request rather than
    /// aborting authentication.
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; VERIFIER_BYTES];
        OsRng.try_fill_bytes(&mut bytes).map_err(|_| AuthError::RandomnessUnavailable)?;
        let code_verifier = URL_SAFE_NO_PAD.encode(bytes);
        let code_challenge = challenge_for(&code_verifier);
        Ok(Self { code_verifier, code_challenge })
    }

    /// Challenge method (always `"S256"`).
    #[must_use]
    pub fn challenge_method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}
