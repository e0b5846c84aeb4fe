//! Opt-in identity-token signature verification
//!
//! The default client configuration decodes the identity token payload
//! without checking its signature; the claims are trusted because they
//! arrive over TLS from the token endpoint. When
//! `IdTokenVerification::Jwks` is configured, the provider's published key
//! set is fetched and the token signature, audience, and (optionally)
//! issuer are verified here before any claim is trusted.
//!
//! Aggregated-claim embedded JWTs are out of scope either way; only the
//! identity token itself is verified.

use authrelay_domain::{AuthError, Result};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde_json::Value;

/// Parse a JWKS document body.
///
/// # Errors
/// `BadIdTokenClaim` when the body is not a valid key set.
pub fn parse_jwk_set(body: &str) -> Result<JwkSet> {
    serde_json::from_str(body)
        .map_err(|e| AuthError::BadIdTokenClaim(format!("JWKS document is not valid: {e}")))
}

/// Verify an identity token against a key set and return its claims.
///
/// The signing key is selected by the token header's `kid`; a set with a
/// single key is accepted when the header carries none. The audience must
/// contain `client_id`; the issuer is checked only when `issuer` is given.
///
/// # Errors
/// `BadIdTokenClaim` on any header, key-selection, or verification failure.
pub fn verify_id_token(
    token: &str,
    keys: &JwkSet,
    client_id: &str,
    issuer: Option<&str>,
) -> Result<Value> {
    let header = decode_header(token)
        .map_err(|e| AuthError::BadIdTokenClaim(format!("identity token header: {e}")))?;

    let jwk = match header.kid.as_deref() {
        Some(kid) => keys.find(kid).ok_or_else(|| {
            AuthError::BadIdTokenClaim(format!("no JWKS key matches kid {kid}"))
        })?,
        None if keys.keys.len() == 1 => &keys.keys[0],
        None => {
            return Err(AuthError::BadIdTokenClaim(
                "identity token header has no kid and the key set is ambiguous".to_string(),
            ))
        }
    };

    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| AuthError::BadIdTokenClaim(format!("JWKS key is unusable: {e}")))?;

    let mut validation = Validation::new(header.alg);
    validation.set_audience(&[client_id]);
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }

    let data = decode::<Value>(token, &key, &validation)
        .map_err(|e| AuthError::BadIdTokenClaim(format!("signature verification failed: {e}")))?;

    Ok(data.claims)
}
