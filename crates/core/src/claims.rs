//! Claim decoding, lookup, and account-attribute synthesis
//!
//! The identity token payload is decoded without signature verification in
//! the default configuration; the claims are trusted because they arrive
//! over TLS directly from the token endpoint. Opt-in JWKS verification
//! lives in [`crate::jwks`].
//!
//! Aggregated claims (`_claim_names` / `_claim_sources` carrying embedded
//! JWTs) are dereferenced one level on lookup; the embedded tokens are
//! never signature-checked.

use authrelay_domain::{AuthError, NewUser, OidcConfig, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;

/// A decoded claim object.
pub type ClaimMap = serde_json::Map<String, Value>;

/// Decode the payload segment of a JWT without verifying its signature.
///
/// # Errors
/// - `MissingIdentityToken` when the token has fewer than two dot-separated
///   segments
/// - `BadIdTokenClaim` when the payload is not base64url or not JSON
pub fn decode_jwt_payload(token: &str) -> Result<Value> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next()) {
        (Some(_), Some(payload)) => payload,
        _ => return Err(AuthError::MissingIdentityToken),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        // Tolerate padded emitters
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| AuthError::BadIdTokenClaim(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::BadIdTokenClaim(format!("payload is not JSON: {e}")))
}

/// Validate decoded identity-token claims and borrow them as a map.
///
/// # Errors
/// - `BadIdTokenClaim` when the payload is not a JSON object
/// - `NoSubjectIdentity` when `sub` is missing or empty
pub fn validate_id_token_claims(claims: &Value) -> Result<&ClaimMap> {
    let map = claims
        .as_object()
        .ok_or_else(|| AuthError::BadIdTokenClaim("claims are not an object".to_string()))?;

    match map.get("sub").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => Ok(map),
        _ => Err(AuthError::NoSubjectIdentity),
    }
}

/// Look up a claim by name, following one level of aggregated-claim
/// indirection.
///
/// Direct members win. Otherwise `_claim_names[name]` may point at a source
/// in `_claim_sources`; when that source carries a `JWT`, its payload
/// segment is decoded (unverified) and searched.
#[must_use]
pub fn get_claim(name: &str, claims: &ClaimMap) -> Option<Value> {
    if let Some(value) = claims.get(name) {
        return Some(value.clone());
    }

    let source_key = claims.get("_claim_names")?.as_object()?.get(name)?.as_str()?;
    let source = claims.get("_claim_sources")?.as_object()?.get(source_key)?.as_object()?;
    let jwt = source.get("JWT")?.as_str()?;

    let payload = decode_jwt_payload(jwt).ok()?;
    payload.as_object()?.get(name).cloned()
}

/// Expand a claim-format template such as `"{given_name} {family_name}"`.
///
/// Each `{key}` token is replaced by the claim's string rendition
/// (aggregation-aware); unknown keys expand to nothing. Literal text is
/// preserved.
#[must_use]
pub fn format_claim_string(template: &str, claims: &ClaimMap) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                if let Some(value) = get_claim(key, claims) {
                    out.push_str(&claim_to_string(&value));
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unbalanced brace: keep the remainder verbatim
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn claim_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Synthesize account attributes from validated user claims.
///
/// The username comes from the configured template, falling back to the
/// identity claim key and finally to the email local part. The nickname
/// claim is required; email and display name are optional, with the
/// display name falling back to the username.
///
/// # Errors
/// - `NoUsername` when no template or fallback yields a username
/// - `NoNickname` when the nickname claim is absent
pub fn derive_user_attributes(config: &OidcConfig, claims: &ClaimMap) -> Result<NewUser> {
    let email = {
        let formatted = format_claim_string(&config.email_format, claims);
        let trimmed = formatted.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    };

    let mut username = format_claim_string(&config.username_format, claims).trim().to_string();
    if username.is_empty() {
        username = get_claim(&config.identity_claim_key, claims)
            .map(|v| claim_to_string(&v).trim().to_string())
            .unwrap_or_default();
    }
    if username.is_empty() {
        if let Some(email) = email.as_deref() {
            username = email.split('@').next().unwrap_or_default().to_string();
        }
    }
    if username.is_empty() {
        return Err(AuthError::NoUsername);
    }

    let nickname = match get_claim(&config.nickname_claim_key, claims) {
        Some(value) => {
            let nickname = claim_to_string(&value).trim().to_string();
            if nickname.is_empty() {
                return Err(AuthError::NoNickname);
            }
            nickname
        }
        None => return Err(AuthError::NoNickname),
    };

    let display_name = {
        let formatted = format_claim_string(&config.displayname_format, claims);
        let collapsed = formatted.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() { username.clone() } else { collapsed }
    };

    Ok(NewUser { username, email, display_name: Some(display_name), nickname: Some(nickname) })
}
