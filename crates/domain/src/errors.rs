//! Error types used throughout the authentication core
//!
//! Every expected protocol failure is a value of [`AuthError`]; the
//! orchestrator converts the value into a `login-error=<code>` redirect.
//! Panics are reserved for programmer mistakes, never for provider input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for authrelay
///
/// One variant per failure kind the protocol can produce, so callers can
/// match on the exact condition instead of parsing strings.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail")]
pub enum AuthError {
    /// The identity provider reported an error in the callback or a body
    #[error("provider error: {code}{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
    ProviderError {
        /// Provider error code (e.g. `access_denied`)
        code: String,
        /// Optional human-readable description from the provider
        description: Option<String>,
    },

    /// Callback carried no `code` parameter
    #[error("no authorization code present in the callback")]
    MissingCode,

    /// Callback carried no `state` parameter
    #[error("no anti-forgery state present in the callback")]
    MissingState,

    /// The `state` value does not match an unexpired issued state
    #[error("invalid or expired anti-forgery state")]
    InvalidState,

    /// Transport failure while talking to the token endpoint
    #[error("token request failed: {0}")]
    TokenRequestFailed(String),

    /// Token endpoint answered with an empty body
    #[error("token endpoint response had no body")]
    MissingTokenBody,

    /// Token endpoint body was not valid JSON
    #[error("token endpoint body is not valid JSON: {0}")]
    InvalidTokenFormat(String),

    /// Token response is missing `id_token` or carries a non-Bearer type
    #[error("token response violates the expected shape")]
    InvalidTokenResponse,

    /// Token response carried no identity token at claim-extraction time
    #[error("no identity token in the token response")]
    NoIdentityToken,

    /// Identity token had fewer than two dot-separated segments
    #[error("identity token is not a decodable JWT")]
    MissingIdentityToken,

    /// Identity token payload did not decode to a claim object
    #[error("bad identity token claim: {0}")]
    BadIdTokenClaim(String),

    /// Identity token claims carry no usable `sub`
    #[error("no subject identity in the identity token claims")]
    NoSubjectIdentity,

    /// User-info endpoint errored or returned no body
    #[error("could not obtain user claim: {0}")]
    BadClaim(String),

    /// User claim is malformed or carries a provider error
    #[error("invalid user claim{}", .0.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
    InvalidUserClaim(Option<String>),

    /// User claim subject does not match the identity token subject
    #[error("user claim subject does not match the identity token subject")]
    IncorrectUserClaim,

    /// The authorization policy rejected the claim
    #[error("subject is not authorized to log in")]
    Unauthorized,

    /// Subject identity conflicts with an existing account link
    #[error("subject identity is already linked to a different account")]
    LinkError,

    /// Subject identity is not linked and linking/creation is disabled
    #[error("identity is not linked to an existing account")]
    IdentityNotLinked,

    /// The user store refused to create the account
    #[error("user creation failed: {0}")]
    UserCreationFailed(String),

    /// No username could be derived from the claims
    #[error("no username could be derived from the claims")]
    NoUsername,

    /// No nickname could be derived from the claims
    #[error("no nickname could be derived from the claims")]
    NoNickname,

    /// Required synthesized fields are still missing after a re-fetch
    #[error("user claim is missing required fields")]
    IncompleteUserClaim,

    /// Session can no longer self-renew; re-authentication required
    #[error("access token expired and cannot be refreshed")]
    AccessTokenExpired,

    /// A refresh-token grant failed
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The system randomness source failed (PKCE degrades, never aborts)
    #[error("system randomness source unavailable")]
    RandomnessUnavailable,

    /// Configuration is missing or inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// A collaborator store failed
    #[error("store error: {0}")]
    Store(String),
}

impl AuthError {
    /// Stable machine-readable code carried in the `login-error` redirect
    /// parameter.
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::ProviderError { code, .. } => code.clone(),
            Self::MissingCode => "missing-code".into(),
            Self::MissingState => "missing-state".into(),
            Self::InvalidState => "invalid-state".into(),
            Self::TokenRequestFailed(_) => "token-request-failed".into(),
            Self::MissingTokenBody => "missing-token-body".into(),
            Self::InvalidTokenFormat(_) => "invalid-token-format".into(),
            Self::InvalidTokenResponse => "invalid-token-response".into(),
            Self::NoIdentityToken => "no-identity-token".into(),
            Self::MissingIdentityToken => "missing-identity-token".into(),
            Self::BadIdTokenClaim(_) => "bad-id-token-claim".into(),
            Self::NoSubjectIdentity => "no-subject-identity".into(),
            Self::BadClaim(_) => "bad-claim".into(),
            Self::InvalidUserClaim(Some(code)) => format!("invalid-user-claim-{code}"),
            Self::InvalidUserClaim(None) => "invalid-user-claim".into(),
            Self::IncorrectUserClaim => "incorrect-user-claim".into(),
            Self::Unauthorized => "unauthorized".into(),
            Self::LinkError => "link-error".into(),
            Self::IdentityNotLinked => "identity-not-linked".into(),
            Self::UserCreationFailed(_) => "user-creation-failed".into(),
            Self::NoUsername => "no-username".into(),
            Self::NoNickname => "no-nickname".into(),
            Self::IncompleteUserClaim => "incomplete-user-claim".into(),
            Self::AccessTokenExpired => "access-token-expired".into(),
            Self::RefreshFailed(_) => "refresh-failed".into(),
            Self::RandomnessUnavailable => "randomness-unavailable".into(),
            Self::Config(_) => "configuration".into(),
            Self::Store(_) => "store".into(),
        }
    }
}

/// Result type alias for authrelay operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    //! Unit tests for domain::errors.
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(AuthError::MissingCode.error_code(), "missing-code");
        assert_eq!(AuthError::InvalidState.error_code(), "invalid-state");
        assert_eq!(AuthError::AccessTokenExpired.error_code(), "access-token-expired");
        assert_eq!(AuthError::IdentityNotLinked.error_code(), "identity-not-linked");
    }

    #[test]
    fn test_provider_error_passes_code_through() {
        let err = AuthError::ProviderError {
            code: "access_denied".to_string(),
            description: Some("user cancelled".to_string()),
        };
        assert_eq!(err.error_code(), "access_denied");
        assert!(err.to_string().contains("user cancelled"));
    }

    #[test]
    fn test_invalid_user_claim_carries_provider_code() {
        let err = AuthError::InvalidUserClaim(Some("insufficient_scope".to_string()));
        assert_eq!(err.error_code(), "invalid-user-claim-insufficient_scope");

        let bare = AuthError::InvalidUserClaim(None);
        assert_eq!(bare.error_code(), "invalid-user-claim");
    }

    #[test]
    fn test_error_serialization_round_trip() {
        let err = AuthError::TokenRequestFailed("connection refused".to_string());
        let json = serde_json::to_string(&err).expect("serialize");
        let back: AuthError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, err);
    }
}
