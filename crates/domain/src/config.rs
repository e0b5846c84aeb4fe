//! Typed relying-party configuration
//!
//! The host application's settings store is a property bag; this module is
//! the explicit, typed rendition of it. Every knob has a working default,
//! and [`OidcConfig::validate`] catches inconsistent setups before any
//! protocol step runs.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{AuthError, Result};

/// How the identity token payload is treated before its claims are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum IdTokenVerification {
    /// Decode the payload segment without verifying the signature.
    ///
    /// This is the default. The claims are trusted because they were
    /// fetched over TLS directly from the token endpoint, not because the
    /// token is signed.
    DecodeOnly,

    /// Verify the signature against the provider's published JWKS document
    /// before accepting any claim.
    Jwks {
        /// URL of the provider's JWKS document
        jwks_uri: String,
        /// Expected `iss` value; skipped when `None`
        issuer: Option<String>,
    },
}

/// Relying-party configuration for one identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// OAuth2 client identifier
    pub client_id: String,

    /// OAuth2 client secret (empty for public clients)
    pub client_secret: String,

    /// Requested scopes, space-separated (e.g. `"openid email profile"`)
    pub scope: String,

    /// Provider authorization endpoint
    pub authorization_endpoint: String,

    /// Provider token endpoint
    pub token_endpoint: String,

    /// Provider user-info endpoint; when `None` the identity token claims
    /// double as the user claims
    pub userinfo_endpoint: Option<String>,

    /// Provider end-session endpoint for RP-initiated logout
    pub end_session_endpoint: Option<String>,

    /// Redirect URI registered with the provider
    pub redirect_uri: String,

    /// Login entry point; failures redirect here with `login-error=<code>`
    pub login_url: String,

    /// Default post-login redirect target
    pub home_url: String,

    /// Optional `acr_values` forwarded on the authorization request
    pub acr_values: Option<String>,

    /// Send a PKCE challenge with the authorization request
    pub enable_pkce: bool,

    /// Anti-forgery state lifetime in seconds
    pub state_ttl_seconds: u64,

    /// Local session lifetime in seconds
    pub session_ttl_seconds: u64,

    /// Delete state on first successful validation instead of leaving it
    /// readable until the TTL lapses
    pub consume_state_on_use: bool,

    /// Outbound HTTP timeout in seconds, applied uniformly
    pub http_timeout_seconds: u64,

    /// Verify TLS certificates on outbound requests
    pub tls_verify: bool,

    /// Renew access tokens transparently during a session
    pub refresh_enabled: bool,

    /// Surface `AccessTokenExpired` to the caller (so it can redirect to
    /// re-authentication) instead of terminating the session silently
    pub redirect_on_expiry: bool,

    /// Identity token treatment before claims are trusted
    pub id_token_verification: IdTokenVerification,

    /// Claim used as the durable identity key when formatting usernames
    pub identity_claim_key: String,

    /// Claim used for the account nickname
    pub nickname_claim_key: String,

    /// Template for the account email, e.g. `"{email}"`
    pub email_format: String,

    /// Template for the account username
    pub username_format: String,

    /// Template for the account display name
    pub displayname_format: String,

    /// Attach an unlinked identity to an existing account with the same
    /// email address
    pub link_by_email: bool,

    /// Create a local account when the identity is not linked anywhere
    pub create_user_if_missing: bool,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            scope: "openid email profile".to_string(),
            authorization_endpoint: String::new(),
            token_endpoint: String::new(),
            userinfo_endpoint: None,
            end_session_endpoint: None,
            redirect_uri: String::new(),
            login_url: String::new(),
            home_url: String::new(),
            acr_values: None,
            enable_pkce: true,
            state_ttl_seconds: 180,
            session_ttl_seconds: 14 * 24 * 60 * 60,
            consume_state_on_use: false,
            http_timeout_seconds: 5,
            tls_verify: true,
            refresh_enabled: true,
            redirect_on_expiry: true,
            id_token_verification: IdTokenVerification::DecodeOnly,
            identity_claim_key: "preferred_username".to_string(),
            nickname_claim_key: "nickname".to_string(),
            email_format: "{email}".to_string(),
            username_format: "{preferred_username}".to_string(),
            displayname_format: "{given_name} {family_name}".to_string(),
            link_by_email: true,
            create_user_if_missing: false,
        }
    }
}

impl OidcConfig {
    /// Check that the configuration can drive a login at all.
    ///
    /// # Errors
    /// Returns `AuthError::Config` naming the first missing or malformed
    /// field.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(AuthError::Config("client_id is not set".to_string()));
        }
        for (name, value) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("redirect_uri", &self.redirect_uri),
        ] {
            if value.is_empty() {
                return Err(AuthError::Config(format!("{name} is not set")));
            }
            Url::parse(value)
                .map_err(|e| AuthError::Config(format!("{name} is not a valid URL: {e}")))?;
        }
        Ok(())
    }

    /// Host portion of the token endpoint, for explicit `Host` headers on
    /// reverse-proxied deployments.
    #[must_use]
    pub fn token_endpoint_host(&self) -> Option<String> {
        host_of(&self.token_endpoint)
    }

    /// Host portion of the user-info endpoint, when one is configured.
    #[must_use]
    pub fn userinfo_endpoint_host(&self) -> Option<String> {
        self.userinfo_endpoint.as_deref().and_then(host_of)
    }
}

fn host_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}
