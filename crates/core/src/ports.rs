//! Port interfaces for the host application's collaborators
//!
//! These traits define the boundaries between the protocol core and the
//! host: transient storage, user accounts, sessions, and outbound HTTP.
//! Adapters live in `authrelay-infra` or in the host itself; in-memory
//! doubles for all of them are in [`crate::testing`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authrelay_domain::{NewUser, RefreshSession, Result, UserRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::claims::ClaimMap;

/// Outcome of a transient-store lookup.
///
/// `Expired` and `Miss` both mean "no usable value", but they are distinct
/// observability events (a lapsed login attempt versus a forged or
/// never-issued key), so the store must report which one happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// An unexpired value exists
    Hit(String),
    /// The key existed but its TTL lapsed
    Expired,
    /// The key was never stored (or already purged)
    Miss,
}

/// Durable key-value store with per-entry TTL, used for anti-forgery state.
#[async_trait]
pub trait TransientStore: Send + Sync {
    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Look up `key`, reporting expired and missing entries distinctly.
    async fn get(&self, key: &str) -> Result<Lookup>;

    /// Remove `key` (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate stored keys beginning with `prefix`, for the GC sweep.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// The host's user/account store.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user by host-side id.
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Fetch the user whose stored subject-identity metadata equals
    /// `subject`.
    async fn find_by_subject(&self, subject: &str) -> Result<Option<UserRecord>>;

    /// Provision a new account.
    async fn create_user(&self, attrs: NewUser) -> Result<UserRecord>;

    /// Write one metadata value for a user.
    async fn update_user_metadata(&self, user_id: &str, key: &str, value: Value) -> Result<()>;

    /// Read one metadata value for a user.
    async fn get_user_metadata(&self, user_id: &str, key: &str) -> Result<Option<Value>>;

    /// A user with this login name exists.
    async fn username_exists(&self, username: &str) -> Result<bool>;

    /// The user id owning this email address, when one exists.
    async fn email_exists(&self, email: &str) -> Result<Option<String>>;
}

/// Data carried by one local session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    /// Owning local user id
    pub user_id: String,
    /// Refresh metadata; `None` for sessions not established through OIDC
    pub refresh: Option<RefreshSession>,
}

/// The host's session store.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for `user_id` and return its opaque token.
    async fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String>;

    /// Fetch session data by token.
    async fn get_session(&self, token: &str) -> Result<Option<SessionData>>;

    /// Replace session data.
    async fn update_session(&self, token: &str, data: SessionData) -> Result<()>;

    /// Destroy the session (idempotent).
    async fn destroy_session(&self, token: &str) -> Result<()>;
}

/// Which protocol call an outbound request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Authorization-code grant against the token endpoint
    TokenExchange,
    /// Refresh-token grant against the token endpoint
    TokenRefresh,
    /// User-info fetch
    UserInfo,
    /// JWKS document fetch
    JwksFetch,
}

impl Operation {
    /// Stable operation name, for logs and request mutators.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TokenExchange => "token-exchange",
            Self::TokenRefresh => "token-refresh",
            Self::UserInfo => "user-info",
            Self::JwksFetch => "jwks-fetch",
        }
    }
}

/// HTTP method for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET (JWKS fetch only)
    Get,
    /// POST with a form-encoded body
    Post,
}

/// One outbound HTTP request, fully described before dispatch.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Protocol operation this request serves
    pub operation: Operation,
    /// HTTP method
    pub method: HttpMethod,
    /// Absolute URL
    pub url: String,
    /// Headers, applied in order (may include an explicit `Host`)
    pub headers: Vec<(String, String)>,
    /// Form-encoded body fields (POST only)
    pub form: Vec<(String, String)>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Verify TLS certificates for this request
    pub tls_verify: bool,
}

/// Response from an outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, possibly empty
    pub body: String,
}

impl HttpResponse {
    /// Status is in the 2xx range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP client.
///
/// Implementations report transport failures as
/// `AuthError::TokenRequestFailed`; callers re-wrap per operation where the
/// taxonomy demands a different kind.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// Dispatch one request.
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse>;
}

/// Pure request transformer applied before each outbound call.
///
/// Mutators run in registration order; each receives the request built so
/// far plus the operation and returns the (possibly modified) request.
pub type RequestMutator = Arc<dyn Fn(OutboundRequest, Operation) -> OutboundRequest + Send + Sync>;

/// Pluggable authorization policy consulted after claim validation.
pub trait ClaimAuthorizer: Send + Sync {
    /// `true` when the subject behind these claims may log in.
    fn authorize(&self, user_claims: &ClaimMap) -> bool;
}

/// Default policy: every validated claim set may log in.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ClaimAuthorizer for AllowAll {
    fn authorize(&self, _user_claims: &ClaimMap) -> bool {
        true
    }
}
