//! Token endpoint response and per-session refresh metadata

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token endpoint response (authorization-code or refresh-token grant).
///
/// Every field is optional at the serde layer; shape requirements are
/// enforced separately so a malformed response produces a protocol error
/// instead of a deserialization failure. Unrecognized fields are retained
/// in `extra` so the whole response can be persisted as user metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token for the user-info endpoint and downstream APIs
    pub access_token: Option<String>,

    /// Identity token (JWT, three dot-separated base64url segments)
    pub id_token: Option<String>,

    /// Token type; must be `Bearer` (case-insensitive) to be accepted
    pub token_type: Option<String>,

    /// Access token lifetime in seconds
    pub expires_in: Option<i64>,

    /// Refresh token, when the provider issues one
    pub refresh_token: Option<String>,

    /// Refresh token lifetime in seconds, when the provider reports it
    pub refresh_expires_in: Option<i64>,

    /// Remaining provider fields, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl TokenResponse {
    /// `token_type` equals `"Bearer"`, case-insensitively.
    #[must_use]
    pub fn is_bearer(&self) -> bool {
        self.token_type.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("bearer"))
    }

    /// The shape contract for a usable response: an identity token plus a
    /// Bearer token type.
    #[must_use]
    pub fn has_valid_shape(&self) -> bool {
        self.id_token.is_some() && self.is_bearer()
    }
}

/// Safety margin subtracted from the provider-side refresh expiry so a
/// renewal attempt completes before the refresh token lapses remotely.
pub const REFRESH_EXPIRY_MARGIN_SECONDS: i64 = 5;

/// Per-session refresh metadata, stored in the session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSession {
    /// Refresh token; `None` once the provider stops issuing one
    pub refresh_token: Option<String>,

    /// Provider-side refresh expiry (already margin-adjusted), when known
    pub refresh_expires_at: Option<DateTime<Utc>>,

    /// Earliest instant the access token must be renewed
    pub next_refresh_at: DateTime<Utc>,
}

impl RefreshSession {
    /// Derive refresh metadata from a token response at `now`.
    #[must_use]
    pub fn from_token_response(response: &TokenResponse, now: DateTime<Utc>) -> Self {
        let next_refresh_at = now + Duration::seconds(response.expires_in.unwrap_or(0));
        let refresh_expires_at = response
            .refresh_expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| now + Duration::seconds(secs - REFRESH_EXPIRY_MARGIN_SECONDS));
        Self { refresh_token: response.refresh_token.clone(), refresh_expires_at, next_refresh_at }
    }

    /// The access token is past its renewal deadline.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_refresh_at
    }

    /// A renewal can still be attempted: a refresh token exists and its
    /// provider-side expiry (when known) has not passed.
    #[must_use]
    pub fn can_renew(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some()
            && self.refresh_expires_at.map_or(true, |deadline| now < deadline)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for domain::token.
    use super::*;

    fn response(expires_in: i64, refresh: Option<&str>, refresh_expires_in: Option<i64>) -> TokenResponse {
        TokenResponse {
            access_token: Some("at".to_string()),
            id_token: Some("h.p.s".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(expires_in),
            refresh_token: refresh.map(str::to_string),
            refresh_expires_in,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_bearer_is_case_insensitive() {
        let mut tr = response(3600, None, None);
        assert!(tr.is_bearer());
        tr.token_type = Some("bearer".to_string());
        assert!(tr.is_bearer());
        tr.token_type = Some("BEARER".to_string());
        assert!(tr.is_bearer());
        tr.token_type = Some("MAC".to_string());
        assert!(!tr.is_bearer());
        tr.token_type = None;
        assert!(!tr.is_bearer());
    }

    #[test]
    fn test_shape_requires_id_token_and_bearer() {
        let mut tr = response(3600, None, None);
        assert!(tr.has_valid_shape());
        tr.id_token = None;
        assert!(!tr.has_valid_shape());
    }

    #[test]
    fn test_unknown_fields_are_retained() {
        let raw = r#"{"access_token":"a","id_token":"h.p.s","token_type":"Bearer",
                      "expires_in":60,"session_state":"abc"}"#;
        let tr: TokenResponse = serde_json::from_str(raw).expect("parse");
        assert_eq!(tr.extra.get("session_state"), Some(&Value::String("abc".to_string())));
    }

    #[test]
    fn test_refresh_session_deadlines() {
        let now = Utc::now();
        let session = RefreshSession::from_token_response(
            &response(300, Some("rt"), Some(3600)),
            now,
        );

        assert_eq!(session.next_refresh_at, now + Duration::seconds(300));
        // Margin-adjusted: 3600 - 5
        assert_eq!(session.refresh_expires_at, Some(now + Duration::seconds(3595)));
        assert!(!session.is_due(now));
        assert!(session.is_due(now + Duration::seconds(300)));
        assert!(session.can_renew(now));
    }

    #[test]
    fn test_refresh_session_without_refresh_token_cannot_renew() {
        let now = Utc::now();
        let session = RefreshSession::from_token_response(&response(60, None, None), now);
        assert!(session.refresh_token.is_none());
        assert!(!session.can_renew(now));
    }

    #[test]
    fn test_refresh_session_expired_refresh_token_cannot_renew() {
        let now = Utc::now();
        let mut session =
            RefreshSession::from_token_response(&response(60, Some("rt"), Some(30)), now);
        assert!(session.can_renew(now));
        session.refresh_expires_at = Some(now - Duration::seconds(1));
        assert!(!session.can_renew(now));
    }

    #[test]
    fn test_nonpositive_refresh_expiry_is_ignored() {
        let now = Utc::now();
        let session = RefreshSession::from_token_response(&response(60, Some("rt"), Some(0)), now);
        assert_eq!(session.refresh_expires_at, None);
    }
}
