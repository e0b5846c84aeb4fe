//! Session/token refresh management
//!
//! Tracks per-session refresh metadata and renews access tokens before
//! they lapse. The check runs on every authenticated request; it is a
//! read-then-write against the session record with no lock. Hosts that
//! need to suppress duplicate refresh attempts under concurrent requests
//! can wrap [`RefreshManager::ensure_fresh`] in a per-session
//! single-flight.

use std::sync::Arc;

use authrelay_domain::{AuthError, OidcConfig, RefreshSession, Result, TokenResponse};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::client::OidcClient;
use crate::events::{AuthEvent, EventSink};
use crate::ports::{SessionStore, UserStore};

/// User-metadata key for the whole last token response.
pub const TOKEN_RESPONSE_META_KEY: &str = "authrelay-last-token-response";
/// User-metadata key for the last identity token claims.
pub const ID_CLAIM_META_KEY: &str = "authrelay-last-id-token-claim";
/// User-metadata key for the last user claims.
pub const USER_CLAIM_META_KEY: &str = "authrelay-last-user-claim";
/// User-metadata key linking a local account to a remote subject identity.
pub const SUBJECT_META_KEY: &str = "authrelay-subject-identity";

/// Keeps authenticated sessions fresh by renewing access tokens.
pub struct RefreshManager {
    config: OidcConfig,
    client: Arc<OidcClient>,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    events: Arc<dyn EventSink>,
}

impl RefreshManager {
    /// Create a refresh manager over the host's stores.
    #[must_use]
    pub fn new(
        config: OidcConfig,
        client: Arc<OidcClient>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { config, client, users, sessions, events }
    }

    /// Record refresh metadata on a freshly created session.
    ///
    /// # Errors
    /// `Store` when the session record cannot be read or written.
    pub async fn record_login(
        &self,
        session_token: &str,
        response: &TokenResponse,
    ) -> Result<()> {
        let mut data = self
            .sessions
            .get_session(session_token)
            .await?
            .ok_or_else(|| AuthError::Store("session vanished before login".to_string()))?;

        data.refresh = Some(RefreshSession::from_token_response(response, Utc::now()));
        self.sessions.update_session(session_token, data).await?;
        debug!("recorded refresh metadata for new session");
        Ok(())
    }

    /// Renew the session's access token when its deadline has passed.
    ///
    /// Called on every authenticated request. A session whose refresh token
    /// is gone or provider-expired is destroyed; `AccessTokenExpired`
    /// surfaces only when the configuration asks for a re-authentication
    /// redirect, otherwise the termination is silent.
    ///
    /// # Errors
    /// - `AccessTokenExpired` when the session cannot self-renew
    /// - `RefreshFailed` when the refresh-token grant fails
    /// - `Store` on session/user store failures
    pub async fn ensure_fresh(&self, session_token: &str) -> Result<()> {
        if !self.config.refresh_enabled {
            return Ok(());
        }

        let Some(data) = self.sessions.get_session(session_token).await? else {
            return Ok(());
        };
        // Sessions without refresh metadata were not established through
        // this core; leave them alone.
        let Some(refresh) = data.refresh.clone() else {
            return Ok(());
        };

        let now = Utc::now();
        if !refresh.is_due(now) {
            return Ok(());
        }

        if !refresh.can_renew(now) {
            warn!(user = %data.user_id, "session can no longer self-renew; terminating");
            self.sessions.destroy_session(session_token).await?;
            self.events.emit(&AuthEvent::SessionExpired { user_id: data.user_id });
            if self.config.redirect_on_expiry {
                return Err(AuthError::AccessTokenExpired);
            }
            return Ok(());
        }

        let refresh_token = refresh.refresh_token.clone().unwrap_or_default();
        match self.client.request_new_tokens(&refresh_token).await {
            Ok(response) => {
                let serialized = serde_json::to_value(&response)
                    .map_err(|e| AuthError::Store(format!("token response serialization: {e}")))?;
                self.users
                    .update_user_metadata(&data.user_id, TOKEN_RESPONSE_META_KEY, serialized)
                    .await?;

                let mut data = data;
                data.refresh = Some(RefreshSession::from_token_response(&response, Utc::now()));
                let user_id = data.user_id.clone();
                self.sessions.update_session(session_token, data).await?;

                info!(user = %user_id, "access token refreshed");
                self.events.emit(&AuthEvent::TokenRefreshed { user_id });
                Ok(())
            }
            Err(err) => {
                warn!(user = %data.user_id, error = %err, "token refresh failed; terminating session");
                self.sessions.destroy_session(session_token).await?;
                self.events.emit(&AuthEvent::SessionExpired { user_id: data.user_id });
                Err(AuthError::RefreshFailed(err.to_string()))
            }
        }
    }

    /// Destroy the local session (host-initiated logout).
    ///
    /// # Errors
    /// `Store` when the session store fails.
    pub async fn logout(&self, session_token: &str) -> Result<()> {
        self.sessions.destroy_session(session_token).await
    }
}
