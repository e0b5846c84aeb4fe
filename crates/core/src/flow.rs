//! Authentication callback orchestration
//!
//! The state machine driven when the identity provider redirects back:
//! validate the request, exchange the code, validate the token, extract and
//! validate claims, resolve or provision the local user, establish the
//! session, and redirect. Any error jumps straight to the failure path,
//! which logs, emits `login-failed`, and answers with a redirect to the
//! login entry point carrying `login-error=<code>&message=<description>`.
//! Nothing executes after a failure.

use std::sync::Arc;
use std::time::Duration;

use authrelay_domain::{AuthError, NewUser, OidcConfig, Result, TokenResponse, UserRecord};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::claims::{self, ClaimMap};
use crate::client::{AuthUrlOverrides, CallbackParams, OidcClient};
use crate::events::{AuthEvent, EventSink};
use crate::ports::{SessionStore, UserStore};
use crate::session::{
    RefreshManager, ID_CLAIM_META_KEY, SUBJECT_META_KEY, TOKEN_RESPONSE_META_KEY,
    USER_CLAIM_META_KEY,
};

/// Outcome of a completed login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    /// The resolved or provisioned local user
    pub user: UserRecord,
    /// Token for the established session
    pub session_token: String,
    /// Post-login redirect target
    pub redirect_to: String,
}

/// Top-level orchestrator for the authorization-code callback.
pub struct CallbackOrchestrator {
    config: OidcConfig,
    client: Arc<OidcClient>,
    refresh: Arc<RefreshManager>,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    events: Arc<dyn EventSink>,
}

impl CallbackOrchestrator {
    /// Assemble the orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        config: OidcConfig,
        client: Arc<OidcClient>,
        refresh: Arc<RefreshManager>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { config, client, refresh, users, sessions, events }
    }

    /// Build an authorization URL for a new login attempt (embeddable entry
    /// point).
    ///
    /// # Errors
    /// See [`OidcClient::build_authorization_url`].
    pub async fn build_authorization_url(&self, overrides: &AuthUrlOverrides) -> Result<String> {
        self.client.build_authorization_url(overrides).await
    }

    /// Handle the provider callback and produce the redirect that
    /// terminates the request.
    ///
    /// Success redirects to the resolved post-login target; any failure
    /// redirects to the login entry point with `login-error` and `message`
    /// query parameters. The host must issue the returned redirect and stop
    /// processing.
    pub async fn handle_callback(
        &self,
        params: &CallbackParams,
        current_session: Option<&str>,
        cookie_redirect: Option<&str>,
    ) -> String {
        match self.run_callback(params, current_session, cookie_redirect).await {
            Ok(success) => {
                info!(user = %success.user.id, "login completed");
                self.events.emit(&AuthEvent::LoginSuccess { user_id: success.user.id.clone() });
                success.redirect_to
            }
            Err(err) => {
                error!(code = %err.error_code(), error = %err, "authentication callback failed");
                self.events.emit(&AuthEvent::LoginFailed { code: err.error_code() });
                self.error_redirect(&err)
            }
        }
    }

    /// Run the callback state machine, surfacing the error instead of
    /// converting it to a redirect.
    ///
    /// # Errors
    /// Every kind in the protocol taxonomy, as produced by the individual
    /// steps.
    pub async fn run_callback(
        &self,
        params: &CallbackParams,
        current_session: Option<&str>,
        cookie_redirect: Option<&str>,
    ) -> Result<LoginSuccess> {
        self.client.validate_authorization_callback(params).await?;
        debug!(step = "request-validated", "callback accepted");

        let code = self.client.extract_code(params)?;
        // validate_authorization_callback guarantees a state is present
        let state_id = params.state.as_deref().unwrap_or_default();
        let state_payload = self.client.states().get(state_id).await?.unwrap_or_default();
        debug!(step = "state-obtained", "state payload recovered");

        let token_response = self.client.exchange_code_for_token(code, state_id).await?;
        // The exchange reads the verifier from the entry, so consumption
        // must wait until after it
        if self.config.consume_state_on_use {
            self.client.states().consume(state_id).await?;
        }
        debug!(step = "token-exchanged", "code exchanged");

        self.client.validate_token_response(&token_response)?;

        let id_value = self.client.extract_id_token_claims(&token_response).await?;
        let id_claims = claims::validate_id_token_claims(&id_value)?.clone();
        debug!(step = "id-claim-validated", "identity claims accepted");

        let user_value = self.client.fetch_user_claims(&token_response, &id_claims).await?;
        let user_claims = self.client.validate_user_claims(&user_value, &id_claims)?;
        debug!(step = "user-claim-validated", "user claims accepted");

        let subject = self.client.resolve_subject_identity(&id_claims)?;

        let (user, user_claims) = self
            .resolve_user(&subject, user_claims, &id_claims, &token_response, current_session)
            .await?;
        debug!(step = "user-validated", user = %user.id, "local user resolved");

        self.persist_login_metadata(&user.id, &subject, &token_response, &id_claims, &user_claims)
            .await?;

        let session_token = self
            .sessions
            .create_session(&user.id, Duration::from_secs(self.config.session_ttl_seconds))
            .await?;
        self.refresh.record_login(&session_token, &token_response).await?;

        let redirect_to = self.post_login_redirect(params, &state_payload.redirect_to, cookie_redirect);

        Ok(LoginSuccess { user, session_token, redirect_to })
    }

    /// Resolve the local account for a remote subject identity.
    ///
    /// Returns the user plus the (possibly re-fetched) user claims so the
    /// caller persists the freshest copy.
    async fn resolve_user(
        &self,
        subject: &str,
        user_claims: ClaimMap,
        id_claims: &ClaimMap,
        token_response: &TokenResponse,
        current_session: Option<&str>,
    ) -> Result<(UserRecord, ClaimMap)> {
        let linked = self.users.find_by_subject(subject).await?;

        let session_user_id = match current_session {
            Some(token) => self.sessions.get_session(token).await?.map(|d| d.user_id),
            None => None,
        };

        if let Some(user) = linked {
            // A concurrent session authenticated as someone else must not
            // capture this identity.
            if session_user_id.as_deref().is_some_and(|id| id != user.id) {
                return Err(AuthError::LinkError);
            }
            return Ok((user, user_claims));
        }

        if let Some(user_id) = session_user_id {
            let user = self.link_subject_to_user(&user_id, subject).await?;
            return Ok((user, user_claims));
        }

        if self.config.link_by_email {
            let email = claims::format_claim_string(&self.config.email_format, &user_claims);
            let email = email.trim();
            if !email.is_empty() {
                if let Some(user_id) = self.users.email_exists(email).await? {
                    let user = self.link_subject_to_user(&user_id, subject).await?;
                    return Ok((user, user_claims));
                }
            }
        }

        if self.config.create_user_if_missing {
            return self.provision_user(subject, user_claims, id_claims, token_response).await;
        }

        Err(AuthError::IdentityNotLinked)
    }

    /// Claim an unlinked identity for an existing account, refusing when
    /// the account already carries a different subject.
    async fn link_subject_to_user(&self, user_id: &str, subject: &str) -> Result<UserRecord> {
        match self.users.get_user_metadata(user_id, SUBJECT_META_KEY).await? {
            Some(Value::String(existing)) if !existing.is_empty() && existing != subject => {
                Err(AuthError::LinkError)
            }
            _ => {
                let user = self
                    .users
                    .find_by_id(user_id)
                    .await?
                    .ok_or_else(|| AuthError::Store("linked user record missing".to_string()))?;
                self.users
                    .update_user_metadata(user_id, SUBJECT_META_KEY, Value::String(subject.into()))
                    .await?;
                info!(user = %user_id, "linked subject identity to existing account");
                self.events.emit(&AuthEvent::IdentityLinked {
                    user_id: user_id.to_string(),
                    subject: subject.to_string(),
                });
                Ok(user)
            }
        }
    }

    /// Provision a new local account from the claims.
    ///
    /// When attribute synthesis fails on the first pass and a user-info
    /// endpoint is available, the user claims are fetched once more (the
    /// required fields may only appear there); a second failure surfaces
    /// `IncompleteUserClaim`.
    async fn provision_user(
        &self,
        subject: &str,
        user_claims: ClaimMap,
        id_claims: &ClaimMap,
        token_response: &TokenResponse,
    ) -> Result<(UserRecord, ClaimMap)> {
        let mut effective_claims = user_claims;
        let attrs = match claims::derive_user_attributes(&self.config, &effective_claims) {
            Ok(attrs) => attrs,
            Err(first_error @ (AuthError::NoUsername | AuthError::NoNickname)) => {
                if self.config.userinfo_endpoint.is_none() {
                    return Err(first_error);
                }
                debug!("required fields missing; re-fetching user claims");
                let refetched =
                    self.client.fetch_user_claims(token_response, id_claims).await?;
                effective_claims = self.client.validate_user_claims(&refetched, id_claims)?;
                claims::derive_user_attributes(&self.config, &effective_claims)
                    .map_err(|_| AuthError::IncompleteUserClaim)?
            }
            Err(other) => return Err(other),
        };

        let username = self.dedupe_username(&attrs.username).await?;
        let attrs = NewUser { username, ..attrs };

        let user = self
            .users
            .create_user(attrs)
            .await
            .map_err(|e| AuthError::UserCreationFailed(e.to_string()))?;
        self.users
            .update_user_metadata(&user.id, SUBJECT_META_KEY, Value::String(subject.into()))
            .await?;

        info!(user = %user.id, username = %user.username, "provisioned new account from claims");
        self.events.emit(&AuthEvent::UserCreated {
            user_id: user.id.clone(),
            username: user.username.clone(),
        });

        Ok((user, effective_claims))
    }

    /// Append a numeric suffix until the username is free: `name`, `name2`,
    /// `name3`, ...
    async fn dedupe_username(&self, desired: &str) -> Result<String> {
        if !self.users.username_exists(desired).await? {
            return Ok(desired.to_string());
        }
        let mut counter = 2u32;
        loop {
            let candidate = format!("{desired}{counter}");
            if !self.users.username_exists(&candidate).await? {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    async fn persist_login_metadata(
        &self,
        user_id: &str,
        subject: &str,
        token_response: &TokenResponse,
        id_claims: &ClaimMap,
        user_claims: &ClaimMap,
    ) -> Result<()> {
        let response_value = serde_json::to_value(token_response)
            .map_err(|e| AuthError::Store(format!("token response serialization: {e}")))?;
        self.users
            .update_user_metadata(user_id, TOKEN_RESPONSE_META_KEY, response_value)
            .await?;
        self.users
            .update_user_metadata(user_id, ID_CLAIM_META_KEY, Value::Object(id_claims.clone()))
            .await?;
        self.users
            .update_user_metadata(user_id, USER_CLAIM_META_KEY, Value::Object(user_claims.clone()))
            .await?;
        self.users
            .update_user_metadata(user_id, SUBJECT_META_KEY, Value::String(subject.to_string()))
            .await?;
        Ok(())
    }

    /// Post-login redirect priority: explicit request override, then the
    /// redirect captured at state creation, then the (deprecated) cookie
    /// override, then home.
    fn post_login_redirect(
        &self,
        params: &CallbackParams,
        state_redirect: &str,
        cookie_redirect: Option<&str>,
    ) -> String {
        if let Some(target) = params.redirect_to.as_deref().filter(|t| !t.is_empty()) {
            return target.to_string();
        }
        if !state_redirect.is_empty() {
            return state_redirect.to_string();
        }
        if let Some(target) = cookie_redirect.filter(|t| !t.is_empty()) {
            return target.to_string();
        }
        self.config.home_url.clone()
    }

    fn error_redirect(&self, err: &AuthError) -> String {
        let separator = if self.config.login_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}login-error={}&message={}",
            self.config.login_url,
            urlencoding::encode(&err.error_code()),
            urlencoding::encode(&err.to_string()),
        )
    }
}
