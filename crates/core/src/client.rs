//! OIDC relying-party client
//!
//! Stateless given configuration: builds authorization URLs, validates
//! callback parameters, exchanges authorization codes and refresh tokens,
//! fetches user-info, and performs the protocol-level validation chain.
//! Every outbound request passes through the registered request mutators
//! before dispatch.

use std::sync::Arc;

use authrelay_domain::{AuthError, IdTokenVerification, OidcConfig, Result, TokenResponse};
use serde_json::Value;
use tracing::{debug, warn};

use crate::claims::{self, ClaimMap};
use crate::events::{AuthEvent, EventSink};
use crate::jwks;
use crate::pkce::{PkceChallenge, CHALLENGE_METHOD};
use crate::ports::{
    AllowAll, ClaimAuthorizer, HttpClientPort, HttpMethod, Operation, OutboundRequest,
    RequestMutator,
};
use crate::state::StateStore;

/// Query parameters of an authorization callback.
///
/// Exactly the parameters the provider round-trips: `code`, `state`,
/// optional `error` / `error_description`, plus the host's own optional
/// `redirect_to` override.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Anti-forgery state id
    pub state: Option<String>,
    /// Provider error code, when the provider rejected the request
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
    /// Explicit post-login redirect override from the host
    pub redirect_to: Option<String>,
}

impl CallbackParams {
    /// Build from decoded query pairs; unknown keys are ignored.
    #[must_use]
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key {
                "code" => params.code = Some(value.to_string()),
                "state" => params.state = Some(value.to_string()),
                "error" => params.error = Some(value.to_string()),
                "error_description" => params.error_description = Some(value.to_string()),
                "redirect_to" => params.redirect_to = Some(value.to_string()),
                _ => {}
            }
        }
        params
    }
}

/// Per-request overrides for [`OidcClient::build_authorization_url`].
#[derive(Debug, Clone, Default)]
pub struct AuthUrlOverrides {
    /// Post-login redirect target to capture in the state entry
    pub redirect_to: Option<String>,
    /// Scope override for this request
    pub scope: Option<String>,
    /// `acr_values` override for this request
    pub acr_values: Option<String>,
}

/// OIDC client for one configured identity provider.
pub struct OidcClient {
    config: OidcConfig,
    http: Arc<dyn HttpClientPort>,
    states: Arc<StateStore>,
    events: Arc<dyn EventSink>,
    authorizer: Arc<dyn ClaimAuthorizer>,
    mutators: Vec<RequestMutator>,
}

impl OidcClient {
    /// Create a client with the default (allow-all) authorization policy
    /// and no request mutators.
    #[must_use]
    pub fn new(
        config: OidcConfig,
        http: Arc<dyn HttpClientPort>,
        states: Arc<StateStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { config, http, states, events, authorizer: Arc::new(AllowAll), mutators: Vec::new() }
    }

    /// Replace the claim authorization policy.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn ClaimAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Append a request mutator; mutators run in registration order.
    #[must_use]
    pub fn with_mutator(mut self, mutator: RequestMutator) -> Self {
        self.mutators.push(mutator);
        self
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// The state store this client mints and validates state against.
    #[must_use]
    pub fn states(&self) -> &Arc<StateStore> {
        &self.states
    }

    /// Build the provider authorization URL for a new login attempt.
    ///
    /// Emits `response_type=code`, `scope`, `client_id`, `state`,
    /// `redirect_uri`, optional `acr_values`, and, when PKCE is enabled and
    /// generation succeeds, `code_challenge` + `code_challenge_method`. A
    /// failing randomness source degrades to a plain code flow instead of
    /// aborting.
    ///
    /// # Errors
    /// Returns `Config` on invalid configuration and store errors from
    /// state creation.
    pub async fn build_authorization_url(&self, overrides: &AuthUrlOverrides) -> Result<String> {
        self.config.validate()?;

        let pkce = if self.config.enable_pkce {
            match PkceChallenge::generate() {
                Ok(challenge) => Some(challenge),
                Err(AuthError::RandomnessUnavailable) => {
                    warn!("randomness source failed; proceeding without PKCE");
                    None
                }
                Err(other) => return Err(other),
            }
        } else {
            None
        };

        let redirect_to = overrides.redirect_to.as_deref().unwrap_or_default();
        let code_verifier = pkce.as_ref().map_or("", |c| c.code_verifier.as_str());
        let state_id = self.states.new_state(redirect_to, code_verifier).await?;

        let scope = overrides.scope.as_deref().unwrap_or(&self.config.scope);
        let acr_values =
            overrides.acr_values.as_deref().or(self.config.acr_values.as_deref());

        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("scope", scope),
            ("client_id", &self.config.client_id),
            ("state", &state_id),
            ("redirect_uri", &self.config.redirect_uri),
        ];
        if let Some(acr) = acr_values {
            params.push(("acr_values", acr));
        }
        if let Some(challenge) = pkce.as_ref() {
            params.push(("code_challenge", &challenge.code_challenge));
            params.push(("code_challenge_method", CHALLENGE_METHOD));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator =
            if self.config.authorization_endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{}{separator}{query}", self.config.authorization_endpoint);

        debug!(state = %state_id, pkce = pkce.is_some(), "built authorization URL");
        Ok(url)
    }

    /// Validate the incoming callback parameters.
    ///
    /// # Errors
    /// - `ProviderError` when the provider reported an error
    /// - `MissingCode` / `MissingState` on absent parameters
    /// - `InvalidState` when the state id does not validate
    pub async fn validate_authorization_callback(&self, params: &CallbackParams) -> Result<()> {
        if let Some(code) = &params.error {
            return Err(AuthError::ProviderError {
                code: code.clone(),
                description: params.error_description.clone(),
            });
        }

        if params.code.as_deref().map_or(true, str::is_empty) {
            return Err(AuthError::MissingCode);
        }

        match params.state.as_deref() {
            None | Some("") => {
                warn!("callback carried no state parameter");
                self.events.emit(&AuthEvent::NoStateProvided);
                Err(AuthError::MissingState)
            }
            Some(state_id) => {
                if self.states.check(state_id).await? {
                    Ok(())
                } else {
                    Err(AuthError::InvalidState)
                }
            }
        }
    }

    /// Project the authorization code out of the callback (defensive
    /// re-check).
    ///
    /// # Errors
    /// `MissingCode` when absent.
    pub fn extract_code<'a>(&self, params: &'a CallbackParams) -> Result<&'a str> {
        params.code.as_deref().filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)
    }

    /// Exchange an authorization code for a token response.
    ///
    /// When PKCE is enabled, the code verifier is recovered from the state
    /// entry for the incoming state id and sent alongside the code.
    ///
    /// # Errors
    /// `TokenRequestFailed` on transport failure; parse errors per
    /// [`Self::parse_token_response`].
    pub async fn exchange_code_for_token(
        &self,
        code: &str,
        state_id: &str,
    ) -> Result<TokenResponse> {
        let mut form: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("scope".to_string(), self.config.scope.clone()),
        ];

        if self.config.enable_pkce {
            if let Some(payload) = self.states.get(state_id).await? {
                if !payload.code_verifier.is_empty() {
                    form.push(("code_verifier".to_string(), payload.code_verifier));
                }
            }
        }

        let request = self.outbound(
            Operation::TokenExchange,
            HttpMethod::Post,
            self.config.token_endpoint.clone(),
            self.token_endpoint_headers(),
            form,
        );

        let response = self.http.send(request).await?;
        debug!(status = response.status, "token endpoint answered");
        self.parse_token_response(&response.body)
    }

    /// Exchange a refresh token for a new token response.
    ///
    /// Same wire shape as the code exchange, with `grant_type=refresh_token`
    /// and no `redirect_uri`.
    ///
    /// # Errors
    /// As [`Self::exchange_code_for_token`].
    pub async fn request_new_tokens(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("client_secret".to_string(), self.config.client_secret.clone()),
            ("scope".to_string(), self.config.scope.clone()),
        ];

        let request = self.outbound(
            Operation::TokenRefresh,
            HttpMethod::Post,
            self.config.token_endpoint.clone(),
            self.token_endpoint_headers(),
            form,
        );

        let response = self.http.send(request).await?;
        debug!(status = response.status, "token endpoint answered refresh");
        self.parse_token_response(&response.body)
    }

    /// Parse a raw token endpoint body.
    ///
    /// # Errors
    /// - `MissingTokenBody` on an empty body
    /// - `InvalidTokenFormat` when the body is not JSON
    /// - `ProviderError` when the body itself reports an error
    pub fn parse_token_response(&self, raw: &str) -> Result<TokenResponse> {
        if raw.trim().is_empty() {
            return Err(AuthError::MissingTokenBody);
        }

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| AuthError::InvalidTokenFormat(e.to_string()))?;

        if let Some(code) = value.get("error").and_then(Value::as_str) {
            let description = value
                .get("error_description")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Err(AuthError::ProviderError { code: code.to_string(), description });
        }

        serde_json::from_value(value).map_err(|e| AuthError::InvalidTokenFormat(e.to_string()))
    }

    /// Enforce the token-response shape contract.
    ///
    /// # Errors
    /// `InvalidTokenResponse` unless `id_token` is present and the token
    /// type is Bearer (case-insensitive).
    pub fn validate_token_response(&self, response: &TokenResponse) -> Result<()> {
        if response.has_valid_shape() {
            Ok(())
        } else {
            Err(AuthError::InvalidTokenResponse)
        }
    }

    /// Decode the identity token claims.
    ///
    /// Decode-only by default; with JWKS verification configured, the
    /// provider's key set is fetched and the signature checked before any
    /// claim is returned.
    ///
    /// # Errors
    /// - `NoIdentityToken` when the response carries no identity token
    /// - `MissingIdentityToken` / `BadIdTokenClaim` on decode failures
    pub async fn extract_id_token_claims(&self, response: &TokenResponse) -> Result<Value> {
        let id_token = response.id_token.as_deref().ok_or(AuthError::NoIdentityToken)?;

        match &self.config.id_token_verification {
            IdTokenVerification::DecodeOnly => claims::decode_jwt_payload(id_token),
            IdTokenVerification::Jwks { jwks_uri, issuer } => {
                let request = self.outbound(
                    Operation::JwksFetch,
                    HttpMethod::Get,
                    jwks_uri.clone(),
                    Vec::new(),
                    Vec::new(),
                );
                let response = self.http.send(request).await?;
                let key_set = jwks::parse_jwk_set(&response.body)?;
                jwks::verify_id_token(
                    id_token,
                    &key_set,
                    &self.config.client_id,
                    issuer.as_deref(),
                )
            }
        }
    }

    /// Fetch the user claims.
    ///
    /// Only performed when a user-info endpoint is configured and the token
    /// response carries an access token; otherwise the identity token
    /// claims double as the user claims.
    ///
    /// # Errors
    /// `BadClaim` when the endpoint errors or answers without a body.
    pub async fn fetch_user_claims(
        &self,
        response: &TokenResponse,
        id_claims: &ClaimMap,
    ) -> Result<Value> {
        let (endpoint, access_token) =
            match (self.config.userinfo_endpoint.as_deref(), response.access_token.as_deref()) {
                (Some(endpoint), Some(token)) => (endpoint, token),
                _ => return Ok(Value::Object(id_claims.clone())),
            };

        let mut headers = vec![("Authorization".to_string(), format!("Bearer {access_token}"))];
        if let Some(host) = self.config.userinfo_endpoint_host() {
            headers.push(("Host".to_string(), host));
        }

        let request = self.outbound(
            Operation::UserInfo,
            HttpMethod::Post,
            endpoint.to_string(),
            headers,
            Vec::new(),
        );

        let answer = self
            .http
            .send(request)
            .await
            .map_err(|e| AuthError::BadClaim(e.to_string()))?;

        if !answer.is_success() {
            return Err(AuthError::BadClaim(format!(
                "user-info endpoint answered {}",
                answer.status
            )));
        }
        if answer.body.trim().is_empty() {
            return Err(AuthError::BadClaim("user-info response had no body".to_string()));
        }

        serde_json::from_str(&answer.body)
            .map_err(|e| AuthError::BadClaim(format!("user-info body is not JSON: {e}")))
    }

    /// Validate the user claims against the identity token claims and the
    /// authorization policy.
    ///
    /// # Errors
    /// - `InvalidUserClaim` when not an object or when the claim carries a
    ///   provider error
    /// - `IncorrectUserClaim` when the subjects differ
    /// - `Unauthorized` when the policy rejects the claim
    pub fn validate_user_claims(
        &self,
        user_claims: &Value,
        id_claims: &ClaimMap,
    ) -> Result<ClaimMap> {
        let map = user_claims.as_object().ok_or(AuthError::InvalidUserClaim(None))?;

        if let Some(code) = map.get("error") {
            let code = match code {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(AuthError::InvalidUserClaim(Some(code)));
        }

        let id_subject = id_claims.get("sub").and_then(Value::as_str).unwrap_or_default();
        let user_subject = map.get("sub").and_then(Value::as_str).unwrap_or_default();
        if id_subject != user_subject {
            return Err(AuthError::IncorrectUserClaim);
        }

        if !self.authorizer.authorize(map) {
            return Err(AuthError::Unauthorized);
        }

        Ok(map.clone())
    }

    /// Project the durable subject identity out of the identity claims.
    ///
    /// # Errors
    /// `NoSubjectIdentity` when `sub` is missing or empty.
    pub fn resolve_subject_identity(&self, id_claims: &ClaimMap) -> Result<String> {
        match id_claims.get("sub").and_then(Value::as_str) {
            Some(sub) if !sub.is_empty() => Ok(sub.to_string()),
            _ => Err(AuthError::NoSubjectIdentity),
        }
    }

    /// Build the provider logout URL for RP-initiated logout, when an
    /// end-session endpoint is configured.
    #[must_use]
    pub fn build_logout_url(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: Option<&str>,
    ) -> Option<String> {
        let endpoint = self.config.end_session_endpoint.as_deref()?;

        let mut params = Vec::new();
        if let Some(hint) = id_token_hint {
            params.push(format!("id_token_hint={}", urlencoding::encode(hint)));
        }
        if let Some(target) = post_logout_redirect_uri {
            params.push(format!("post_logout_redirect_uri={}", urlencoding::encode(target)));
        }

        if params.is_empty() {
            return Some(endpoint.to_string());
        }
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Some(format!("{endpoint}{separator}{}", params.join("&")))
    }

    fn token_endpoint_headers(&self) -> Vec<(String, String)> {
        // Explicit Host so token endpoints behind a reverse proxy with a
        // different public hostname still route.
        match self.config.token_endpoint_host() {
            Some(host) => vec![("Host".to_string(), host)],
            None => Vec::new(),
        }
    }

    fn outbound(
        &self,
        operation: Operation,
        method: HttpMethod,
        url: String,
        headers: Vec<(String, String)>,
        form: Vec<(String, String)>,
    ) -> OutboundRequest {
        let mut request = OutboundRequest {
            operation,
            method,
            url,
            headers,
            form,
            timeout: std::time::Duration::from_secs(self.config.http_timeout_seconds),
            tls_verify: self.config.tls_verify,
        };
        for mutator in &self.mutators {
            request = mutator(request, operation);
        }
        request
    }
}
