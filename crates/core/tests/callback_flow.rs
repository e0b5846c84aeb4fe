//! Integration tests for the authentication callback flow
//!
//! Drives the full orchestrator over in-memory collaborator doubles:
//! authorization URL issuance, callback validation, token exchange, claim
//! validation, user resolution/provisioning, and session establishment.

use std::sync::Arc;
use std::time::Duration;

use authrelay_core::pkce::challenge_for;
use authrelay_core::testing::{
    CollectingEventSink, MemoryTransientStore, MockHttpClient, MockSessionStore, MockUserStore,
};
use authrelay_core::{
    AuthUrlOverrides, CallbackOrchestrator, CallbackParams, OidcClient, Operation, RefreshManager,
    SessionStore, StateStore, UserStore,
};
use authrelay_domain::{AuthError, OidcConfig};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;

struct Harness {
    orchestrator: CallbackOrchestrator,
    http: Arc<MockHttpClient>,
    users: Arc<MockUserStore>,
    sessions: Arc<MockSessionStore>,
    events: Arc<CollectingEventSink>,
}

fn test_config() -> OidcConfig {
    OidcConfig {
        client_id: "cid".to_string(),
        client_secret: "secret".to_string(),
        scope: "openid email".to_string(),
        authorization_endpoint: "https://idp.example.com/authorize".to_string(),
        token_endpoint: "https://idp.example.com/token".to_string(),
        redirect_uri: "https://app.example.com/callback".to_string(),
        login_url: "https://app.example.com/login".to_string(),
        home_url: "https://app.example.com/".to_string(),
        create_user_if_missing: true,
        ..OidcConfig::default()
    }
}

fn harness(config: OidcConfig) -> Harness {
    let http = Arc::new(MockHttpClient::new());
    let users = Arc::new(MockUserStore::new());
    let sessions = Arc::new(MockSessionStore::new());
    let events = Arc::new(CollectingEventSink::new());
    let states = Arc::new(StateStore::new(
        Arc::new(MemoryTransientStore::new()),
        events.clone(),
        Duration::from_secs(config.state_ttl_seconds),
    ));
    let client =
        Arc::new(OidcClient::new(config.clone(), http.clone(), states, events.clone()));
    let refresh = Arc::new(RefreshManager::new(
        config.clone(),
        client.clone(),
        users.clone(),
        sessions.clone(),
        events.clone(),
    ));
    let orchestrator = CallbackOrchestrator::new(
        config,
        client,
        refresh,
        users.clone(),
        sessions.clone(),
        events.clone(),
    );
    Harness { orchestrator, http, users, sessions, events }
}

fn id_token_for(claims: &serde_json::Value) -> String {
    format!("header.{}.signature", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

fn token_body(sub: &str, extra_claims: serde_json::Value) -> String {
    let mut claims = json!({"sub": sub});
    if let (Some(base), Some(extra)) = (claims.as_object_mut(), extra_claims.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    json!({
        "access_token": "the-access-token",
        "id_token": id_token_for(&claims),
        "token_type": "Bearer",
        "expires_in": 300,
        "refresh_token": "the-refresh-token",
    })
    .to_string()
}

fn query_value(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == key {
            urlencoding::decode(v).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Full round trip: the code_verifier sent to the token endpoint hashes to
/// the code_challenge advertised in the authorization URL, and the state is
/// the one minted at URL build time.
#[tokio::test]
async fn test_authorization_url_to_token_exchange_round_trip() {
    let fx = harness(test_config());

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    let advertised_challenge = query_value(&url, "code_challenge").unwrap();
    assert_eq!(query_value(&url, "response_type").as_deref(), Some("code"));
    assert_eq!(query_value(&url, "scope").as_deref(), Some("openid email"));
    assert_eq!(query_value(&url, "client_id").as_deref(), Some("cid"));
    assert_eq!(query_value(&url, "code_challenge_method").as_deref(), Some("S256"));
    assert!(state.len() >= 32);
    assert_eq!(advertised_challenge.len(), 43);

    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("subject-1", json!({"preferred_username": "ada", "nickname": "ada",
                                        "email": "ada@example.com"})),
    );

    let params = CallbackParams {
        code: Some("abc123".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();
    assert_eq!(success.user.username, "ada");

    let sent = fx.http.requests().pop().unwrap();
    assert!(sent.form.contains(&("grant_type".to_string(), "authorization_code".to_string())));
    assert!(sent.form.contains(&("code".to_string(), "abc123".to_string())));

    let verifier = sent
        .form
        .iter()
        .find(|(k, _)| k == "code_verifier")
        .map(|(_, v)| v.clone())
        .expect("PKCE verifier sent");
    assert_eq!(verifier.len(), 86);
    assert_eq!(challenge_for(&verifier), advertised_challenge);
}

/// A state id that was never issued fails with `invalid-state`, emits the
/// `state-not-found` event, and never reaches the token endpoint.
#[tokio::test]
async fn test_forged_state_is_rejected_before_exchange() {
    let fx = harness(test_config());

    let params = CallbackParams {
        code: Some("abc123".to_string()),
        state: Some("never-issued".to_string()),
        ..CallbackParams::default()
    };

    let redirect = fx.orchestrator.handle_callback(&params, None, None).await;
    assert!(redirect.starts_with("https://app.example.com/login?login-error=invalid-state"));
    assert!(fx.events.saw("state-not-found"));
    assert!(fx.events.saw("login-failed"));
    assert!(fx.http.requests().is_empty());
    assert!(fx.sessions.is_empty());
}

/// Provider-reported errors pass their code through to the login redirect.
#[tokio::test]
async fn test_provider_error_code_is_passed_through() {
    let fx = harness(test_config());

    let params = CallbackParams {
        error: Some("access_denied".to_string()),
        error_description: Some("user cancelled".to_string()),
        ..CallbackParams::default()
    };

    let redirect = fx.orchestrator.handle_callback(&params, None, None).await;
    assert!(redirect.contains("login-error=access_denied"));
    assert!(redirect.contains("message="));
}

/// New-account provisioning de-duplicates the username with numeric
/// suffixes and persists login metadata.
#[tokio::test]
async fn test_user_provisioning_with_username_dedup() {
    let fx = harness(test_config());
    fx.users.add_user("alice", Some("other@example.com"));

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();

    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("subject-alice", json!({"preferred_username": "alice",
                                            "nickname": "alice",
                                            "email": "alice@example.com"})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();

    // "alice" is taken, so the new account gets "alice2"
    assert_eq!(success.user.username, "alice2");
    assert!(fx.events.saw("user-created"));

    // Metadata persisted for the new user
    let meta = fx
        .users
        .get_user_metadata(&success.user.id, "authrelay-subject-identity")
        .await
        .unwrap();
    assert_eq!(meta, Some(json!("subject-alice")));
    let token_meta = fx
        .users
        .get_user_metadata(&success.user.id, "authrelay-last-token-response")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(token_meta["access_token"], json!("the-access-token"));

    // Session carries refresh metadata
    let session = fx.sessions.get_session(&success.session_token).await.unwrap().unwrap();
    assert_eq!(session.user_id, success.user.id);
    assert_eq!(
        session.refresh.unwrap().refresh_token.as_deref(),
        Some("the-refresh-token")
    );
}

/// A returning linked user logs straight in without provisioning.
#[tokio::test]
async fn test_returning_linked_user() {
    let fx = harness(test_config());
    let existing = fx.users.add_user("ada", Some("ada@example.com"));
    fx.users.link_subject(&existing.id, "subject-ada");

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();

    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("subject-ada", json!({})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();
    assert_eq!(success.user.id, existing.id);
    assert!(!fx.events.saw("user-created"));
}

/// An identity already linked to account A, presented while account B is
/// authenticated, must not be captured: that is the account-hijack guard.
#[tokio::test]
async fn test_linked_identity_with_conflicting_session_fails() {
    let fx = harness(test_config());
    let owner = fx.users.add_user("owner", None);
    fx.users.link_subject(&owner.id, "subject-x");
    let attacker = fx.users.add_user("attacker", None);
    let attacker_session = fx
        .sessions
        .create_session(&attacker.id, Duration::from_secs(3600))
        .await
        .unwrap();

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();

    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("subject-x", json!({})));

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx
        .orchestrator
        .run_callback(&params, Some(&attacker_session), None)
        .await;
    assert_eq!(result.unwrap_err(), AuthError::LinkError);
}

/// An unlinked identity presented by an authenticated session is claimed
/// by that session's account - unless the account already carries a
/// different identity.
#[tokio::test]
async fn test_first_claim_by_authenticated_session() {
    let fx = harness(test_config());
    let user = fx.users.add_user("claimer", None);
    let session = fx.sessions.create_session(&user.id, Duration::from_secs(3600)).await.unwrap();

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("subject-new", json!({})));

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state.clone()),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, Some(&session), None).await.unwrap();
    assert_eq!(success.user.id, user.id);
    assert!(fx.events.saw("identity-linked"));

    // Second, different identity for the same account: linking conflict
    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("subject-other", json!({})));

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx.orchestrator.run_callback(&params, Some(&session), None).await;
    assert_eq!(result.unwrap_err(), AuthError::LinkError);
}

/// With auto-create and email linking off, an unknown identity fails with
/// `identity-not-linked`.
#[tokio::test]
async fn test_unknown_identity_without_provisioning_fails() {
    let config = OidcConfig {
        create_user_if_missing: false,
        link_by_email: false,
        ..test_config()
    };
    let fx = harness(config);

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("subject-unknown", json!({})));

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx.orchestrator.run_callback(&params, None, None).await;
    assert_eq!(result.unwrap_err(), AuthError::IdentityNotLinked);
    assert!(fx.sessions.is_empty());
}

/// Link-by-email attaches an unlinked identity to the account owning the
/// claimed email address.
#[tokio::test]
async fn test_link_by_email() {
    let config = OidcConfig { create_user_if_missing: false, ..test_config() };
    let fx = harness(config);
    let existing = fx.users.add_user("grace", Some("grace@example.com"));

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("subject-grace", json!({"email": "grace@example.com"})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();
    assert_eq!(success.user.id, existing.id);
    assert!(fx.events.saw("identity-linked"));
}

/// Redirect priority: explicit request override beats the state-captured
/// target, which beats the cookie override, which beats home.
#[tokio::test]
async fn test_post_login_redirect_priority() {
    let fx = harness(test_config());

    // Captured at state creation
    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides {
            redirect_to: Some("/from-state".to_string()),
            ..AuthUrlOverrides::default()
        })
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("s1", json!({"preferred_username": "u1", "nickname": "u1"})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state.clone()),
        redirect_to: Some("/explicit".to_string()),
        ..CallbackParams::default()
    };
    let success = fx
        .orchestrator
        .run_callback(&params, None, Some("/from-cookie"))
        .await
        .unwrap();
    assert_eq!(success.redirect_to, "/explicit");

    // Same state again (default keeps it readable until TTL): state target
    // wins once the explicit override is gone
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("s1", json!({"preferred_username": "u1", "nickname": "u1"})),
    );
    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx
        .orchestrator
        .run_callback(&params, None, Some("/from-cookie"))
        .await
        .unwrap();
    assert_eq!(success.redirect_to, "/from-state");
}

/// With `consume_state_on_use`, presenting the same state twice fails the
/// second callback.
#[tokio::test]
async fn test_state_consumption_blocks_replay() {
    let config = OidcConfig { consume_state_on_use: true, ..test_config() };
    let fx = harness(config);

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("s1", json!({"preferred_username": "u1", "nickname": "u1"})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    assert!(fx.orchestrator.run_callback(&params, None, None).await.is_ok());

    let result = fx.orchestrator.run_callback(&params, None, None).await;
    assert_eq!(result.unwrap_err(), AuthError::InvalidState);
}

/// A token response without an identity token fails shape validation and
/// establishes nothing.
#[tokio::test]
async fn test_access_token_only_response_is_rejected() {
    let fx = harness(test_config());

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &json!({"access_token": "at", "token_type": "Bearer", "expires_in": 300}).to_string(),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx.orchestrator.run_callback(&params, None, None).await;
    assert_eq!(result.unwrap_err(), AuthError::InvalidTokenResponse);
    assert!(fx.sessions.is_empty());
}

/// User-info claims with a mismatched subject are rejected after the
/// (configured) user-info fetch.
#[tokio::test]
async fn test_userinfo_subject_mismatch_is_rejected() {
    let config = OidcConfig {
        userinfo_endpoint: Some("https://idp.example.com/userinfo".to_string()),
        ..test_config()
    };
    let fx = harness(config);

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("subject-a", json!({})));
    fx.http.enqueue(Operation::UserInfo, 200, &json!({"sub": "subject-b"}).to_string());

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx.orchestrator.run_callback(&params, None, None).await;
    assert_eq!(result.unwrap_err(), AuthError::IncorrectUserClaim);
}

/// Provisioning re-fetches user claims once when required fields are
/// missing, then uses the richer claim set.
#[tokio::test]
async fn test_provisioning_refetches_incomplete_claims() {
    let config = OidcConfig {
        userinfo_endpoint: Some("https://idp.example.com/userinfo".to_string()),
        ..test_config()
    };
    let fx = harness(config);

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();

    fx.http.enqueue(Operation::TokenExchange, 200, &token_body("s1", json!({})));
    // First user-info answer lacks the nickname; the retry carries it
    fx.http.enqueue(Operation::UserInfo, 200, &json!({"sub": "s1", "preferred_username": "lin"}).to_string());
    fx.http.enqueue(
        Operation::UserInfo,
        200,
        &json!({"sub": "s1", "preferred_username": "lin", "nickname": "lin"}).to_string(),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();
    assert_eq!(success.user.username, "lin");

    // Two user-info requests were made
    let userinfo_calls = fx
        .http
        .requests()
        .iter()
        .filter(|r| r.operation == Operation::UserInfo)
        .count();
    assert_eq!(userinfo_calls, 2);
}

/// A failing user store surfaces `user-creation-failed`.
#[tokio::test]
async fn test_user_creation_failure_surfaces() {
    let fx = harness(test_config());
    fx.users.fail_next_create("disk full");

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body("s1", json!({"preferred_username": "u", "nickname": "u"})),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let result = fx.orchestrator.run_callback(&params, None, None).await;
    assert!(matches!(result.unwrap_err(), AuthError::UserCreationFailed(_)));
}

/// Aggregated claims flow through `get_claim` during attribute synthesis.
#[tokio::test]
async fn test_aggregated_email_claim_is_dereferenced() {
    let fx = harness(test_config());

    let embedded = format!(
        "h.{}.s",
        URL_SAFE_NO_PAD.encode(json!({"email": "x@y.com"}).to_string())
    );
    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue(
        Operation::TokenExchange,
        200,
        &token_body(
            "s1",
            json!({
                "preferred_username": "agg",
                "nickname": "agg",
                "_claim_names": {"email": "src1"},
                "_claim_sources": {"src1": {"JWT": embedded}},
            }),
        ),
    );

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let success = fx.orchestrator.run_callback(&params, None, None).await.unwrap();
    assert_eq!(success.user.email.as_deref(), Some("x@y.com"));
}

/// The transport failing mid-exchange terminates the flow with the token
/// request error; nothing is persisted.
#[tokio::test]
async fn test_transport_failure_is_terminal() {
    let fx = harness(test_config());

    let url = fx
        .orchestrator
        .build_authorization_url(&AuthUrlOverrides::default())
        .await
        .unwrap();
    let state = query_value(&url, "state").unwrap();
    fx.http.enqueue_transport_error(Operation::TokenExchange, "connection refused");

    let params = CallbackParams {
        code: Some("abc".to_string()),
        state: Some(state),
        ..CallbackParams::default()
    };
    let redirect = fx.orchestrator.handle_callback(&params, None, None).await;
    assert!(redirect.contains("login-error=token-request-failed"));
    assert!(fx.sessions.is_empty());
}
