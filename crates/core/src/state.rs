//! Anti-forgery/anti-replay state
//!
//! Each authorization request mints a short-lived, unguessable state id
//! carrying the post-login redirect target and the PKCE verifier. The
//! callback validates the id against the transient store. By default an
//! entry stays readable until its TTL lapses (tolerating double-submits);
//! `consume_state_on_use` switches to check-and-delete for strict
//! anti-replay.

use std::sync::Arc;
use std::time::Duration;

use authrelay_domain::{AuthError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::events::{AuthEvent, EventSink};
use crate::pkce::generate_state_id;
use crate::ports::{Lookup, TransientStore};

/// Storage key prefix for state entries.
pub const STATE_KEY_PREFIX: &str = "authrelay-state--";

/// Payload stored behind one state id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    /// Post-login redirect target captured at state creation (may be empty)
    pub redirect_to: String,
    /// PKCE code verifier for this authorization request (empty when PKCE
    /// is disabled or degraded)
    pub code_verifier: String,
    /// Creation instant
    pub issued_at: DateTime<Utc>,
}

/// Store for in-flight authorization state.
pub struct StateStore {
    store: Arc<dyn TransientStore>,
    events: Arc<dyn EventSink>,
    ttl: Duration,
}

impl StateStore {
    /// Create a state store over a transient-store port.
    #[must_use]
    pub fn new(store: Arc<dyn TransientStore>, events: Arc<dyn EventSink>, ttl: Duration) -> Self {
        Self { store, events, ttl }
    }

    /// Mint a state id and store its payload with the configured TTL.
    ///
    /// # Errors
    /// Returns `RandomnessUnavailable` if the CSPRNG fails, or the store's
    /// error on write failure.
    pub async fn new_state(&self, redirect_to: &str, code_verifier: &str) -> Result<String> {
        let state_id = generate_state_id()?;
        let payload = StatePayload {
            redirect_to: redirect_to.to_string(),
            code_verifier: code_verifier.to_string(),
            issued_at: Utc::now(),
        };
        let serialized = serde_json::to_string(&payload)
            .map_err(|e| AuthError::Store(format!("state payload serialization: {e}")))?;

        self.store.set(&storage_key(&state_id), serialized, self.ttl).await?;
        debug!(state = %state_id, "issued authorization state");
        Ok(state_id)
    }

    /// An unexpired entry exists for `state_id`.
    ///
    /// Missing and expired entries are distinct observability events but
    /// both validate negatively.
    ///
    /// # Errors
    /// Propagates transient-store failures.
    pub async fn check(&self, state_id: &str) -> Result<bool> {
        match self.store.get(&storage_key(state_id)).await? {
            Lookup::Hit(_) => Ok(true),
            Lookup::Expired => {
                warn!(state = %state_id, "authorization state expired");
                self.events.emit(&AuthEvent::StateExpired { state_id: state_id.to_string() });
                Ok(false)
            }
            Lookup::Miss => {
                warn!(state = %state_id, "authorization state not found");
                self.events.emit(&AuthEvent::StateNotFound { state_id: state_id.to_string() });
                Ok(false)
            }
        }
    }

    /// Recover the payload behind a validated state id.
    ///
    /// # Errors
    /// Propagates transient-store failures; a corrupt payload is a store
    /// error.
    pub async fn get(&self, state_id: &str) -> Result<Option<StatePayload>> {
        match self.store.get(&storage_key(state_id)).await? {
            Lookup::Hit(raw) => {
                let payload = serde_json::from_str(&raw)
                    .map_err(|e| AuthError::Store(format!("state payload corrupt: {e}")))?;
                Ok(Some(payload))
            }
            Lookup::Expired | Lookup::Miss => Ok(None),
        }
    }

    /// Delete an entry, for check-and-delete (strict anti-replay) setups.
    ///
    /// # Errors
    /// Propagates transient-store failures.
    pub async fn consume(&self, state_id: &str) -> Result<()> {
        self.store.delete(&storage_key(state_id)).await
    }

    /// Purge expired entries; returns how many were removed.
    ///
    /// Background maintenance, not part of the request path. Safe to run
    /// concurrently with request handling.
    ///
    /// # Errors
    /// Propagates transient-store failures.
    pub async fn sweep(&self) -> Result<usize> {
        let mut purged = 0;
        for key in self.store.keys(STATE_KEY_PREFIX).await? {
            if matches!(self.store.get(&key).await?, Lookup::Expired) {
                self.store.delete(&key).await?;
                purged += 1;
            }
        }
        debug!(purged, "state sweep finished");
        self.events.emit(&AuthEvent::StateSweep { purged });
        Ok(purged)
    }
}

fn storage_key(state_id: &str) -> String {
    format!("{STATE_KEY_PREFIX}{state_id}")
}
