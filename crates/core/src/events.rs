//! Named observability events
//!
//! Every notable protocol outcome is reported twice: as a structured
//! `tracing` record and as a typed [`AuthEvent`] delivered to the host's
//! [`EventSink`]. The event names are stable strings the host can key
//! metrics or audit rules on.

use std::fmt;

/// A named protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// Callback arrived without a `state` parameter
    NoStateProvided,
    /// Callback presented a state id that was never issued
    StateNotFound {
        /// The unrecognized state id
        state_id: String,
    },
    /// Callback presented a state id whose TTL lapsed
    StateExpired {
        /// The lapsed state id
        state_id: String,
    },
    /// Garbage-collection sweep finished
    StateSweep {
        /// Number of expired entries purged
        purged: usize,
    },
    /// A callback completed and a session was established
    LoginSuccess {
        /// Local user id
        user_id: String,
    },
    /// A callback failed; the error code is the redirect code
    LoginFailed {
        /// Stable error code
        code: String,
    },
    /// A new local account was provisioned from claims
    UserCreated {
        /// Local user id
        user_id: String,
        /// Chosen (de-duplicated) username
        username: String,
    },
    /// A subject identity was linked to an existing account
    IdentityLinked {
        /// Local user id
        user_id: String,
        /// Remote subject identity
        subject: String,
    },
    /// An access token was renewed mid-session
    TokenRefreshed {
        /// Local user id
        user_id: String,
    },
    /// A session could no longer self-renew and was destroyed
    SessionExpired {
        /// Local user id
        user_id: String,
    },
}

impl AuthEvent {
    /// Stable event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoStateProvided => "no-state-provided",
            Self::StateNotFound { .. } => "state-not-found",
            Self::StateExpired { .. } => "state-expired",
            Self::StateSweep { .. } => "state-sweep",
            Self::LoginSuccess { .. } => "login-success",
            Self::LoginFailed { .. } => "login-failed",
            Self::UserCreated { .. } => "user-created",
            Self::IdentityLinked { .. } => "identity-linked",
            Self::TokenRefreshed { .. } => "token-refreshed",
            Self::SessionExpired { .. } => "session-expired",
        }
    }
}

impl fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sink for named protocol events.
///
/// Implementations must be cheap and non-blocking; the core emits events
/// inline on the request path.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &AuthEvent);
}

/// Event sink that forwards every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &AuthEvent) {
        tracing::info!(target: "authrelay::events", event = event.name(), detail = ?event);
    }
}
