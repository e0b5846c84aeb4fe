//! # authrelay Core
//!
//! The OpenID Connect relying-party protocol core: authorization-code flow
//! with PKCE, anti-forgery state, token and claim validation, local user
//! resolution, and transparent session refresh.
//!
//! Pure logic over ports - no HTTP stack, no storage engine. The host (or
//! `authrelay-infra`) supplies adapters for the collaborator traits in
//! [`ports`].
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────┐
//! │  CallbackOrchestrator  │  Callback state machine + user resolution
//! └───────────┬────────────┘
//!             │
//!             ├──► OidcClient       (authorization URL, code/refresh
//!             │         │            exchange, claim validation)
//!             │         ├──► StateStore     (anti-forgery state, TTL)
//!             │         └──► PKCE utilities (verifier/challenge)
//!             │
//!             └──► RefreshManager   (per-request token renewal)
//! ```
//!
//! # Module Organization
//!
//! - [`pkce`]: verifier/challenge generation (RFC 7636)
//! - [`state`]: short-lived anti-forgery state over a transient store
//! - [`claims`]: JWT payload decoding, aggregated claims, attribute
//!   synthesis
//! - [`client`]: the protocol operations against the provider endpoints
//! - [`jwks`]: opt-in identity-token signature verification
//! - [`session`]: refresh metadata and per-request renewal
//! - [`flow`]: the callback orchestrator
//! - [`ports`]: collaborator traits implemented by the host / infra
//! - [`events`]: named observability events
//! - [`testing`]: in-memory doubles for every port

pub mod claims;
pub mod client;
pub mod events;
pub mod flow;
pub mod jwks;
pub mod pkce;
pub mod ports;
pub mod session;
pub mod state;
pub mod testing;

// Re-export commonly used types
pub use client::{AuthUrlOverrides, CallbackParams, OidcClient};
pub use events::{AuthEvent, EventSink, TracingEventSink};
pub use flow::{CallbackOrchestrator, LoginSuccess};
pub use pkce::PkceChallenge;
pub use ports::{
    AllowAll, ClaimAuthorizer, HttpClientPort, HttpMethod, HttpResponse, Lookup, Operation,
    OutboundRequest, RequestMutator, SessionData, SessionStore, TransientStore, UserStore,
};
pub use session::RefreshManager;
pub use state::{StatePayload, StateStore};
