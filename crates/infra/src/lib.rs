//! # authrelay Infra
//!
//! Adapters behind the core's collaborator ports:
//! - [`http`]: reqwest-backed outbound HTTP with per-request timeout and
//!   TLS-verification toggles
//! - [`store`]: in-process TTL key-value store for anti-forgery state
//! - [`config`]: configuration loading from environment variables or files
//! - [`scheduling`]: periodic garbage-collection sweep over expired state
//!
//! Hosts embedding the core into an existing platform replace any of these
//! with their own implementations of the port traits.

pub mod config;
pub mod http;
pub mod scheduling;
pub mod store;

pub use http::ReqwestHttpClient;
pub use scheduling::{SchedulerError, StateGcConfig, StateGcScheduler};
pub use store::MemoryTransientStore;
