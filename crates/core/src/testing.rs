//! In-memory doubles for the collaborator ports
//!
//! Deterministic, dependency-free implementations used by this crate's own
//! tests and by hosts wiring the core into their test suites. None of them
//! are suitable for production.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use authrelay_domain::{AuthError, NewUser, Result, UserRecord};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::events::{AuthEvent, EventSink};
use crate::ports::{
    HttpClientPort, HttpResponse, Lookup, Operation, OutboundRequest, SessionData, SessionStore,
    TransientStore, UserStore,
};

/// In-memory TTL store with explicit expiry control.
///
/// Expired entries are retained (and reported as [`Lookup::Expired`]) until
/// deleted, mirroring the production adapter; `force_expire` backdates an
/// entry so TTL-lapse paths are testable without sleeping.
#[derive(Default)]
pub struct MemoryTransientStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryTransientStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backdate an entry's deadline so it reads as expired.
    pub fn force_expire(&self, key: &str) {
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.1 = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

#[async_trait]
impl TransientStore for MemoryTransientStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let deadline = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AuthError::Store(format!("ttl out of range: {e}")))?;
        self.entries.lock().insert(key.to_string(), (value, deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Lookup> {
        match self.entries.lock().get(key) {
            Some((value, deadline)) if Utc::now() < *deadline => Ok(Lookup::Hit(value.clone())),
            Some(_) => Ok(Lookup::Expired),
            None => Ok(Lookup::Miss),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// In-memory user store with subject-identity metadata indexing.
#[derive(Default)]
pub struct MockUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
    metadata: Mutex<HashMap<(String, String), Value>>,
    next_id: Mutex<u64>,
    fail_create: Mutex<Option<String>>,
}

impl MockUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user and return the stored record.
    pub fn add_user(&self, username: &str, email: Option<&str>) -> UserRecord {
        let mut next = self.next_id.lock();
        *next += 1;
        let user = UserRecord {
            id: format!("u{}", *next),
            username: username.to_string(),
            email: email.map(str::to_string),
            display_name: None,
        };
        self.users.lock().insert(user.id.clone(), user.clone());
        user
    }

    /// Link a stored user to a subject identity.
    pub fn link_subject(&self, user_id: &str, subject: &str) {
        self.metadata.lock().insert(
            (user_id.to_string(), crate::session::SUBJECT_META_KEY.to_string()),
            Value::String(subject.to_string()),
        );
    }

    /// Make the next `create_user` call fail with the given message.
    pub fn fail_next_create(&self, message: &str) {
        *self.fail_create.lock() = Some(message.to_string());
    }
}

#[async_trait]
impl UserStore for MockUserStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.lock().get(user_id).cloned())
    }

    async fn find_by_subject(&self, subject: &str) -> Result<Option<UserRecord>> {
        let metadata = self.metadata.lock();
        let users = self.users.lock();
        for ((user_id, key), value) in metadata.iter() {
            if key == crate::session::SUBJECT_META_KEY
                && value.as_str() == Some(subject)
            {
                return Ok(users.get(user_id).cloned());
            }
        }
        Ok(None)
    }

    async fn create_user(&self, attrs: NewUser) -> Result<UserRecord> {
        if let Some(message) = self.fail_create.lock().take() {
            return Err(AuthError::Store(message));
        }
        let mut next = self.next_id.lock();
        *next += 1;
        let user = UserRecord {
            id: format!("u{}", *next),
            username: attrs.username,
            email: attrs.email,
            display_name: attrs.display_name,
        };
        self.users.lock().insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user_metadata(&self, user_id: &str, key: &str, value: Value) -> Result<()> {
        self.metadata.lock().insert((user_id.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn get_user_metadata(&self, user_id: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.metadata.lock().get(&(user_id.to_string(), key.to_string())).cloned())
    }

    async fn username_exists(&self, username: &str) -> Result<bool> {
        Ok(self.users.lock().values().any(|u| u.username == username))
    }

    async fn email_exists(&self, email: &str) -> Result<Option<String>> {
        Ok(self
            .users
            .lock()
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .map(|u| u.id.clone()))
    }
}

/// In-memory session store issuing UUID tokens. TTLs are ignored.
#[derive(Default)]
pub struct MockSessionStore {
    sessions: Mutex<HashMap<String, SessionData>>,
}

impl MockSessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// No live sessions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MockSessionStore {
    async fn create_session(&self, user_id: &str, _ttl: Duration) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .insert(token.clone(), SessionData { user_id: user_id.to_string(), refresh: None });
        Ok(token)
    }

    async fn get_session(&self, token: &str) -> Result<Option<SessionData>> {
        Ok(self.sessions.lock().get(token).cloned())
    }

    async fn update_session(&self, token: &str, data: SessionData) -> Result<()> {
        match self.sessions.lock().get_mut(token) {
            Some(entry) => {
                *entry = data;
                Ok(())
            }
            None => Err(AuthError::Store(format!("no session {token}"))),
        }
    }

    async fn destroy_session(&self, token: &str) -> Result<()> {
        self.sessions.lock().remove(token);
        Ok(())
    }
}

/// Scripted HTTP client: responses are queued per operation and every
/// dispatched request is captured for assertions.
#[derive(Default)]
pub struct MockHttpClient {
    responses: Mutex<HashMap<&'static str, Vec<QueuedResponse>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

enum QueuedResponse {
    Answer(HttpResponse),
    Transport(String),
}

impl MockHttpClient {
    /// Create a client with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next request of `operation`.
    pub fn enqueue(&self, operation: Operation, status: u16, body: &str) {
        self.responses
            .lock()
            .entry(operation.name())
            .or_default()
            .push(QueuedResponse::Answer(HttpResponse { status, body: body.to_string() }));
    }

    /// Queue a transport failure for the next request of `operation`.
    pub fn enqueue_transport_error(&self, operation: Operation, message: &str) {
        self.responses
            .lock()
            .entry(operation.name())
            .or_default()
            .push(QueuedResponse::Transport(message.to_string()));
    }

    /// All requests dispatched so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpClientPort for MockHttpClient {
    async fn send(&self, request: OutboundRequest) -> Result<HttpResponse> {
        let operation = request.operation;
        self.requests.lock().push(request);

        let queued = {
            let mut responses = self.responses.lock();
            let queue = responses.entry(operation.name()).or_default();
            if queue.is_empty() { None } else { Some(queue.remove(0)) }
        };

        match queued {
            Some(QueuedResponse::Answer(response)) => Ok(response),
            Some(QueuedResponse::Transport(message)) => {
                Err(AuthError::TokenRequestFailed(message))
            }
            None => Err(AuthError::TokenRequestFailed(format!(
                "no scripted response for {}",
                operation.name()
            ))),
        }
    }
}

/// Event sink that records every event for assertions.
#[derive(Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<AuthEvent>>,
}

impl CollectingEventSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return everything recorded so far.
    #[must_use]
    pub fn take(&self) -> Vec<AuthEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// An event with this name has been recorded.
    #[must_use]
    pub fn saw(&self, name: &str) -> bool {
        self.events.lock().iter().any(|e| e.name() == name)
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &AuthEvent) {
        self.events.lock().push(event.clone());
    }
}
