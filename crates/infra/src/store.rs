//! In-process TTL key-value store
//!
//! Concurrent map of value + deadline. A lapsed entry stays in the map and
//! reads as [`Lookup::Expired`] until something deletes it - that keeps
//! "expired" and "never existed" distinguishable for observability; the
//! periodic GC sweep is what actually reclaims the memory.
//!
//! Suitable for single-process deployments and tests. Multi-node hosts
//! implement [`TransientStore`] over their shared store instead.

use std::time::Duration;

use async_trait::async_trait;
use authrelay_core::ports::{Lookup, TransientStore};
use authrelay_domain::{AuthError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Concurrent in-memory transient store.
#[derive(Debug, Default)]
pub struct MemoryTransientStore {
    entries: DashMap<String, Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: DateTime<Utc>,
}

impl MemoryTransientStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, lapsed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The store holds no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TransientStore for MemoryTransientStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let deadline = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AuthError::Store(format!("ttl out of range: {e}")))?;
        self.entries.insert(key.to_string(), Entry { value, deadline });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Lookup> {
        match self.entries.get(key) {
            Some(entry) if Utc::now() < entry.deadline => Ok(Lookup::Hit(entry.value.clone())),
            Some(_) => Ok(Lookup::Expired),
            None => Ok(Lookup::Miss),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}
