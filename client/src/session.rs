//! Cluster-shared session cookie cache.
//!
//! MoSAPI caps concurrent sessions per client certificate, so every replica
//! must reuse the same cookie. The cache maps entity id to the current cookie
//! string; an empty or whitespace value means "no session". Reads never fail:
//! a miss and an unreachable backing store look the same to callers, who will
//! simply log in again.

use crate::metrics_defs::{SESSION_CACHE_HIT, SESSION_CACHE_MISS};
use crate::secrets::{self, SecretStore};
use async_trait::async_trait;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
#[error("session cache error: {0}")]
pub struct SessionCacheError(pub String);

#[async_trait]
pub trait SessionCache: Send + Sync {
    /// Current cookie for the entity, or `None` when absent, blank, or the
    /// backing store cannot be reached.
    async fn get(&self, entity_id: &str) -> Option<String>;

    /// Atomically installs a new cookie; readers that start after this
    /// returns observe the new value.
    async fn put(&self, entity_id: &str, cookie: &str) -> Result<(), SessionCacheError>;

    /// Equivalent to `put(entity_id, "")`. Failures are logged, not raised:
    /// clearing happens on logout exit paths that must not throw again.
    async fn clear(&self, entity_id: &str);
}

/// Session cache persisted through the shared [`SecretStore`], one secret per
/// entity (`mosapi_session_cookie_<entity>`). This is the production
/// implementation: the secret service gives us the cross-replica atomicity
/// the contract requires.
pub struct SecretStoreSessionCache {
    store: Arc<dyn SecretStore>,
}

impl SecretStoreSessionCache {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        SecretStoreSessionCache { store }
    }
}

#[async_trait]
impl SessionCache for SecretStoreSessionCache {
    async fn get(&self, entity_id: &str) -> Option<String> {
        let name = secrets::session_cookie_secret(entity_id);
        match self.store.get(&name).await {
            Ok(value) if !value.trim().is_empty() => {
                counter!(SESSION_CACHE_HIT.name).increment(1);
                Some(value)
            }
            Ok(_) => {
                counter!(SESSION_CACHE_MISS.name).increment(1);
                None
            }
            Err(e) => {
                // Expected when the secret was never created.
                tracing::info!(entity_id, error = %e, "no session cookie in store");
                counter!(SESSION_CACHE_MISS.name).increment(1);
                None
            }
        }
    }

    async fn put(&self, entity_id: &str, cookie: &str) -> Result<(), SessionCacheError> {
        let name = secrets::session_cookie_secret(entity_id);
        self.store
            .put(&name, cookie)
            .await
            .map_err(|e| SessionCacheError(format!("failed to store cookie for {entity_id}: {e}")))
    }

    async fn clear(&self, entity_id: &str) {
        if let Err(e) = self.put(entity_id, "").await {
            tracing::error!(entity_id, error = %e, "failed to clear session cookie");
        }
    }
}

/// Process-local cache for tests and single-replica runs.
#[derive(Default)]
pub struct InMemorySessionCache {
    cookies: parking_lot::RwLock<HashMap<String, String>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn get(&self, entity_id: &str) -> Option<String> {
        self.cookies
            .read()
            .get(entity_id)
            .filter(|cookie| !cookie.trim().is_empty())
            .cloned()
    }

    async fn put(&self, entity_id: &str, cookie: &str) -> Result<(), SessionCacheError> {
        self.cookies
            .write()
            .insert(entity_id.to_string(), cookie.to_string());
        Ok(())
    }

    async fn clear(&self, entity_id: &str) {
        self.cookies
            .write()
            .insert(entity_id.to_string(), String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::InMemorySecretStore;

    #[tokio::test]
    async fn in_memory_semantics() {
        let cache = InMemorySessionCache::new();
        assert_eq!(cache.get("example").await, None);

        cache.put("example", "id=abc").await.unwrap();
        assert_eq!(cache.get("example").await.as_deref(), Some("id=abc"));

        cache.clear("example").await;
        assert_eq!(cache.get("example").await, None);
    }

    #[tokio::test]
    async fn blank_cookie_is_a_miss() {
        let cache = InMemorySessionCache::new();
        cache.put("example", "   ").await.unwrap();
        assert_eq!(cache.get("example").await, None);
    }

    #[tokio::test]
    async fn secret_store_backed_round_trip() {
        let store = Arc::new(InMemorySecretStore::new());
        let cache = SecretStoreSessionCache::new(store.clone());

        assert_eq!(cache.get("example").await, None);

        cache.put("example", "id=xyz").await.unwrap();
        assert_eq!(cache.get("example").await.as_deref(), Some("id=xyz"));
        // stored under the well-known secret name
        assert_eq!(
            store.get("mosapi_session_cookie_example").await.unwrap(),
            "id=xyz"
        );

        cache.clear("example").await;
        assert_eq!(cache.get("example").await, None);
    }
}
