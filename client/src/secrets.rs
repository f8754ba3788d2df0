//! Secret store abstraction.
//!
//! Production deployments back this with a managed secret service; the
//! filesystem implementation keeps local runs and tests self-contained. The
//! MoSAPI credential and session-cookie names are centralised here so the
//! naming convention lives in one place.

use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// TTL for cached credential lookups. Cookies are never cached here.
const CREDENTIAL_TTL_SECS: u64 = 300;
const CREDENTIAL_CACHE_SIZE: u64 = 1000;

pub fn username_secret(entity_id: &str) -> String {
    format!("mosapi_username_{entity_id}")
}

pub fn password_secret(entity_id: &str) -> String {
    format!("mosapi_password_{entity_id}")
}

pub fn session_cookie_secret(entity_id: &str) -> String {
    format!("mosapi_session_cookie_{entity_id}")
}

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String, SecretError>;
    async fn put(&self, name: &str, value: &str) -> Result<(), SecretError>;
}

/// One file per secret under a directory. Writes go through a temp file and
/// rename so readers never observe a torn value.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSecretStore { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        match tokio::fs::read_to_string(self.path_for(name)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, value: &str) -> Result<(), SecretError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, self.path_for(name)).await?;
        Ok(())
    }
}

/// In-memory store for tests and single-process runs.
#[derive(Default)]
pub struct InMemorySecretStore {
    values: parking_lot::RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, name: &str) -> Result<String, SecretError> {
        self.values
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }

    async fn put(&self, name: &str, value: &str) -> Result<(), SecretError> {
        self.values
            .write()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Read-through cache in front of a secret store, for values that round-trip
/// to an external service on every login otherwise. Session cookies must not
/// go through this wrapper: their freshness is the whole point.
pub struct CachedSecrets {
    inner: Arc<dyn SecretStore>,
    cache: Cache<String, String>,
}

impl CachedSecrets {
    pub fn new(inner: Arc<dyn SecretStore>) -> Self {
        let cache = Cache::builder()
            .max_capacity(CREDENTIAL_CACHE_SIZE)
            .time_to_live(Duration::from_secs(CREDENTIAL_TTL_SECS))
            .build();
        CachedSecrets { inner, cache }
    }

    pub async fn get(&self, name: &str) -> Result<String, SecretError> {
        if let Some(value) = self.cache.get(name) {
            return Ok(value);
        }
        let value = self.inner.get(name).await?;
        self.cache.insert(name.to_string(), value.clone());
        Ok(value)
    }
}
