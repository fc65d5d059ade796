//! Key-value persistence consumed by the data adapter and the event logger.
//!
//! The storage backend is an external collaborator: browsers bring local storage, mobile
//! embedders bring files or a database. The core only needs async key→bytes access plus a
//! readiness signal, and always treats storage failures as recoverable.
use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Namespace prefix for every key this crate persists.
pub const STORAGE_NAMESPACE: &str = "gatehouse";

/// Async key→JSON-blob persistence with a readiness signal.
///
/// `get`/`set`/`remove` may be called before the backend is ready; callers that need a defined
/// answer await [`StorageGateway::when_ready`] first.
#[async_trait::async_trait]
pub trait StorageGateway: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Whether the backend can serve reads right now.
    fn is_ready(&self) -> bool;

    /// Resolves once the backend can serve reads. Returns immediately if already ready.
    async fn when_ready(&self);
}

/// Read a JSON object from storage. Missing keys and malformed JSON both come back as `None`:
/// corrupt persisted state is treated as a cache miss, never as a fatal error.
pub async fn get_object<T: DeserializeOwned>(
    storage: &dyn StorageGateway,
    key: &str,
) -> Option<T> {
    let bytes = match storage.get(key).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            log::warn!(target: "gatehouse", "storage read of {} failed: {}", key, err);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!(target: "gatehouse", "discarding malformed persisted data at {}: {:?}", key, err);
            None
        }
    }
}

/// Write a JSON object to storage.
pub async fn set_object<T: Serialize>(
    storage: &dyn StorageGateway,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    storage.set(key, bytes).await
}

/// In-memory [`StorageGateway`] used in tests and by embedders without persistent storage.
///
/// Always ready. Contents do not survive the process, so cached evaluations and failed-log
/// retry degrade to per-session behavior.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

#[async_trait::async_trait]
impl StorageGateway for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        entries.insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("storage lock poisoned".to_owned()))?;
        entries.remove(key);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn when_ready(&self) {}
}
