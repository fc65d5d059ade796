//! Resolution of evaluation data across prioritized sources.
//!
//! [`EvaluationsDataAdapter`] produces the most authoritative available [`DataAdapterResult`]
//! for a user: explicitly injected bootstrap data beats prefetched data beats a network fetch
//! beats the persisted cache. An in-memory shadow of every result it has seen lets synchronous
//! callers get an answer without blocking on I/O.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::evaluations::{DataAdapterResult, DataSource};
use crate::events::now_ms;
use crate::network::EvaluationsApi;
use crate::storage::{self, StorageGateway};
use crate::user::User;

const CACHE_PREFIX: &str = "gatehouse.cached_evaluations";
const MANIFEST_KEY: &str = "gatehouse.manifest";

/// Ceiling on cached users. The manifest tracks last-write times; crossing the ceiling evicts
/// oldest entries first.
const MAX_CACHED_USERS: usize = 10;

/// Only used to peek at the updates marker before committing to a payload.
#[derive(serde::Deserialize)]
struct UpdatesMarker {
    has_updates: Option<bool>,
}

/// Fetches, caches, and prioritizes evaluation payloads for users.
pub struct EvaluationsDataAdapter {
    sdk_key: String,
    storage: Arc<dyn StorageGateway>,
    network: Arc<dyn EvaluationsApi>,
    in_memory: Mutex<HashMap<String, DataAdapterResult>>,
}

impl EvaluationsDataAdapter {
    pub fn new(
        sdk_key: impl Into<String>,
        storage: Arc<dyn StorageGateway>,
        network: Arc<dyn EvaluationsApi>,
    ) -> EvaluationsDataAdapter {
        EvaluationsDataAdapter {
            sdk_key: sdk_key.into(),
            storage,
            network,
            in_memory: Mutex::new(HashMap::new()),
        }
    }

    /// The best already-known in-memory result for this user, or `None`. Never performs I/O.
    pub fn get_data_sync(&self, user: &User) -> Option<DataAdapterResult> {
        let in_memory = self
            .in_memory
            .lock()
            .expect("thread holding data adapter lock should not panic");

        in_memory.get(&self.cache_key(user)).cloned()
    }

    /// Consult the slower sources (persisted cache, then network) and return a possibly-better
    /// result than `current`.
    ///
    /// Never regresses: a lower-priority source cannot displace what the caller already has.
    /// Network failure is swallowed and surfaced only as "no better result available".
    pub async fn get_data_async(
        &self,
        current: Option<&DataAdapterResult>,
        user: &User,
    ) -> Option<DataAdapterResult> {
        let cache_key = self.cache_key(user);

        let current = match current {
            Some(result) => Some(result.clone()),
            None => self.load_from_cache(&cache_key).await,
        };

        let latest = self.fetch_latest(current.as_ref(), user, &cache_key).await;

        let best = match (current, latest) {
            (Some(current), Some(latest)) => Some(DataAdapterResult::prefer(latest, current)),
            (Some(current), None) => Some(current),
            (None, Some(latest)) => Some(latest),
            (None, None) => None,
        };

        if let Some(result) = &best {
            self.remember(cache_key, result.clone());
        }

        best
    }

    /// Inject an explicitly provided payload for this user. Bootstrap data has the highest
    /// resolution priority.
    pub fn set_bootstrap_data(&self, user: &User, data: impl Into<String>) {
        let result = DataAdapterResult {
            source: DataSource::Bootstrap,
            data: data.into(),
            received_at: now_ms(),
        };
        self.remember(self.cache_key(user), result);
    }

    /// Fetch data for a user ahead of a switch to them, remembering it in-memory under the
    /// `Prefetch` source.
    pub async fn prefetch_data(&self, user: &User) {
        let body = match self.network.fetch_evaluations(user, None).await {
            Ok(body) => body,
            Err(err) => {
                log::warn!(target: "gatehouse", "prefetch failed: {}", err);
                return;
            }
        };

        if !has_updates(&body) {
            return;
        }

        let result = DataAdapterResult {
            source: DataSource::Prefetch,
            data: body,
            received_at: now_ms(),
        };
        self.remember(self.cache_key(user), result);
    }

    fn cache_key(&self, user: &User) -> String {
        format!("{}.{}", CACHE_PREFIX, user.storage_key(&self.sdk_key))
    }

    /// Record a result in the in-memory shadow so later synchronous callers see it. Keeps the
    /// better of the new and any existing result.
    fn remember(&self, cache_key: String, result: DataAdapterResult) {
        let mut in_memory = self
            .in_memory
            .lock()
            .expect("thread holding data adapter lock should not panic");

        let merged = match in_memory.remove(&cache_key) {
            Some(existing) => DataAdapterResult::prefer(result, existing),
            None => result,
        };
        in_memory.insert(cache_key, merged);
    }

    async fn load_from_cache(&self, cache_key: &str) -> Option<DataAdapterResult> {
        self.storage.when_ready().await;

        let stored: DataAdapterResult = storage::get_object(&*self.storage, cache_key).await?;

        // Whatever source wrote the entry, a read resolves as Cache. The original receipt time
        // is kept so staleness comparisons still mean something.
        Some(DataAdapterResult {
            source: DataSource::Cache,
            data: stored.data,
            received_at: stored.received_at,
        })
    }

    async fn fetch_latest(
        &self,
        current: Option<&DataAdapterResult>,
        user: &User,
        cache_key: &str,
    ) -> Option<DataAdapterResult> {
        let body = match self.network.fetch_evaluations(user, current).await {
            Ok(body) => body,
            Err(err) => {
                log::warn!(target: "gatehouse", "evaluations fetch failed: {}", err);
                return None;
            }
        };

        match serde_json::from_str::<UpdatesMarker>(&body) {
            Ok(UpdatesMarker {
                has_updates: Some(true),
            }) => {
                let result = DataAdapterResult {
                    source: DataSource::Network,
                    data: body,
                    received_at: now_ms(),
                };
                self.persist_to_cache(cache_key, &result).await;
                Some(result)
            }
            Ok(UpdatesMarker {
                has_updates: Some(false),
            }) => {
                // The prior payload is still current; refresh the bookkeeping only.
                current.map(|current| DataAdapterResult {
                    source: DataSource::NetworkNotModified,
                    data: current.data.clone(),
                    received_at: now_ms(),
                })
            }
            Ok(UpdatesMarker { has_updates: None }) | Err(_) => {
                log::warn!(target: "gatehouse", "evaluations response is missing an updates marker, ignoring");
                None
            }
        }
    }

    /// Every successful network fetch lands in the persisted cache so the next session can start
    /// from it. Write failures are logged and otherwise ignored.
    async fn persist_to_cache(&self, cache_key: &str, result: &DataAdapterResult) {
        if let Err(err) = storage::set_object(&*self.storage, cache_key, result).await {
            log::warn!(target: "gatehouse", "failed to cache evaluations: {}", err);
            return;
        }

        self.enforce_cache_limit(cache_key).await;
    }

    async fn enforce_cache_limit(&self, cache_key: &str) {
        let mut manifest: HashMap<String, i64> =
            storage::get_object(&*self.storage, MANIFEST_KEY)
                .await
                .unwrap_or_default();

        manifest.insert(cache_key.to_owned(), now_ms());

        while manifest.len() > MAX_CACHED_USERS {
            let Some(oldest) = manifest
                .iter()
                .min_by_key(|(_, written_at)| **written_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            if let Err(err) = self.storage.remove(&oldest).await {
                log::warn!(target: "gatehouse", "failed to evict cached evaluations: {}", err);
            }
            manifest.remove(&oldest);
        }

        if let Err(err) = storage::set_object(&*self.storage, MANIFEST_KEY, &manifest).await {
            log::warn!(target: "gatehouse", "failed to write cache manifest: {}", err);
        }
    }
}

fn has_updates(body: &str) -> bool {
    matches!(
        serde_json::from_str::<UpdatesMarker>(body),
        Ok(UpdatesMarker {
            has_updates: Some(true),
        })
    )
}
