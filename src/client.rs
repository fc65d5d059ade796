//! A client session that ties the building blocks together: the data adapter resolves
//! evaluation data for the current user, the evaluation store answers lookups, and every lookup
//! funnels an exposure into the event logger.
use std::sync::{Arc, RwLock};

use tokio::time::Duration;

use crate::data_adapter::EvaluationsDataAdapter;
use crate::evaluation_store::EvaluationStore;
use crate::evaluations::{ConfigEvaluation, DetailedEvaluation, GateEvaluation, LayerEvaluation};
use crate::events::event_logger::{EventLogger, EventLoggerOptions, LoggerRegistry};
use crate::events::Event;
use crate::network::{EvaluationsApi, EventTransport, HttpApi, HttpApiConfig, DEFAULT_BASE_URL};
use crate::sdk_metadata::SdkMetadata;
use crate::storage::{InMemoryStorage, StorageGateway};
use crate::user::User;
use crate::visibility::{VisibilityNotifier, VisibilityRelay};

/// Configuration for [`Client`].
///
/// # Examples
/// ```no_run
/// # use gatehouse_core::client::ClientOptions;
/// # use gatehouse_core::user::User;
/// let client = ClientOptions::from_sdk_key("client-key")
///     .to_client(User::with_user_id("a-user"));
/// ```
pub struct ClientOptions {
    sdk_key: String,
    base_url: String,
    disable_logging: bool,
    max_queue_size: usize,
    flush_interval: Duration,
    sdk_metadata: SdkMetadata,
    storage: Option<Arc<dyn StorageGateway>>,
    transport: Option<Arc<dyn EventTransport>>,
    evaluations_api: Option<Arc<dyn EvaluationsApi>>,
    visibility: Option<Arc<dyn VisibilityNotifier>>,
    registry: Option<Arc<LoggerRegistry>>,
}

impl ClientOptions {
    /// Create a default configuration using the specified SDK key.
    pub fn from_sdk_key(sdk_key: impl Into<String>) -> ClientOptions {
        ClientOptions {
            sdk_key: sdk_key.into(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            disable_logging: false,
            max_queue_size: 50,
            flush_interval: Duration::from_secs(10),
            sdk_metadata: SdkMetadata {
                name: "gatehouse-core",
                version: env!("CARGO_PKG_VERSION"),
            },
            storage: None,
            transport: None,
            evaluations_api: None,
            visibility: None,
            registry: None,
        }
    }

    /// Override the base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> ClientOptions {
        self.base_url = base_url.into();
        self
    }

    /// Disable event delivery. Batches are redirected to the failed-log store instead of the
    /// network.
    pub fn disable_logging(mut self, disable: bool) -> ClientOptions {
        self.disable_logging = disable;
        self
    }

    /// Queue length beyond which a flush is triggered.
    pub fn max_queue_size(mut self, size: usize) -> ClientOptions {
        self.max_queue_size = size;
        self
    }

    /// Period of the background flush timer.
    pub fn flush_interval(mut self, interval: Duration) -> ClientOptions {
        self.flush_interval = interval;
        self
    }

    /// Identify the SDK built on top of this core in telemetry requests.
    pub fn sdk_metadata(mut self, metadata: SdkMetadata) -> ClientOptions {
        self.sdk_metadata = metadata;
        self
    }

    /// Substitute the storage backend. Defaults to in-memory (nothing survives the process).
    pub fn storage(mut self, storage: Arc<dyn StorageGateway>) -> ClientOptions {
        self.storage = Some(storage);
        self
    }

    /// Substitute the event transport.
    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> ClientOptions {
        self.transport = Some(transport);
        self
    }

    /// Substitute the evaluations endpoint client.
    pub fn evaluations_api(mut self, api: Arc<dyn EvaluationsApi>) -> ClientOptions {
        self.evaluations_api = Some(api);
        self
    }

    /// Substitute the visibility notifier wired to the platform's lifecycle.
    pub fn visibility(mut self, visibility: Arc<dyn VisibilityNotifier>) -> ClientOptions {
        self.visibility = Some(visibility);
        self
    }

    /// Share a logger registry across clients so loggers under the same SDK key supersede each
    /// other. Defaults to a registry private to this client.
    pub fn registry(mut self, registry: Arc<LoggerRegistry>) -> ClientOptions {
        self.registry = Some(registry);
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    pub fn to_client(self, user: User) -> Client {
        Client::new(self, user)
    }
}

/// A Gatehouse client bound to one user at a time.
///
/// Construct via [`ClientOptions`], then call [`Client::initialize_async`] (or
/// [`Client::initialize_sync`] when bootstrap data was injected) before evaluating. Lookups
/// never fail: before data arrives they answer with default values and an explanatory reason.
pub struct Client {
    user: RwLock<User>,
    store: Arc<EvaluationStore>,
    adapter: EvaluationsDataAdapter,
    logger: EventLogger,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(options: ClientOptions, user: User) -> Client {
        let storage = options
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));
        let visibility = options
            .visibility
            .unwrap_or_else(|| Arc::new(VisibilityRelay::new()));
        let registry = options
            .registry
            .unwrap_or_else(|| Arc::new(LoggerRegistry::new()));

        let (evaluations_api, transport) = match (options.evaluations_api, options.transport) {
            (Some(api), Some(transport)) => (api, transport),
            (api, transport) => {
                let http = Arc::new(HttpApi::new(HttpApiConfig {
                    base_url: options.base_url.clone(),
                    sdk_key: options.sdk_key.clone(),
                    sdk_metadata: options.sdk_metadata,
                }));
                (
                    api.unwrap_or_else(|| http.clone() as Arc<dyn EvaluationsApi>),
                    transport.unwrap_or(http as Arc<dyn EventTransport>),
                )
            }
        };

        let logger = EventLogger::new(
            options.sdk_key.clone(),
            EventLoggerOptions {
                max_queue_size: options.max_queue_size,
                flush_interval: options.flush_interval,
                disable_logging: options.disable_logging,
                sdk_metadata: options.sdk_metadata,
            },
            transport,
            storage.clone(),
            visibility,
            registry,
        );

        let adapter = EvaluationsDataAdapter::new(options.sdk_key, storage, evaluations_api);

        Client {
            user: RwLock::new(user),
            store: Arc::new(EvaluationStore::new()),
            adapter,
            logger,
        }
    }

    /// Initialize from already-known data only (in-memory bootstrap or earlier results). Never
    /// performs I/O.
    pub fn initialize_sync(&self) {
        self.logger.start();

        let user = self.current_user();
        if let Some(result) = self.adapter.get_data_sync(&user) {
            self.store.set_values_from_data_adapter(&result);
        }
        self.store.finalize();
    }

    /// Initialize from the best available source: known in-memory data first, then the
    /// persisted cache and the network.
    pub async fn initialize_async(&self) {
        self.logger.start();
        self.resolve_data_for_current_user().await;
    }

    /// Switch to a different user. Evaluations answer with the `Loading` reason until the new
    /// user's data arrives; exposure dedup history is forgotten.
    pub async fn update_user_async(&self, user: User) {
        {
            let mut current = self
                .user
                .write()
                .expect("thread holding user lock should not panic");
            *current = user;
        }

        self.store.reset();
        self.logger.reset();
        self.resolve_data_for_current_user().await;
    }

    /// Evaluate a gate, logging an exposure. Returns `false` when the gate is unknown.
    pub fn check_gate(&self, name: &str) -> bool {
        self.get_feature_gate(name)
            .evaluation
            .map(|gate| gate.value)
            .unwrap_or(false)
    }

    /// Evaluate a gate with full provenance, logging an exposure.
    pub fn get_feature_gate(&self, name: &str) -> DetailedEvaluation<GateEvaluation> {
        let detailed = self.store.get_gate(name);
        self.logger.enqueue(Event::gate_exposure(
            Some(self.current_user()),
            name,
            &detailed,
        ));
        detailed
    }

    /// Evaluate a gate without logging an exposure. The lookup is still counted and reported in
    /// aggregate.
    pub fn get_feature_gate_without_exposure(
        &self,
        name: &str,
    ) -> DetailedEvaluation<GateEvaluation> {
        self.logger.increment_non_exposure_count(name);
        self.store.get_gate(name)
    }

    /// Evaluate a dynamic config, logging an exposure.
    pub fn get_dynamic_config(&self, name: &str) -> DetailedEvaluation<ConfigEvaluation> {
        let detailed = self.store.get_config(name);
        self.logger.enqueue(Event::config_exposure(
            Some(self.current_user()),
            name,
            &detailed,
        ));
        detailed
    }

    /// Evaluate a dynamic config without logging an exposure. The lookup is still counted and
    /// reported in aggregate.
    pub fn get_dynamic_config_without_exposure(
        &self,
        name: &str,
    ) -> DetailedEvaluation<ConfigEvaluation> {
        self.logger.increment_non_exposure_count(name);
        self.store.get_config(name)
    }

    /// Evaluate an experiment, logging an exposure. Experiments share the dynamic config
    /// namespace.
    pub fn get_experiment(&self, name: &str) -> DetailedEvaluation<ConfigEvaluation> {
        self.get_dynamic_config(name)
    }

    /// Evaluate a layer. No exposure is logged until a parameter is read via
    /// [`Client::get_layer_parameter`].
    pub fn get_layer(&self, name: &str) -> DetailedEvaluation<LayerEvaluation> {
        self.store.get_layer(name)
    }

    /// Read one parameter out of a layer, logging a layer exposure attributed to the experiment
    /// that controls the parameter (or none, for undelegated parameters).
    pub fn get_layer_parameter(
        &self,
        layer_name: &str,
        parameter: &str,
    ) -> Option<serde_json::Value> {
        let detailed = self.store.get_layer(layer_name);
        self.logger.enqueue(Event::layer_exposure(
            Some(self.current_user()),
            layer_name,
            parameter,
            &detailed,
        ));

        detailed
            .evaluation
            .and_then(|layer| layer.value.get(parameter).cloned())
    }

    /// Enqueue a custom event. Events without a user are attributed to the current user.
    pub fn log_event(&self, mut event: Event) {
        if event.user.is_none() {
            event.user = Some(self.current_user());
        }
        self.logger.enqueue(event);
    }

    /// Drain the event queue now.
    pub async fn flush(&self) {
        self.logger.flush().await;
    }

    /// Stop scheduled operation and deliver anything still queued.
    pub async fn shutdown(&self) {
        self.logger.stop().await;
    }

    /// The evaluation store, for bindings that consume lookups directly.
    pub fn evaluation_store(&self) -> Arc<EvaluationStore> {
        self.store.clone()
    }

    /// The data adapter, for bootstrap injection and prefetching.
    pub fn data_adapter(&self) -> &EvaluationsDataAdapter {
        &self.adapter
    }

    /// The event logger, for telemetry producers and flush listeners.
    pub fn event_logger(&self) -> &EventLogger {
        &self.logger
    }

    async fn resolve_data_for_current_user(&self) {
        let user = self.current_user();

        let current = self.adapter.get_data_sync(&user);
        if let Some(result) = &current {
            self.store.set_values_from_data_adapter(result);
        }

        if let Some(result) = self.adapter.get_data_async(current.as_ref(), &user).await {
            self.store.set_values_from_data_adapter(&result);
        }

        self.store.finalize();
    }

    fn current_user(&self) -> User {
        self.user
            .read()
            .expect("thread holding user lock should not panic")
            .clone()
    }
}
