//! Buffering, flush scheduling, and guaranteed-best-effort delivery of telemetry events.
//!
//! [`EventLogger`] owns the outgoing queue. Flushes are triggered by queue size, a one-shot
//! "quick flush" shortly after startup, a periodic timer, backgrounding, and shutdown. A failed
//! delivery parks the batch in storage; it is replayed at the next startup and whenever the
//! environment regains the foreground.
use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::time::{interval_at, Duration, Instant};

use crate::events::dedup::ExposureDeduper;
use crate::events::Event;
use crate::network::EventTransport;
use crate::sdk_metadata::{EventMetaData, SdkMetadata};
use crate::storage::{self, StorageGateway};
use crate::visibility::{VisibilityNotifier, VisibilityState};

const DEFAULT_MAX_QUEUE_SIZE: usize = 50;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// The very first event enqueued in a session schedules one flush this long after creation, so
/// short-lived sessions are not held hostage by the interval timer.
const QUICK_FLUSH_WINDOW: Duration = Duration::from_millis(200);

/// Ceiling on persisted failed events. Oldest entries are trimmed first.
const MAX_FAILED_LOGS: usize = 500;

/// Storage-scoped identity used for dedup when an event has no user.
const NO_USER_KEY: &str = "no-user";

/// Callback invoked with the delivered events after every successful flush.
pub type FlushListener = Box<dyn Fn(&[Event]) + Send + Sync>;

/// Why a persisted failed batch is being retried. Determines when the batch is removed from
/// storage: at startup it is removed before the resend (a crashing retry must not replay
/// twice), on refocus only after a successful resend (a failing batch stays retryable).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryTrigger {
    Startup,
    GainedFocus,
}

/// Configuration for [`EventLogger`].
#[derive(Debug, Clone)]
pub struct EventLoggerOptions {
    /// Queue length beyond which a fire-and-forget flush is triggered.
    pub max_queue_size: usize,
    /// Period of the unconditional background flush timer.
    pub flush_interval: Duration,
    /// When set, batches skip the network entirely and go straight to the failed-log store.
    pub disable_logging: bool,
    /// SDK identification attached to delivery requests.
    pub sdk_metadata: SdkMetadata,
}

impl Default for EventLoggerOptions {
    fn default() -> EventLoggerOptions {
        EventLoggerOptions {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            disable_logging: false,
            sdk_metadata: SdkMetadata {
                name: "gatehouse-core",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// Registry of live loggers keyed by SDK key.
///
/// An explicit object rather than a process global: the owning client (or the embedder, when
/// sharing across clients) decides its scope. Registering a logger under a key that is already
/// taken supersedes the previous logger: its flush timer self-cancels at the next tick.
#[derive(Default)]
pub struct LoggerRegistry {
    loggers: Mutex<HashMap<String, Weak<LoggerInner>>>,
}

impl LoggerRegistry {
    pub fn new() -> LoggerRegistry {
        LoggerRegistry::default()
    }

    fn register(&self, sdk_key: &str, inner: &Arc<LoggerInner>) {
        let mut loggers = self
            .loggers
            .lock()
            .expect("thread holding logger registry lock should not panic");

        let previous = loggers.insert(sdk_key.to_owned(), Arc::downgrade(inner));
        if let Some(previous) = previous.and_then(|weak| weak.upgrade()) {
            if !Arc::ptr_eq(&previous, inner) {
                previous.supersede();
            }
        }
    }

    fn deregister(&self, sdk_key: &str, inner: &Arc<LoggerInner>) {
        let mut loggers = self
            .loggers
            .lock()
            .expect("thread holding logger registry lock should not panic");

        let registered_self = loggers
            .get(sdk_key)
            .and_then(|weak| weak.upgrade())
            .is_some_and(|registered| Arc::ptr_eq(&registered, inner));
        if registered_self {
            loggers.remove(sdk_key);
        }
    }
}

struct LoggerInner {
    sdk_key: String,
    options: EventLoggerOptions,
    transport: Arc<dyn EventTransport>,
    storage: Arc<dyn StorageGateway>,
    visibility: Arc<dyn VisibilityNotifier>,
    registry: Arc<LoggerRegistry>,
    queue: Mutex<Vec<Event>>,
    deduper: ExposureDeduper,
    non_exposed_checks: Mutex<HashMap<String, u64>>,
    flush_listeners: Mutex<Vec<FlushListener>>,
    created_at: Instant,
    has_run_quick_flush: AtomicBool,
    /// Stamp owned by the currently-live flush timer. The timer task checks it before each tick
    /// and self-cancels when superseded, so hot-reinitialization under the same key leaks no
    /// timers.
    timer_generation: AtomicU64,
}

/// Buffers telemetry events and drains them per the flush triggers described in the module docs.
///
/// Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<LoggerInner>,
}

impl EventLogger {
    pub fn new(
        sdk_key: impl Into<String>,
        options: EventLoggerOptions,
        transport: Arc<dyn EventTransport>,
        storage: Arc<dyn StorageGateway>,
        visibility: Arc<dyn VisibilityNotifier>,
        registry: Arc<LoggerRegistry>,
    ) -> EventLogger {
        EventLogger {
            inner: Arc::new(LoggerInner {
                sdk_key: sdk_key.into(),
                options,
                transport,
                storage,
                visibility,
                registry,
                queue: Mutex::new(Vec::new()),
                deduper: ExposureDeduper::new(),
                non_exposed_checks: Mutex::new(HashMap::new()),
                flush_listeners: Mutex::new(Vec::new()),
                created_at: Instant::now(),
                has_run_quick_flush: AtomicBool::new(false),
                timer_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Gate an event through dedup and append it to the queue.
    ///
    /// Runs synchronously on the calling path; any flush it triggers is fire-and-forget.
    pub fn enqueue(&self, event: Event) {
        let user_key = event
            .user
            .as_ref()
            .map(|user| user.storage_key(&self.inner.sdk_key))
            .unwrap_or_else(|| NO_USER_KEY.to_owned());

        if !self.inner.deduper.should_log(&event, &user_key) {
            return;
        }

        let queue_len = {
            let mut queue = self
                .inner
                .queue
                .lock()
                .expect("thread holding event queue lock should not panic");
            queue.push(event.normalized());
            queue.len()
        };
        log::debug!(target: "gatehouse", "enqueued event ({} queued)", queue_len);

        self.inner.clone().quick_flush_if_needed();

        if queue_len > self.inner.options.max_queue_size {
            self.inner.clone().flush_and_forget();
        }
    }

    /// Count an evaluation lookup that did not produce an exposure. Folded into a single
    /// aggregate event at the next flush.
    pub fn increment_non_exposure_count(&self, name: &str) {
        let mut checks = self
            .inner
            .non_exposed_checks
            .lock()
            .expect("thread holding non-exposure counters lock should not panic");
        *checks.entry(name.to_owned()).or_insert(0) += 1;
    }

    /// Forget dedup history. Called when the client switches users.
    pub fn reset(&self) {
        self.inner.deduper.reset();
    }

    /// Register a listener notified with the delivered events after each successful flush.
    pub fn on_logs_flushed(&self, listener: FlushListener) {
        self.inner
            .flush_listeners
            .lock()
            .expect("thread holding flush listeners lock should not panic")
            .push(listener);
    }

    /// Begin scheduled operation: register in the registry, watch visibility, replay any batch
    /// persisted by a previous session, and start the periodic flush timer.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        inner.registry.register(&inner.sdk_key, inner);

        let weak = Arc::downgrade(inner);
        let handle = tokio::runtime::Handle::current();
        inner.visibility.subscribe(Box::new(move |state| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match state {
                VisibilityState::Background => {
                    // Best-effort, not awaited: a cancelled send is recovered by the
                    // failed-log store.
                    handle.spawn(async move {
                        inner.flush().await;
                    });
                }
                VisibilityState::Foreground => {
                    handle.spawn(async move {
                        inner.retry_failed_logs(RetryTrigger::GainedFocus).await;
                    });
                }
            }
        }));

        let startup = inner.clone();
        tokio::spawn(async move {
            startup.retry_failed_logs(RetryTrigger::Startup).await;
        });

        inner.clone().start_background_flush_interval();
    }

    /// Cancel the flush timer, deregister, and perform one final awaited flush so no telemetry
    /// is silently dropped on teardown.
    pub async fn stop(&self) {
        self.inner.supersede();
        self.inner.registry.deregister(&self.inner.sdk_key, &self.inner);
        self.inner.flush().await;
    }

    /// Drain the queue and deliver it as one batch. An empty queue performs no I/O.
    pub async fn flush(&self) {
        self.inner.flush().await;
    }

    #[cfg(test)]
    fn queued_event_count(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }
}

impl LoggerInner {
    /// Invalidate the live flush timer (it checks this stamp before each tick).
    fn supersede(&self) {
        self.timer_generation.fetch_add(1, Ordering::SeqCst);
    }

    fn start_background_flush_interval(self: Arc<Self>) {
        let generation = self.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let period = self.options.flush_interval;
        let weak = Arc::downgrade(&self);

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.timer_generation.load(Ordering::SeqCst) != generation {
                    log::debug!(target: "gatehouse", "flush timer superseded, cancelling");
                    break;
                }
                inner.flush().await;
            }
        });
    }

    fn quick_flush_if_needed(self: Arc<Self>) {
        if self.has_run_quick_flush.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.created_at.elapsed() > QUICK_FLUSH_WINDOW {
            return;
        }

        let weak = Arc::downgrade(&self);
        tokio::spawn(async move {
            tokio::time::sleep(QUICK_FLUSH_WINDOW).await;
            if let Some(inner) = weak.upgrade() {
                inner.flush().await;
            }
        });
    }

    fn flush_and_forget(self: Arc<Self>) {
        tokio::spawn(async move {
            self.flush().await;
        });
    }

    async fn flush(&self) {
        self.append_and_reset_non_exposed_checks();

        let events = {
            let mut queue = self
                .queue
                .lock()
                .expect("thread holding event queue lock should not panic");
            mem::take(&mut *queue)
        };

        if events.is_empty() {
            return;
        }

        self.send_events(events).await;
    }

    async fn send_events(&self, events: Vec<Event>) -> bool {
        if self.options.disable_logging {
            self.save_failed_logs(events).await;
            return false;
        }

        let metadata = EventMetaData::from(&self.options.sdk_metadata);
        let in_background = !self.visibility.is_currently_visible();

        // POST requests may be cancelled when navigation away occurs, so prefer the beacon
        // path while backgrounded when the transport has one.
        let success = if in_background && self.transport.is_beacon_supported() {
            self.transport.send_beacon(&events, &metadata).await
        } else {
            match self.transport.post_events(&events, &metadata).await {
                Ok(status) => (200..300).contains(&status),
                Err(err) => {
                    log::warn!(target: "gatehouse", "event delivery failed: {}", err);
                    false
                }
            }
        };

        if success {
            log::debug!(target: "gatehouse", "flushed {} events", events.len());
            self.notify_flush_listeners(&events);
            true
        } else {
            log::warn!(target: "gatehouse", "failed to flush events");
            self.save_failed_logs(events).await;
            false
        }
    }

    fn append_and_reset_non_exposed_checks(&self) {
        let checks = {
            let mut checks = self
                .non_exposed_checks
                .lock()
                .expect("thread holding non-exposure counters lock should not panic");
            mem::take(&mut *checks)
        };

        if checks.is_empty() {
            return;
        }

        self.queue
            .lock()
            .expect("thread holding event queue lock should not panic")
            .push(Event::non_exposed_checks(checks));
    }

    fn notify_flush_listeners(&self, events: &[Event]) {
        let listeners = self
            .flush_listeners
            .lock()
            .expect("thread holding flush listeners lock should not panic");
        for listener in listeners.iter() {
            listener(events);
        }
    }

    async fn save_failed_logs(&self, mut events: Vec<Event>) {
        let overflow = events.len().saturating_sub(MAX_FAILED_LOGS);
        if overflow > 0 {
            events.drain(..overflow);
        }

        let key = self.failed_logs_key();
        if let Err(err) = storage::set_object(&*self.storage, &key, &events).await {
            log::warn!(target: "gatehouse", "unable to save failed logs to storage: {}", err);
        }
    }

    async fn retry_failed_logs(self: Arc<Self>, trigger: RetryTrigger) {
        self.storage.when_ready().await;

        let key = self.failed_logs_key();
        let Some(events) = storage::get_object::<Vec<Event>>(&*self.storage, &key).await else {
            return;
        };

        if trigger == RetryTrigger::Startup {
            // Removed before the resend so a crash mid-retry cannot replay the batch twice.
            // A fresh failure re-persists it below.
            if let Err(err) = self.storage.remove(&key).await {
                log::warn!(target: "gatehouse", "failed to clear persisted logs: {}", err);
            }
        }

        let success = self.send_events(events).await;

        if success && trigger == RetryTrigger::GainedFocus {
            if let Err(err) = self.storage.remove(&key).await {
                log::warn!(target: "gatehouse", "failed to clear persisted logs: {}", err);
            }
        }
    }

    fn failed_logs_key(&self) -> String {
        format!(
            "{}.failed_logs.{:x}",
            storage::STORAGE_NAMESPACE,
            md5::compute(self.sdk_key.as_bytes())
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU16;

    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::visibility::VisibilityRelay;
    use crate::Result;

    #[derive(Default)]
    struct MockTransport {
        status: AtomicU16,
        posts: Mutex<Vec<Vec<Event>>>,
        beacons: Mutex<Vec<Vec<Event>>>,
        beacon_supported: bool,
    }

    impl MockTransport {
        fn with_status(status: u16) -> MockTransport {
            MockTransport {
                status: AtomicU16::new(status),
                ..MockTransport::default()
            }
        }

        fn post_count(&self) -> usize {
            self.posts.lock().unwrap().len()
        }

        fn posted_names(&self, batch: usize) -> Vec<String> {
            self.posts.lock().unwrap()[batch]
                .iter()
                .map(|event| event.event_name.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl EventTransport for MockTransport {
        async fn post_events(&self, events: &[Event], _metadata: &EventMetaData) -> Result<u16> {
            self.posts.lock().unwrap().push(events.to_vec());
            Ok(self.status.load(Ordering::SeqCst))
        }

        fn is_beacon_supported(&self) -> bool {
            self.beacon_supported
        }

        async fn send_beacon(&self, events: &[Event], _metadata: &EventMetaData) -> bool {
            self.beacons.lock().unwrap().push(events.to_vec());
            true
        }
    }

    struct Harness {
        logger: EventLogger,
        transport: Arc<MockTransport>,
        storage: Arc<InMemoryStorage>,
        visibility: Arc<VisibilityRelay>,
    }

    fn harness(options: EventLoggerOptions, transport: MockTransport) -> Harness {
        let transport = Arc::new(transport);
        let storage = Arc::new(InMemoryStorage::new());
        let visibility = Arc::new(VisibilityRelay::new());
        let logger = EventLogger::new(
            "client-key",
            options,
            transport.clone(),
            storage.clone(),
            visibility.clone(),
            Arc::new(LoggerRegistry::new()),
        );
        Harness {
            logger,
            transport,
            storage,
            visibility,
        }
    }

    fn failed_logs_key() -> String {
        format!(
            "gatehouse.failed_logs.{:x}",
            md5::compute("client-key".as_bytes())
        )
    }

    async fn persisted_events(storage: &InMemoryStorage) -> Option<Vec<Event>> {
        storage::get_object::<Vec<Event>>(storage, &failed_logs_key()).await
    }

    #[tokio::test(start_paused = true)]
    async fn flushing_an_empty_queue_performs_no_io() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));

        h.logger.flush().await;

        assert_eq!(h.transport.post_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_flush_delivers_early_events_in_one_batch() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));

        h.logger.enqueue(Event::new(None, "first"));
        h.logger.enqueue(Event::new(None, "second"));

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(h.transport.post_count(), 1);
        assert_eq!(h.transport.posted_names(0), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn quick_flush_only_arms_within_the_window() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));

        tokio::time::sleep(Duration::from_millis(300)).await;
        h.logger.enqueue(Event::new(None, "late"));

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(h.transport.post_count(), 0);
        assert_eq!(h.logger.queued_event_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_overflow_triggers_a_flush() {
        let options = EventLoggerOptions {
            max_queue_size: 3,
            ..EventLoggerOptions::default()
        };
        let h = harness(options, MockTransport::with_status(202));

        // Enqueue past the quick-flush window so only the overflow trigger is in play.
        tokio::time::sleep(Duration::from_secs(1)).await;
        for i in 0..4 {
            h.logger.enqueue(Event::new(None, format!("event_{i}")));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.post_count(), 1);
        assert_eq!(h.transport.posted_names(0).len(), 4);
        assert_eq!(h.logger.queued_event_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timer_flushes_periodically() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));
        h.logger.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.logger.enqueue(Event::new(None, "buffered"));

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.transport.post_count(), 1);
        h.logger.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_the_timer_and_flushes_once_more() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));
        h.logger.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.logger.enqueue(Event::new(None, "tail"));
        h.logger.stop().await;

        assert_eq!(h.transport.post_count(), 1);
        assert_eq!(h.logger.queued_event_count(), 0);

        // The timer is dead: nothing further is delivered.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_persists_the_batch() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(500));

        h.logger.enqueue(Event::new(None, "doomed"));
        h.logger.flush().await;

        assert_eq!(h.logger.queued_event_count(), 0);
        let persisted = persisted_events(&h.storage).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].event_name, "doomed");
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_retry_clears_storage_only_on_success() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(500));
        h.logger.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.logger.enqueue(Event::new(None, "doomed"));
        h.logger.flush().await;
        assert!(persisted_events(&h.storage).await.is_some());

        // Still failing: the batch must survive the retry.
        h.visibility.set_state(VisibilityState::Foreground);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(persisted_events(&h.storage).await.is_some());

        // Service recovers: the retry delivers and clears storage.
        h.transport.status.store(202, Ordering::SeqCst);
        h.visibility.set_state(VisibilityState::Foreground);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(persisted_events(&h.storage).await.is_none());
        let last = h.transport.post_count() - 1;
        assert_eq!(h.transport.posted_names(last), vec!["doomed"]);
        h.logger.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn startup_retry_replays_persisted_batch() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));

        let orphaned = vec![Event::new(None, "from-last-session")];
        storage::set_object(&*h.storage, &failed_logs_key(), &orphaned)
            .await
            .unwrap();

        h.logger.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(persisted_events(&h.storage).await.is_none());
        assert_eq!(h.transport.post_count(), 1);
        assert_eq!(h.transport.posted_names(0), vec!["from-last-session"]);
        h.logger.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backgrounding_triggers_an_immediate_flush() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));
        h.logger.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        h.logger.enqueue(Event::new(None, "about-to-background"));
        h.visibility.set_state(VisibilityState::Background);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.post_count(), 1);
        h.logger.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn beacon_is_used_while_backgrounded_when_supported() {
        let mut transport = MockTransport::with_status(202);
        transport.beacon_supported = true;
        let h = harness(EventLoggerOptions::default(), transport);

        h.visibility.set_state(VisibilityState::Background);
        h.logger.enqueue(Event::new(None, "beaconed"));
        h.logger.flush().await;

        assert_eq!(h.transport.post_count(), 0);
        assert_eq!(h.transport.beacons.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_logging_redirects_batches_to_storage() {
        let options = EventLoggerOptions {
            disable_logging: true,
            ..EventLoggerOptions::default()
        };
        let h = harness(options, MockTransport::with_status(202));

        h.logger.enqueue(Event::new(None, "never-sent"));
        h.logger.flush().await;

        assert_eq!(h.transport.post_count(), 0);
        let persisted = persisted_events(&h.storage).await.unwrap();
        assert_eq!(persisted[0].event_name, "never-sent");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_log_store_is_capped_with_oldest_dropped() {
        let options = EventLoggerOptions {
            max_queue_size: 10_000,
            ..EventLoggerOptions::default()
        };
        let h = harness(options, MockTransport::with_status(500));

        tokio::time::sleep(Duration::from_secs(1)).await;
        for i in 0..MAX_FAILED_LOGS + 1 {
            h.logger.enqueue(Event::new(None, format!("event_{i}")));
        }
        h.logger.flush().await;

        let persisted = persisted_events(&h.storage).await.unwrap();
        assert_eq!(persisted.len(), MAX_FAILED_LOGS);
        assert_eq!(persisted[0].event_name, "event_1");
    }

    #[tokio::test(start_paused = true)]
    async fn non_exposure_counters_fold_into_one_event() {
        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));

        h.logger.increment_non_exposure_count("quiet_gate");
        h.logger.increment_non_exposure_count("quiet_gate");
        h.logger.increment_non_exposure_count("other_gate");
        h.logger.flush().await;

        assert_eq!(h.transport.post_count(), 1);
        {
            let batch = &h.transport.posts.lock().unwrap()[0];
            assert_eq!(batch.len(), 1);
            let checks = batch[0].metadata.as_ref().unwrap()["checks"].clone();
            assert_eq!(checks["quiet_gate"], 2);
            assert_eq!(checks["other_gate"], 1);
        }

        // Counters were reset: a second flush has nothing to send.
        h.logger.flush().await;
        assert_eq!(h.transport.post_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_exposures_are_suppressed_at_enqueue() {
        use crate::evaluations::{DetailedEvaluation, EvaluationDetails};

        let h = harness(EventLoggerOptions::default(), MockTransport::with_status(202));
        let detailed = DetailedEvaluation::<crate::evaluations::GateEvaluation> {
            evaluation: None,
            details: EvaluationDetails {
                reason: "Network:Unrecognized".to_owned(),
                lcut: Some(1),
                received_at: Some(2),
            },
        };

        h.logger
            .enqueue(Event::gate_exposure(None, "a_gate", &detailed));
        h.logger
            .enqueue(Event::gate_exposure(None, "a_gate", &detailed));

        assert_eq!(h.logger.queued_event_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn registering_a_second_logger_supersedes_the_first() {
        let registry = Arc::new(LoggerRegistry::new());
        let transport = Arc::new(MockTransport::with_status(202));
        let storage = Arc::new(InMemoryStorage::new());
        let visibility = Arc::new(VisibilityRelay::new());

        let make = || {
            EventLogger::new(
                "client-key",
                EventLoggerOptions::default(),
                transport.clone(),
                storage.clone(),
                visibility.clone(),
                registry.clone(),
            )
        };

        let first = make();
        first.start();
        let generation_after_start = first.inner.timer_generation.load(Ordering::SeqCst);

        let second = make();
        second.start();

        assert_ne!(
            first.inner.timer_generation.load(Ordering::SeqCst),
            generation_after_start,
            "first logger's timer should be invalidated"
        );

        // The superseded timer never delivers: only the second logger's timer flushes.
        tokio::time::sleep(Duration::from_secs(1)).await;
        first.enqueue(Event::new(None, "stranded"));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(transport.post_count(), 0);

        second.stop().await;
    }
}
