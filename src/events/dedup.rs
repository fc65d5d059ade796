//! Suppression of redundant exposure telemetry.
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::events::{now_ms, Event};

/// How long an identical exposure is considered redundant.
const DEDUPE_WINDOW: Duration = Duration::from_secs(60);

/// Ceiling on remembered dedup keys. Crossing it clears the map wholesale (an approximate
/// bound, not an LRU). Accepts occasional duplicate bursts in exchange for O(1) memory.
const MAX_DEDUPE_KEYS: usize = 1000;

/// Decides whether an exposure event is novel enough to enqueue.
///
/// Non-exposure events always pass. The decision runs synchronously on the calling path; there
/// is no suspension point here.
pub struct ExposureDeduper {
    window: Duration,
    last_seen: Mutex<HashMap<String, i64>>,
}

impl Default for ExposureDeduper {
    fn default() -> Self {
        ExposureDeduper::new()
    }
}

impl ExposureDeduper {
    pub fn new() -> ExposureDeduper {
        ExposureDeduper::with_window(DEDUPE_WINDOW)
    }

    /// Deduper with a custom window. Used by tests; production callers want [`ExposureDeduper::new`].
    pub(crate) fn with_window(window: Duration) -> ExposureDeduper {
        ExposureDeduper {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the event should be enqueued.
    ///
    /// A suppressed event does not refresh its key's timestamp, so a steady stream of identical
    /// exposures still logs once per window rather than never.
    pub fn should_log(&self, event: &Event, user_storage_key: &str) -> bool {
        if !event.is_exposure() {
            return true;
        }

        let key = [
            event.event_name.as_str(),
            user_storage_key,
            event.metadata_str("gate"),
            event.metadata_str("config"),
            event.metadata_str("ruleID"),
        ]
        .join("|");

        let now = now_ms();
        let mut last_seen = self
            .last_seen
            .lock()
            .expect("thread holding dedup lock should not panic");

        if let Some(previous) = last_seen.get(&key) {
            if now - previous < self.window.as_millis() as i64 {
                return false;
            }
        }

        if last_seen.len() > MAX_DEDUPE_KEYS {
            last_seen.clear();
        }

        last_seen.insert(key, now);
        true
    }

    /// Forget all seen exposures. Called when the client switches users.
    pub fn reset(&self) {
        self.last_seen
            .lock()
            .expect("thread holding dedup lock should not panic")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::events::GATE_EXPOSURE_NAME;

    fn exposure(gate: &str, rule_id: &str) -> Event {
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.insert("gate".to_owned(), gate.into());
        metadata.insert("ruleID".to_owned(), rule_id.into());
        Event {
            event_name: GATE_EXPOSURE_NAME.to_owned(),
            user: None,
            time: 0,
            metadata: Some(metadata),
            value: None,
            secondary_exposures: None,
        }
    }

    #[test]
    fn suppresses_identical_exposures_within_window() {
        let deduper = ExposureDeduper::new();
        let event = exposure("a_gate", "rule_1");

        assert!(deduper.should_log(&event, "user-key"));
        assert!(!deduper.should_log(&event, "user-key"));
    }

    #[test]
    fn distinct_rule_ids_are_not_deduped() {
        let deduper = ExposureDeduper::new();

        assert!(deduper.should_log(&exposure("a_gate", "rule_1"), "user-key"));
        assert!(deduper.should_log(&exposure("a_gate", "rule_2"), "user-key"));
    }

    #[test]
    fn distinct_users_are_not_deduped() {
        let deduper = ExposureDeduper::new();
        let event = exposure("a_gate", "rule_1");

        assert!(deduper.should_log(&event, "user-a"));
        assert!(deduper.should_log(&event, "user-b"));
    }

    #[test]
    fn allows_again_after_window_elapses() {
        let deduper = ExposureDeduper::with_window(Duration::from_millis(10));
        let event = exposure("a_gate", "rule_1");

        assert!(deduper.should_log(&event, "user-key"));
        assert!(!deduper.should_log(&event, "user-key"));

        std::thread::sleep(Duration::from_millis(15));

        assert!(deduper.should_log(&event, "user-key"));
    }

    #[test]
    fn custom_events_always_pass() {
        let deduper = ExposureDeduper::new();
        let event = Event::new(None, "purchase");

        assert!(deduper.should_log(&event, "user-key"));
        assert!(deduper.should_log(&event, "user-key"));
    }

    #[test]
    fn clears_wholesale_past_key_ceiling() {
        let deduper = ExposureDeduper::new();
        let first = exposure("gate_0", "rule");
        assert!(deduper.should_log(&first, "user-key"));

        // The ceiling check happens on insert, so it takes MAX + 1 further distinct keys for the
        // map to cross the limit and get cleared wholesale.
        for i in 1..=MAX_DEDUPE_KEYS + 1 {
            let event = exposure(&format!("gate_{i}"), "rule");
            assert!(deduper.should_log(&event, "user-key"));
        }

        // The map was cleared, so the very first exposure logs again inside its window.
        assert!(deduper.should_log(&first, "user-key"));
    }

    #[test]
    fn reset_forgets_seen_exposures() {
        let deduper = ExposureDeduper::new();
        let event = exposure("a_gate", "rule_1");

        assert!(deduper.should_log(&event, "user-key"));
        deduper.reset();
        assert!(deduper.should_log(&event, "user-key"));
    }
}
