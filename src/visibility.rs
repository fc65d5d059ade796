//! Foreground/background visibility observation.
//!
//! The event logger reacts to visibility transitions (flush on background, retry persisted
//! failed logs on foreground). Which notion of "visible" applies is up to the embedder: a
//! browser binding maps document visibility, a mobile binding maps app lifecycle. The core only
//! sees transitions as injected messages, which keeps the scheduler testable without a platform
//! event loop.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Environment visibility as seen by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Foreground,
    Background,
}

/// Callback invoked on every visibility transition.
pub type VisibilityListener = Box<dyn Fn(VisibilityState) + Send + Sync>;

/// Source of visibility state and transitions.
pub trait VisibilityNotifier: Send + Sync {
    fn is_currently_visible(&self) -> bool;

    /// Register a listener for future transitions.
    fn subscribe(&self, listener: VisibilityListener);
}

/// A concrete [`VisibilityNotifier`] that platform glue pushes transitions into.
///
/// Starts in the foreground. Bindings call [`VisibilityRelay::set_state`] from their native
/// visibility hook; subscribers (the event logger) are notified synchronously.
pub struct VisibilityRelay {
    visible: AtomicBool,
    listeners: Mutex<Vec<VisibilityListener>>,
}

impl Default for VisibilityRelay {
    fn default() -> Self {
        VisibilityRelay::new()
    }
}

impl VisibilityRelay {
    pub fn new() -> VisibilityRelay {
        VisibilityRelay {
            visible: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Inject a visibility transition, fanning it out to all subscribers.
    pub fn set_state(&self, state: VisibilityState) {
        self.visible
            .store(state == VisibilityState::Foreground, Ordering::SeqCst);

        let listeners = self
            .listeners
            .lock()
            .expect("thread holding visibility listeners lock should not panic");

        for listener in listeners.iter() {
            listener(state);
        }
    }
}

impl VisibilityNotifier for VisibilityRelay {
    fn is_currently_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn subscribe(&self, listener: VisibilityListener) {
        self.listeners
            .lock()
            .expect("thread holding visibility listeners lock should not panic")
            .push(listener);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_visible() {
        let relay = VisibilityRelay::new();
        assert!(relay.is_currently_visible());
    }

    #[test]
    fn notifies_subscribers_of_transitions() {
        let relay = VisibilityRelay::new();
        let background_count = Arc::new(AtomicUsize::new(0));

        let seen = background_count.clone();
        relay.subscribe(Box::new(move |state| {
            if state == VisibilityState::Background {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));

        relay.set_state(VisibilityState::Background);
        assert!(!relay.is_currently_visible());
        assert_eq!(background_count.load(Ordering::SeqCst), 1);

        relay.set_state(VisibilityState::Foreground);
        assert!(relay.is_currently_visible());
        assert_eq!(background_count.load(Ordering::SeqCst), 1);
    }
}
