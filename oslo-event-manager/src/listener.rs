//! Listener registry and event fan-out.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use oslo_parser::OpenStackEvent;

/// Callback interface for receiving parsed notification events.
///
/// Implementations must be thread-safe: events arrive concurrently from the
/// broker workers of every subscribed service. A closure
/// `Fn(&OpenStackEvent)` works directly.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &OpenStackEvent);
}

impl<F> EventListener for F
where
    F: Fn(&OpenStackEvent) + Send + Sync,
{
    fn on_event(&self, event: &OpenStackEvent) {
        self(event)
    }
}

/// Ordered listener collection with snapshot-on-read iteration.
///
/// Dispatch clones the current listener list and walks the clone, so
/// registration order is preserved for any one event and mutation never
/// blocks or tears an in-flight fan-out.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    /// Remove a previously added listener, matching by identity.
    pub fn remove(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.read().expect("listener lock poisoned").len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.read().expect("listener lock poisoned").clone()
    }

    /// Deliver an event to every listener. A panicking listener is logged
    /// and never suppresses the listeners after it; dispatch is at-most-once
    /// per listener with no retry.
    pub fn dispatch(&self, event: &OpenStackEvent) {
        for listener in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                tracing::error!(
                    event_type = %event.event_type,
                    cluster = %event.cluster_id,
                    "error in event listener"
                );
            }
        }
    }
}
