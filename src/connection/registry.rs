//! Subscription registry
//!
//! Maps event types to the listeners interested in them. Registering returns a
//! [`Subscription`] handle; dropping the handle removes exactly that listener, and an
//! event type whose last listener goes away is removed with it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::protocol::InboundMessage;

/// Callback invoked for every message of a subscribed type
pub type Listener = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    /// Listeners per event type, in registration order
    entries: HashMap<String, Vec<(u64, Listener)>>,
}

impl RegistryInner {
    fn remove(&mut self, event_type: &str, id: u64) -> bool {
        let Some(listeners) = self.entries.get_mut(event_type) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.entries.remove(event_type);
        }
        removed
    }
}

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked
    pub failed: usize,
}

/// Shared registry of listeners keyed by event type
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event_types = self.inner.lock().entries.len();
        f.debug_struct("SubscriptionRegistry")
            .field("event_types", &event_types)
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event_type`
    ///
    /// Other listeners for the same type are kept; registering the same closure twice
    /// registers it twice.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .entries
            .entry(event_type.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        debug!("Subscribed listener {} to '{}'", id, event_type);

        Subscription {
            registry: Arc::downgrade(&self.inner),
            event_type,
            id,
            active: true,
        }
    }

    /// Remove every listener for `event_type`, returning how many were removed
    pub fn unsubscribe_all(&self, event_type: &str) -> usize {
        let removed = self
            .inner
            .lock()
            .entries
            .remove(event_type)
            .map_or(0, |listeners| listeners.len());
        if removed > 0 {
            debug!("Removed {} listeners for '{}'", removed, event_type);
        }
        removed
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .lock()
            .entries
            .get(event_type)
            .map_or(0, Vec::len)
    }

    pub fn has_event_type(&self, event_type: &str) -> bool {
        self.inner.lock().entries.contains_key(event_type)
    }

    /// Number of event types with at least one listener
    pub fn event_type_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Invoke every listener for the message's type, in registration order
    ///
    /// A panicking listener is logged and skipped; the rest still run. The lock is not
    /// held while listeners run, so they may subscribe or unsubscribe freely.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let listeners: Vec<Listener> = match self.inner.lock().entries.get(&message.event_type) {
            Some(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => {
                debug!("No listeners for '{}'", message.event_type);
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        "Listener for '{}' panicked: {}",
                        message.event_type,
                        panic_message(&*panic)
                    );
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Handle for one registered listener; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    registry: Weak<Mutex<RegistryInner>>,
    event_type: String,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Remove the listener now
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep the listener registered for the registry's lifetime
    pub fn detach(mut self) {
        self.active = false;
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(inner) = self.registry.upgrade() {
            if inner.lock().remove(&self.event_type, self.id) {
                debug!("Unsubscribed listener {} from '{}'", self.id, self.event_type);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::InboundPayload;
    use serde_json::Value;

    fn message(event_type: &str) -> InboundMessage {
        InboundMessage {
            event_type: event_type.to_string(),
            session_id: None,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            payload: InboundPayload::Json(Value::Null),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(&InboundMessage) + Send + Sync {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        move |msg: &InboundMessage| log.lock().push(format!("{}:{}", tag, msg.event_type))
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = registry.subscribe("update", recorder(&log, "a"));
        let _b = registry.subscribe("update", recorder(&log, "b"));
        let _c = registry.subscribe("other", recorder(&log, "c"));

        let report = registry.dispatch(&message("update"));
        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock(), vec!["a:update", "b:update"]);
    }

    #[test]
    fn test_drop_removes_only_that_listener() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("update", recorder(&log, "a"));
        let _b = registry.subscribe("update", recorder(&log, "b"));
        drop(a);

        assert_eq!(registry.listener_count("update"), 1);
        registry.dispatch(&message("update"));
        assert_eq!(*log.lock(), vec!["b:update"]);
    }

    #[test]
    fn test_last_unsubscribe_removes_event_type() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let only = registry.subscribe("update", recorder(&log, "a"));
        assert!(registry.has_event_type("update"));

        only.unsubscribe();
        assert!(!registry.has_event_type("update"));
        assert_eq!(registry.event_type_count(), 0);

        let report = registry.dispatch(&message("update"));
        assert_eq!(report, DispatchReport::default());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_same_callback_registered_twice() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let callback = Arc::new(recorder(&log, "x"));

        let first = Arc::clone(&callback);
        let second = Arc::clone(&callback);
        let _one = registry.subscribe("update", move |m: &InboundMessage| first(m));
        let _two = registry.subscribe("update", move |m: &InboundMessage| second(m));

        registry.dispatch(&message("update"));
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_unsubscribe_all() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = registry.subscribe("update", recorder(&log, "a"));
        let _b = registry.subscribe("update", recorder(&log, "b"));
        let _c = registry.subscribe("other", recorder(&log, "c"));

        assert_eq!(registry.unsubscribe_all("update"), 2);
        assert_eq!(registry.unsubscribe_all("update"), 0);
        assert!(!registry.has_event_type("update"));
        assert!(registry.has_event_type("other"));

        // Handle outliving a coarse unsubscribe is harmless
        drop(a);
        assert_eq!(registry.listener_count("other"), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = SubscriptionRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = registry.subscribe("update", recorder(&log, "a"));
        let _boom = registry.subscribe("update", |_: &InboundMessage| panic!("listener failure"));
        let _c = registry.subscribe("update", recorder(&log, "c"));

        let report = registry.dispatch(&message("update"));
        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });

        registry.dispatch(&message("update"));
        assert_eq!(*log.lock(), vec!["a:update", "c:update", "a:update", "c:update"]);
    }

    #[test]
    fn test_listener_can_unsubscribe_during_dispatch() {
        let registry = SubscriptionRegistry::new();
        let inner = registry.clone();
        let _sub = registry.subscribe("update", move |_: &InboundMessage| {
            inner.unsubscribe_all("update");
        });

        registry.dispatch(&message("update"));
        assert!(!registry.has_event_type("update"));
    }

    #[test]
    fn test_detached_subscription_stays_registered() {
        let registry = SubscriptionRegistry::new();
        registry.subscribe("update", |_: &InboundMessage| {}).detach();
        assert_eq!(registry.listener_count("update"), 1);
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry = SubscriptionRegistry::new();
        let sub = registry.subscribe("update", |_: &InboundMessage| {});
        drop(registry);
        drop(sub);
    }
}
