//! Callback registry for event subscriptions.
//!
//! This module provides a thread-safe registry for managing callbacks keyed by
//! a [`SubscriptionId`]. It backs the router's per-type handler tables, the
//! entity change subscribers and the client event stream.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::locks;

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type.
///
/// Callbacks receive a reference to the event and should not block for extended periods.
pub type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Thread-safe registry for managing event subscriptions.
///
/// The registry supports:
/// - Subscribing with unique, monotonically increasing IDs
/// - Unsubscribing by ID
/// - Emitting events to all active subscribers in subscription order
///
/// # Example
///
/// ```ignore
/// use boardsync_core::callback_registry::CallbackRegistry;
/// use std::sync::Arc;
///
/// let registry: CallbackRegistry<String> = CallbackRegistry::new();
///
/// let id = registry.subscribe(Arc::new(|event| {
///     println!("Event: {}", event);
/// }));
///
/// registry.emit(&"hello".to_string());
///
/// registry.unsubscribe(id);
/// ```
pub struct CallbackRegistry<E> {
    /// Callbacks keyed by ID; BTreeMap keeps subscription order.
    callbacks: RwLock<BTreeMap<SubscriptionId, Callback<E>>>,
    /// Counter for generating unique subscription IDs.
    next_id: AtomicU64,
}

impl<E> CallbackRegistry<E> {
    /// Create a new empty callback registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: Callback<E>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        locks::write(&self.callbacks).insert(id, callback);
        id
    }

    /// Unsubscribe.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        locks::write(&self.callbacks).remove(&id).is_some()
    }

    /// Emit an event to all registered callbacks, in subscription order.
    ///
    /// The callback list is snapshotted first, so a callback may subscribe,
    /// unsubscribe or emit again without deadlocking. A panicking callback
    /// does not affect the others. Returns the number of callbacks that
    /// completed without panicking.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<(SubscriptionId, Callback<E>)> = locks::read(&self.callbacks)
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let mut completed = 0;
        for (id, callback) in snapshot {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
            match outcome {
                Ok(()) => completed += 1,
                Err(_) => log::error!("[Callbacks] Subscriber {} panicked", id),
            }
        }
        completed
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        locks::read(&self.callbacks).len()
    }

    /// Check if there are any active subscriptions.
    pub fn has_subscribers(&self) -> bool {
        !locks::read(&self.callbacks).is_empty()
    }

    /// Clear all subscriptions.
    pub fn clear(&self) {
        locks::write(&self.callbacks).clear();
    }
}

impl<E> Default for CallbackRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CallbackRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_and_emit() {
        let registry: CallbackRegistry<u32> = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let _id = registry.subscribe(Arc::new(move |value| {
            counter_clone.fetch_add(*value as usize, Ordering::SeqCst);
        }));

        assert_eq!(registry.subscriber_count(), 1);
        assert_eq!(registry.emit(&3), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe() {
        let registry: CallbackRegistry<()> = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let counter_clone = Arc::clone(&counter);
        let id = registry.subscribe(Arc::new(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert_eq!(registry.subscriber_count(), 0);

        registry.emit(&());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_emit_in_subscription_order() {
        let registry: CallbackRegistry<()> = CallbackRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..5 {
            let order = Arc::clone(&order);
            registry.subscribe(Arc::new(move |_| order.lock().unwrap().push(n)));
        }

        registry.emit(&());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_callback_panic_isolation() {
        let registry: CallbackRegistry<()> = CallbackRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));

        registry.subscribe(Arc::new(|_| {
            panic!("Test panic");
        }));

        let counter_clone = Arc::clone(&counter);
        registry.subscribe(Arc::new(move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(registry.emit(&()), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_subscribe_during_emit() {
        let registry: Arc<CallbackRegistry<()>> = Arc::new(CallbackRegistry::new());

        let inner = Arc::clone(&registry);
        registry.subscribe(Arc::new(move |_| {
            inner.subscribe(Arc::new(|_| {}));
        }));

        assert_eq!(registry.emit(&()), 1);
        assert_eq!(registry.subscriber_count(), 2);
    }

    #[test]
    fn test_clear() {
        let registry: CallbackRegistry<()> = CallbackRegistry::new();
        registry.subscribe(Arc::new(|_| {}));
        registry.subscribe(Arc::new(|_| {}));
        registry.clear();
        assert!(!registry.has_subscribers());
    }
}
