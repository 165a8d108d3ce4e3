//! In-process publish/subscribe hub for operations.
//!
//! `publish` runs every registered callback in registration order and then
//! returns. Callbacks must not block: stream connections hand the operation
//! to their own bounded queue, the snapshot correlator completes a oneshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::operation::Operation;

/// Callback invoked for every published operation.
pub type OperationCallback = Arc<dyn Fn(&Operation) + Send + Sync>;

/// Identifies one registration on the bus. Required by [`OperationBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscriber {
    handle: SubscriptionHandle,
    callback: OperationCallback,
}

/// Registry of subscribers. The bus exclusively owns it.
#[derive(Default)]
pub struct OperationBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl OperationBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a callback and return the handle needed to remove it.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Operation) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut registry = self.registry();
        registry.push(Subscriber {
            handle,
            callback: Arc::new(callback),
        });
        debug!(subscription = handle.0, subscribers = registry.len(), "Bus subscribe");
        handle
    }

    /// Register a callback that is removed when the returned guard drops.
    pub fn subscribe_guarded<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&Operation) + Send + Sync + 'static,
    {
        let handle = self.subscribe(callback);
        Subscription {
            bus: Arc::downgrade(self),
            handle,
        }
    }

    /// Remove a registration. Returns false for unknown or already-removed handles.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut registry = self.registry();
        let before = registry.len();
        registry.retain(|s| s.handle != handle);
        let removed = registry.len() != before;
        if removed {
            debug!(subscription = handle.0, subscribers = registry.len(), "Bus unsubscribe");
        }
        removed
    }

    /// Deliver `op` to every current subscriber, in registration order.
    ///
    /// The registry lock is released before callbacks run, so a callback may
    /// unsubscribe itself. Returns the number of callbacks invoked.
    pub fn publish(&self, op: &Operation) -> usize {
        let callbacks: Vec<OperationCallback> = self
            .registry()
            .iter()
            .map(|s| s.callback.clone())
            .collect();

        for callback in &callbacks {
            callback(op);
        }

        debug!(kind = %op.kind, delivered = callbacks.len(), "Published operation");
        callbacks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().len()
    }
}

/// RAII registration: unsubscribes from the bus when dropped.
pub struct Subscription {
    bus: Weak<OperationBus>,
    handle: SubscriptionHandle,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn op(kind: &str) -> Operation {
        Operation::new(kind, Map::new())
    }

    fn recorder(bus: &OperationBus) -> (SubscriptionHandle, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = bus.subscribe(move |op| sink.lock().unwrap().push(op.kind.clone()));
        (handle, seen)
    }

    #[test]
    fn test_publish_reaches_every_subscriber_in_order() {
        let bus = OperationBus::new();
        let (_a, seen_a) = recorder(&bus);
        let (_b, seen_b) = recorder(&bus);

        assert_eq!(bus.publish(&op("one")), 2);
        bus.publish(&op("two"));

        assert_eq!(*seen_a.lock().unwrap(), vec!["one", "two"]);
        assert_eq!(*seen_b.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_late_subscriber_sees_only_later_operations() {
        let bus = OperationBus::new();
        bus.publish(&op("early"));
        let (_h, seen) = recorder(&bus);
        bus.publish(&op("late"));
        assert_eq!(*seen.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let bus = OperationBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(move |_| order.lock().unwrap().push(i));
        }
        bus.publish(&op("x"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = OperationBus::new();
        let (handle, seen) = recorder(&bus);
        assert_eq!(bus.subscriber_count(), 1);

        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        assert_eq!(bus.subscriber_count(), 0);

        assert_eq!(bus.publish(&op("ignored")), 0);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_handle_is_noop() {
        let bus = OperationBus::new();
        let (_mine, _) = recorder(&bus);
        assert!(!bus.unsubscribe(SubscriptionHandle(999)));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_guard_unsubscribes_on_drop() {
        let bus = Arc::new(OperationBus::new());
        let guard = bus.subscribe_guarded(|_| {});
        assert_eq!(bus.subscriber_count(), 1);
        drop(guard);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let bus = Arc::new(OperationBus::new());
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&bus);
        let own = slot.clone();
        let handle = bus.subscribe(move |_| {
            if let (Some(bus), Some(h)) = (weak.upgrade(), *own.lock().unwrap()) {
                bus.unsubscribe(h);
            }
        });
        *slot.lock().unwrap() = Some(handle);

        assert_eq!(bus.publish(&op("first")), 1);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(&op("second")), 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = OperationBus::new();
        assert_eq!(bus.publish(&op("nobody")), 0);
    }
}
