//! Generic one-to-many publish/subscribe primitive.
//!
//! An [`EventBus`] delivers every published event to each subscriber, in
//! subscription order, on the publishing thread. Deliveries on one bus are
//! serialized, so a single bus observes its publishes in FIFO order even when
//! several threads publish concurrently. Publishing to the same bus from inside
//! one of its own handlers is allowed and is delivered depth-first.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{trace, warn};

/// A subscriber callback.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Capability token returned by [`EventBus::subscribe`].
///
/// Hand it back to [`EventBus::unsubscribe`] to stop receiving events.
/// Dropping the token does **not** unsubscribe.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a subscription token is the only way to unsubscribe"]
pub struct Subscription {
    id: u64,
}

impl Subscription {
    /// Numeric id of this subscription, unique per bus.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct BusInner<E> {
    name: &'static str,
    subscribers: RwLock<Vec<(u64, Handler<E>)>>,
    next_id: AtomicU64,
    delivery: ReentrantMutex<()>,
}

/// Cloneable handle to a shared subject. Clones publish to the same
/// subscriber set.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> EventBus<E> {
    /// Create a bus. `name` only appears in log output.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name,
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                delivery: ReentrantMutex::new(()),
            }),
        }
    }

    /// Register a handler. It receives every event published after this call.
    pub fn subscribe(&self, handler: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push((id, Arc::new(handler)));
        trace!(bus = self.inner.name, id, "subscribed");
        Subscription { id }
    }

    /// Remove a handler. Returns `false` if the token did not belong to this
    /// bus or was already removed.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self.inner.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription.id);
        before != subscribers.len()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Deliver `event` to every subscriber.
    ///
    /// A panicking handler is logged and skipped; remaining handlers still run.
    pub fn publish(&self, event: &E) {
        let _delivery = self.inner.delivery.lock();
        let handlers: Vec<(u64, Handler<E>)> = self.inner.subscribers.read().clone();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(
                    bus = self.inner.name,
                    id, "Subscriber panicked while handling an event; continuing"
                );
            }
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("name", &self.inner.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_publish_reaches_all_subscribers_in_order() {
        let bus: EventBus<u32> = EventBus::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let a = Arc::clone(&seen);
        let _s1 = bus.subscribe(move |e| a.lock().push(("a", *e)));
        let b = Arc::clone(&seen);
        let _s2 = bus.subscribe(move |e| b.lock().push(("b", *e)));

        bus.publish(&1);
        bus.publish(&2);

        assert_eq!(
            *seen.lock(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus: EventBus<u32> = EventBus::new("test");
        let count = Arc::new(AtomicU64::new(0));

        let c = Arc::clone(&count);
        let sub = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&1);
        assert!(bus.unsubscribe(sub));
        bus.publish(&2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_foreign_token_is_false() {
        let bus_a: EventBus<u32> = EventBus::new("a");
        let bus_b: EventBus<u32> = EventBus::new("b");
        let _keep = bus_a.subscribe(|_| {});
        let _first = bus_b.subscribe(|_| {});
        let foreign = bus_b.subscribe(|_| {});

        assert!(!bus_a.unsubscribe(foreign));
        assert_eq!(bus_a.subscriber_count(), 1);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let bus: EventBus<u32> = EventBus::new("test");
        let count = Arc::new(AtomicU64::new(0));

        let _bad = bus.subscribe(|_| panic!("boom"));
        let c = Arc::clone(&count);
        let _good = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&7);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_publish_does_not_deadlock() {
        let bus: EventBus<u32> = EventBus::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_bus = bus.clone();
        let s = Arc::clone(&seen);
        let _sub = bus.subscribe(move |e| {
            s.lock().push(*e);
            if *e == 1 {
                inner_bus.publish(&2);
            }
        });

        bus.publish(&1);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_concurrent_publishers_are_serialized_per_bus() {
        let bus: EventBus<(usize, usize)> = EventBus::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = bus.subscribe(move |e| s.lock().push(*e));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        bus.publish(&(t, i));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 200);
        for t in 0..4 {
            let per_thread: Vec<usize> = seen
                .iter()
                .filter(|(thread, _)| *thread == t)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(per_thread, (0..50).collect::<Vec<_>>());
        }
    }
}
