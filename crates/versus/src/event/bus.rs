use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::types::{EventKind, GameEvent};

pub type EventHandler = Arc<dyn Fn(&GameEvent) + Send + Sync>;

/// Dispatch order on the bus. Higher priorities run first; equal priorities
/// run in subscription order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    priority: Priority,
    handler: EventHandler,
}

/// Synchronous publish/subscribe for game events.
///
/// A game keeps two of these: one for its own simulation and one fed by the
/// peer, so remote events never loop back onto the wire.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, priority: Priority, handler: F) -> SubscriptionId
    where
        F: Fn(&GameEvent) + Send + Sync + 'static,
    {
        self.insert(Some(kind), priority, Arc::new(handler))
    }

    /// Receives every event regardless of kind.
    pub fn subscribe_all<F>(&self, priority: Priority, handler: F) -> SubscriptionId
    where
        F: Fn(&GameEvent) + Send + Sync + 'static,
    {
        self.insert(None, priority, Arc::new(handler))
    }

    fn insert(
        &self,
        kind: Option<EventKind>,
        priority: Priority,
        handler: EventHandler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.subscriptions.lock();
        // Stable position: after every subscription of equal or higher priority.
        let at = subscriptions
            .iter()
            .position(|s| s.priority < priority)
            .unwrap_or(subscriptions.len());
        subscriptions.insert(
            at,
            Subscription {
                id,
                kind,
                priority,
                handler,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Runs every matching handler on the calling thread and returns how many
    /// ran. Handlers may subscribe or publish re-entrantly.
    pub fn publish(&self, event: &GameEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in &handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::error!("Event handler panicked on {:?}", kind);
            }
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_priority_order() {
        let bus = EventBus::new();
        let order = recorder();

        for (label, priority) in [
            ("low", Priority::Low),
            ("normal-1", Priority::Normal),
            ("high", Priority::High),
            ("normal-2", Priority::Normal),
        ] {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::GameOver, priority, move |_| {
                order.lock().push(label)
            });
        }

        assert_eq!(bus.publish(&GameEvent::GameOver { final_score: 1 }), 4);
        assert_eq!(*order.lock(), vec!["high", "normal-1", "normal-2", "low"]);
    }

    #[test]
    fn test_kind_filtering_and_catch_all() {
        let bus = EventBus::new();
        let order = recorder();

        let o = Arc::clone(&order);
        bus.subscribe(EventKind::BlockMoved, Priority::Normal, move |_| {
            o.lock().push("moved")
        });
        let o = Arc::clone(&order);
        bus.subscribe_all(Priority::Low, move |_| o.lock().push("all"));

        assert_eq!(bus.publish(&GameEvent::Tick { frame: 3 }), 1);
        assert_eq!(bus.publish(&GameEvent::BlockMoved { x: 1, y: 2 }), 2);
        assert_eq!(*order.lock(), vec!["all", "moved", "all"]);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let id = bus.subscribe_all(Priority::Normal, |_| {});

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(&GameEvent::GamePaused), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let bus = EventBus::new();
        let order = recorder();

        bus.subscribe_all(Priority::High, |_| panic!("handler failure"));
        let o = Arc::clone(&order);
        bus.subscribe_all(Priority::Normal, move |_| o.lock().push("ran"));

        assert_eq!(bus.publish(&GameEvent::GameResumed), 2);
        assert_eq!(*order.lock(), vec!["ran"]);
    }

    #[test]
    fn test_handler_can_subscribe_during_publish() {
        let bus = Arc::new(EventBus::new());
        let inner = Arc::clone(&bus);
        bus.subscribe_all(Priority::Normal, move |_| {
            inner.subscribe_all(Priority::Normal, |_| {});
        });

        bus.publish(&GameEvent::GamePaused);
        assert_eq!(bus.subscriber_count(), 2);
    }
}
