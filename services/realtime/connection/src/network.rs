//! Host network connectivity notifications.
//!
//! The embedding application owns a `NetworkStateRegistry` and reports
//! connectivity changes to it; every connection created with the registry
//! receives them until its subscription is dropped.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Host network connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// Network available
    Online,
    /// Network lost
    Offline,
}

type Handler = Box<dyn Fn(NetworkState) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    handlers: DashMap<u64, Handler>,
    next_id: AtomicU64,
}

/// Fan-out of network state changes to subscribed connections
#[derive(Clone, Default)]
pub struct NetworkStateRegistry {
    subscribers: Arc<Subscribers>,
}

impl NetworkStateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; it is removed when the subscription is dropped
    pub fn subscribe(
        &self,
        handler: impl Fn(NetworkState) + Send + Sync + 'static,
    ) -> NetworkSubscription {
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.handlers.insert(id, Box::new(handler));
        debug!("Network subscriber {} registered", id);
        NetworkSubscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Report a connectivity change; returns how many subscribers were told
    pub fn notify(&self, state: NetworkState) -> usize {
        debug!(
            "Network is {:?}, notifying {} subscribers",
            state,
            self.subscribers.handlers.len()
        );
        let mut notified = 0;
        for entry in self.subscribers.handlers.iter() {
            (entry.value())(state);
            notified += 1;
        }
        notified
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.subscribers.handlers.len()
    }

    /// Whether nothing is subscribed
    pub fn is_empty(&self) -> bool {
        self.subscribers.handlers.is_empty()
    }
}

impl std::fmt::Debug for NetworkStateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStateRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Registration handle; unsubscribes on drop
#[derive(Debug)]
pub struct NetworkSubscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Drop for NetworkSubscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.handlers.remove(&self.id);
            debug!("Network subscriber {} unregistered", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notify_and_unsubscribe() {
        let registry = NetworkStateRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let subscription = registry.subscribe(move |state| sink.lock().unwrap().push(state));
        assert_eq!(registry.notify(NetworkState::Offline), 1);
        assert_eq!(*seen.lock().unwrap(), vec![NetworkState::Offline]);

        drop(subscription);
        assert!(registry.is_empty());
        assert_eq!(registry.notify(NetworkState::Online), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = NetworkStateRegistry::new();
        let subscription = registry.subscribe(|_| {});
        drop(registry);
        drop(subscription);
    }
}
