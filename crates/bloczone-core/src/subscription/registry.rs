//! Subscription registry: observers, their callbacks and their watched keys.
//!
//! Design:
//! - Forward edges: observer -> keys it watches
//! - Reverse edges: key -> observers watching it
//! - Invariant: both edge maps mirror each other, and every observer that
//!   has an edge is registered in `subscribers`.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::domain::{ObservedValue, ObserverId};
use crate::error::ListenerError;

/// Callback invoked with the current state when a watched key changes.
pub type Listener = Arc<dyn Fn(&ObservedValue) -> Result<(), ListenerError> + Send + Sync>;

/// Box a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ObservedValue) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Result of a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// The identity was already registered; the earlier registration is kept.
    AlreadyRegistered,
}

struct Subscriber {
    /// Registration order, used as dispatch order.
    seq: u64,
    listener: Listener,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: HashMap<ObserverId, Subscriber>,

    /// Forward edges: observer -> keys it watches
    watched: HashMap<ObserverId, HashSet<String>>,

    /// Reverse edges: key -> observers watching it
    /// Enables O(1) lookup: "who cares about this key?"
    watchers: HashMap<String, HashSet<ObserverId>>,

    next_seq: u64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, observer: ObserverId) -> bool {
        self.subscribers.contains_key(&observer)
    }

    /// Register `observer` for exactly `keys`.
    ///
    /// A second registration of the same identity is a no-op (with a
    /// warning); the first listener and keys stay authoritative.
    pub fn insert<I>(&mut self, observer: ObserverId, listener: Listener, keys: I) -> Registration
    where
        I: IntoIterator<Item = String>,
    {
        if self.contains(observer) {
            warn!(%observer, "observer is already subscribed to this bloc");
            return Registration::AlreadyRegistered;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.subscribers.insert(observer, Subscriber { seq, listener });

        for key in keys {
            self.add_edge(observer, key);
        }
        Registration::Created
    }

    /// Drop the registration and every edge of `observer`.
    pub fn remove(&mut self, observer: ObserverId) -> bool {
        if self.subscribers.remove(&observer).is_none() {
            warn!(%observer, "observer is not subscribed to this bloc");
            return false;
        }
        for key in self.watched.remove(&observer).unwrap_or_default() {
            self.remove_reverse_edge(&key, observer);
        }
        true
    }

    /// Stop watching one key. Removing the last key removes the registration.
    pub fn remove_key(&mut self, observer: ObserverId, key: &str) -> bool {
        let removed = match self.watched.entry(observer) {
            Entry::Occupied(mut e) => {
                let removed = e.get_mut().remove(key);
                if e.get().is_empty() {
                    e.remove_entry();
                }
                removed
            }
            Entry::Vacant(_) => false,
        };
        if !removed {
            warn!(%observer, key, "observer is not subscribed to this key");
            return false;
        }

        self.remove_reverse_edge(key, observer);
        if !self.watched.contains_key(&observer) {
            self.subscribers.remove(&observer);
        }
        true
    }

    /// `true` while `observer` is registered and watching `key`.
    pub fn watches(&self, observer: ObserverId, key: &str) -> bool {
        self.watchers
            .get(key)
            .is_some_and(|observers| observers.contains(&observer))
    }

    /// Keys watched by `observer`, sorted.
    pub fn watched_keys(&self, observer: ObserverId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .watched
            .get(&observer)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Listeners of every observer watching `key`, in registration order.
    pub fn listeners_for(&self, key: &str) -> Vec<(ObserverId, Listener)> {
        let Some(observers) = self.watchers.get(key) else {
            return Vec::new();
        };
        let mut found: Vec<(u64, ObserverId, Listener)> = observers
            .iter()
            .filter_map(|observer| {
                self.subscribers
                    .get(observer)
                    .map(|s| (s.seq, *observer, Arc::clone(&s.listener)))
            })
            .collect();
        found.sort_by_key(|(seq, _, _)| *seq);
        found
            .into_iter()
            .map(|(_, observer, listener)| (observer, listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Number of (key, observer) edges.
    pub fn edge_count(&self) -> usize {
        self.watchers.values().map(HashSet::len).sum()
    }

    fn add_edge(&mut self, observer: ObserverId, key: String) {
        self.watchers
            .entry(key.clone())
            .or_default()
            .insert(observer);
        self.watched.entry(observer).or_default().insert(key);
    }

    fn remove_reverse_edge(&mut self, key: &str, observer: ObserverId) {
        if let Some(observers) = self.watchers.get_mut(key) {
            observers.remove(&observer);
            if observers.is_empty() {
                self.watchers.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Listener {
        listener(|_| Ok(()))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.listeners_for("count").is_empty());
    }

    #[test]
    fn insert_creates_forward_and_reverse_edges() {
        let mut registry = SubscriptionRegistry::new();
        let x = ObserverId::new();

        assert_eq!(registry.insert(x, noop(), keys(&["count", "label"])), Registration::Created);

        assert_eq!(registry.watched_keys(x), keys(&["count", "label"]));
        assert_eq!(registry.listeners_for("count").len(), 1);
        assert_eq!(registry.listeners_for("count")[0].0, x);
        assert_eq!(registry.edge_count(), 2);
    }

    #[test]
    fn watches_follows_removal() {
        let mut registry = SubscriptionRegistry::new();
        let x = ObserverId::new();
        registry.insert(x, noop(), keys(&["count", "label"]));

        assert!(registry.watches(x, "count"));
        registry.remove_key(x, "count");
        assert!(!registry.watches(x, "count"));
        assert!(registry.watches(x, "label"));
        registry.remove(x);
        assert!(!registry.watches(x, "label"));
    }

    #[test]
    fn second_insert_keeps_the_first_registration() {
        let mut registry = SubscriptionRegistry::new();
        let x = ObserverId::new();

        registry.insert(x, noop(), keys(&["count"]));
        let outcome = registry.insert(x, noop(), keys(&["label"]));

        assert_eq!(outcome, Registration::AlreadyRegistered);
        assert_eq!(registry.watched_keys(x), keys(&["count"]));
        assert!(registry.listeners_for("label").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_drops_every_edge() {
        let mut registry = SubscriptionRegistry::new();
        let x = ObserverId::new();
        let y = ObserverId::new();
        registry.insert(x, noop(), keys(&["count", "label"]));
        registry.insert(y, noop(), keys(&["count"]));

        assert!(registry.remove(x));

        assert!(!registry.contains(x));
        assert!(registry.watched_keys(x).is_empty());
        assert!(registry.listeners_for("label").is_empty());
        assert_eq!(registry.listeners_for("count").len(), 1);
        assert_eq!(registry.edge_count(), 1);
    }

    #[test]
    fn removing_an_unknown_observer_is_a_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.remove(ObserverId::new()));
    }

    #[test]
    fn remove_key_drops_registration_with_last_key() {
        let mut registry = SubscriptionRegistry::new();
        let x = ObserverId::new();
        registry.insert(x, noop(), keys(&["count", "label"]));

        assert!(registry.remove_key(x, "count"));
        assert!(registry.contains(x));
        assert_eq!(registry.watched_keys(x), keys(&["label"]));

        assert!(!registry.remove_key(x, "count"));

        assert!(registry.remove_key(x, "label"));
        assert!(!registry.contains(x));
        assert_eq!(registry.edge_count(), 0);
    }

    #[test]
    fn listeners_come_back_in_registration_order() {
        let mut registry = SubscriptionRegistry::new();
        let observers: Vec<ObserverId> = (0..8).map(|_| ObserverId::new()).collect();
        for observer in &observers {
            registry.insert(*observer, noop(), keys(&["count"]));
        }

        let order: Vec<ObserverId> = registry
            .listeners_for("count")
            .into_iter()
            .map(|(observer, _)| observer)
            .collect();
        assert_eq!(order, observers);
    }
}
