//! Runtime-mutable set of subscribers.
//!
//! A subscriber is an opaque id mapped to a delivery target: a peer address
//! for replicas, a bounded channel sender for paper-store clients. The
//! registry has its own lock, independent of any store lock, and fan-out
//! always iterates a snapshot taken by [`SubscriberRegistry::list_targets`].

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type SubscriberId = String;

pub struct SubscriberRegistry<T> {
    targets: Mutex<BTreeMap<SubscriberId, T>>,
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self {
            targets: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T: Clone> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the target for `id`, returning the replaced target.
    pub fn register(&self, id: impl Into<SubscriberId>, target: T) -> Option<T> {
        self.lock().insert(id.into(), target)
    }

    /// Removes `id` if present; unknown ids are a no-op.
    pub fn unregister(&self, id: &str) -> Option<T> {
        self.lock().remove(id)
    }

    /// Consistent copy of the current subscribers, ordered by id.
    ///
    /// Subscribers registered after this returns are not part of the
    /// snapshot.
    pub fn list_targets(&self) -> Vec<(SubscriberId, T)> {
        self.lock()
            .iter()
            .map(|(id, target)| (id.clone(), target.clone()))
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SubscriberId, T>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
