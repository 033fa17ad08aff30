//! In-memory key-value storage for an eventual replica.
//!
//! This is the node's authoritative local state. It is a pure data holder:
//! writing here never contacts peers. [`crate::replica::Replica`] applies the
//! write first and only then hands the update to the propagation engine.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe key-value store owned by each replica.
///
/// Every operation takes the single lock for its full duration, so a reader
/// always sees a value written atomically by some earlier `update`. No
/// reference into the map ever escapes the store.
#[derive(Default)]
pub struct KvStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl KvStore {
    /// Creates an empty key-value store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Stores a key-value pair, overwriting any existing value.
    ///
    /// Last write wins: there are no versions or timestamps.
    pub fn update(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    /// Retrieves the current value for a key, or `None` if it was never written.
    pub fn read(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    /// Returns a point-in-time copy of all key-value pairs.
    ///
    /// The copy is taken while holding the lock, so callers can iterate it
    /// without stalling writers.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Values are always inserted whole, so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn read_sees_write_immediately() {
        let store = KvStore::new();
        assert_eq!(store.read("key1"), None);

        store.update("key1", "value1");

        assert_eq!(store.read("key1"), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn last_write_wins() {
        let store = KvStore::new();
        store.update("k", "v1");
        store.update("k", "v2");

        assert_eq!(store.read("k"), Some("v2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let store = KvStore::new();
        store.update("a", "1");
        let snapshot = store.snapshot();

        store.update("a", "2");
        store.update("b", "3");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("a").map(String::as_str), Some("1"));
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn snapshot_never_observes_torn_values() {
        let store = Arc::new(KvStore::new());
        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..500 {
                        store.update(format!("key-{}", round % 8), format!("w{writer}-r{round}"));
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            for (key, value) in store.snapshot() {
                let round: usize = key
                    .strip_prefix("key-")
                    .and_then(|n| n.parse().ok())
                    .expect("well-formed key");
                let (writer, written_round) = value
                    .strip_prefix('w')
                    .and_then(|rest| rest.split_once("-r"))
                    .expect("well-formed value");
                assert!(writer.parse::<usize>().expect("writer id") < 4);
                let written_round: usize = written_round.parse().expect("round");
                assert_eq!(written_round % 8, round);
            }
        }

        for writer in writers {
            writer.join().expect("writer thread");
        }
        assert_eq!(store.len(), 8);
    }
}
