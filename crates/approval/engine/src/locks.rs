//! Per-key mutual exclusion
//!
//! Every mutating operation on a request runs under that request's lock,
//! so two near-simultaneous votes cannot both read a stale ballot.
//! Workflow-level changes (dynamic modifications, rollbacks) take the
//! workflow's lock first and the request's lock second, never the other
//! way round.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// A lazily-populated table of mutexes, one per key
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The guarded value is `()`, so a poisoned lock carries no torn state
    /// and is simply re-acquired.
    pub fn with<T>(&self, key: &K, f: impl FnOnce() -> T) -> T {
        let handle = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// Run `f` while holding the lock of every key, taken in slice order.
    /// Callers sort `keys` so two multi-key holders cannot deadlock.
    pub fn with_all<T>(&self, keys: &[K], f: impl FnOnce() -> T) -> T {
        match keys.split_first() {
            Some((first, rest)) => self.with(first, || self.with_all(rest, f)),
            None => f(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
