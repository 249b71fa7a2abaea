//! Handle cache
//!
//! At most one in-memory `Container` exists per `(pool, uuid)`. The map holds
//! weak references: the object lives while a handle or `ContainerRef` holds
//! it, and its `Drop` removes the dead entry.
//!
//! Opens, destroys and upgrades of one key serialize on a per-key lock taken
//! before any container or heap lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use super::Container;

/// `(pool id, container id)`
pub type CacheKey = (Uuid, Uuid);

#[derive(Default)]
pub struct HandleCache {
    entries: Mutex<HashMap<CacheKey, Weak<Container>>>,

    /// Keys whose lock is currently held
    held: Mutex<HashSet<CacheKey>>,
    released: Condvar,
}

/// Holds one key's lock until dropped
pub struct KeyGuard<'a> {
    cache: &'a HandleCache,
    key: CacheKey,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.cache.held.lock().remove(&self.key);
        self.cache.released.notify_all();
    }
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize lifecycle operations on `key`
    pub fn lock_key(&self, key: CacheKey) -> KeyGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(&key) {
            self.released.wait(&mut held);
        }
        held.insert(key);
        KeyGuard { cache: self, key }
    }

    /// Live object for `key`, if any
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<Container>> {
        self.entries.lock().get(key).and_then(Weak::upgrade)
    }

    pub(crate) fn insert(&self, key: CacheKey, cont: &Arc<Container>) {
        self.entries.lock().insert(key, Arc::downgrade(cont));
    }

    /// Forget `key` even if an object is still alive
    pub(crate) fn remove(&self, key: &CacheKey) {
        self.entries.lock().remove(key);
    }

    /// Drop the entry for `key` once nothing references its object
    pub(crate) fn remove_dead(&self, key: &CacheKey) {
        let mut entries = self.entries.lock();
        if entries
            .get(key)
            .is_some_and(|weak| weak.strong_count() == 0)
        {
            entries.remove(key);
        }
    }

    /// Number of live cached objects
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
