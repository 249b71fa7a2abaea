//! Pool-wide object cache
//!
//! Maps `(container, oid)` to the object record so repeated fetches skip the
//! tree walk. Entries of a container are evicted when its last handle closes.

use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::heap::Offset;

use super::ObjectDf;

#[derive(Debug, Default)]
pub struct ObjCache {
    entries: Mutex<HashMap<(Uuid, u64), Offset<ObjectDf>>>,
}

impl ObjCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cont: Uuid, oid: u64) -> Option<Offset<ObjectDf>> {
        self.entries.lock().get(&(cont, oid)).copied()
    }

    pub fn insert(&self, cont: Uuid, oid: u64, record: Offset<ObjectDf>) {
        self.entries.lock().insert((cont, oid), record);
    }

    pub fn remove(&self, cont: Uuid, oid: u64) {
        self.entries.lock().remove(&(cont, oid));
    }

    /// Drop every entry of `cont`; returns how many went
    pub fn evict_container(&self, cont: Uuid) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(id, _), _| *id != cont);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::trace!("evicted {} cached object(s) of container {}", evicted, cont);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
