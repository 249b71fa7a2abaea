//! Timestamp cache
//!
//! Tracks the highest read and write epochs seen per entity. Entries are keyed
//! by the entity type and the anchor index stamped into its durable record;
//! the anchor is evicted when the record is freed.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Kind of entity an anchor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TsType {
    Container,
    Object,
}

/// Highest epochs recorded for one anchor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TsEntry {
    pub read: u64,
    pub write: u64,
}

/// In-memory read/write timestamp table of one pool
#[derive(Debug, Default)]
pub struct TsTable {
    entries: Mutex<HashMap<(TsType, u32), TsEntry>>,
}

impl TsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the read timestamp of an anchor
    pub fn update_read(&self, idx: u32, ty: TsType, epoch: u64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry((ty, idx)).or_default();
        entry.read = entry.read.max(epoch);
    }

    /// Raise the write timestamp of an anchor
    pub fn update_write(&self, idx: u32, ty: TsType, epoch: u64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry((ty, idx)).or_default();
        entry.write = entry.write.max(epoch);
    }

    pub fn get(&self, idx: u32, ty: TsType) -> Option<TsEntry> {
        self.entries.lock().get(&(ty, idx)).copied()
    }

    /// Drop an anchor; returns whether it was cached
    pub fn evict(&self, idx: u32, ty: TsType) -> bool {
        let evicted = self.entries.lock().remove(&(ty, idx)).is_some();
        if evicted {
            tracing::trace!("ts anchor {:?}/{} evicted", ty, idx);
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

