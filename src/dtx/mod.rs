//! DTX Module
//!
//! Per-container distributed-transaction bookkeeping.
//!
//! ## Responsibilities
//! - Active transactions: slots in an `LruArray`, indexed by `DtxId`
//! - Committed transactions: durable blob list plus an in-memory index rebuilt
//!   by reindexing after open
//! - Epoch watermarks (`lowest_act_eph`, `highest_cmt_eph`) feeding the
//!   container's epoch boundary

mod committed;
mod lru;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CellarError, Result};

pub use committed::{append_committed, DtxCmtBlobDf, DtxCmtRecord, ReindexState, ReindexStop};
pub(crate) use committed::free_head_blob;
pub use lru::{LruArray, LruCallbacks, LruKey};

/// Transaction identifier
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DtxId {
    pub uuid: Uuid,
    pub hlc: u64,
}

impl DtxId {
    pub fn new(uuid: Uuid, hlc: u64) -> Self {
        Self { uuid, hlc }
    }
}

/// Active transaction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveDtx {
    pub xid: DtxId,
    pub epoch: u64,
}

/// Committed index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedDtx {
    pub epoch: u64,
}

/// Answer of a transaction lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtxStatus {
    Active { epoch: u64 },
    Committed { epoch: u64 },
    Unknown,
}

/// Transaction state of one open container
pub(crate) struct DtxState {
    pub(crate) array: LruArray<ActiveDtx>,
    pub(crate) active: BTreeMap<DtxId, LruKey>,
    pub(crate) committed: BTreeMap<DtxId, CommittedDtx>,
    pub(crate) lowest_act_eph: u64,
    pub(crate) highest_cmt_eph: u64,
    pub(crate) reindex: ReindexState,
    pub(crate) reindex_stop: Option<ReindexStop>,
}

impl DtxState {
    pub(crate) fn new(
        len: usize,
        nr: usize,
        callbacks: Option<Arc<dyn LruCallbacks>>,
        reindex: ReindexState,
        reindex_stop: Option<ReindexStop>,
    ) -> Result<Self> {
        Ok(Self {
            array: LruArray::new(len, nr, true, callbacks)?,
            active: BTreeMap::new(),
            committed: BTreeMap::new(),
            lowest_act_eph: 0,
            highest_cmt_eph: 0,
            reindex,
            reindex_stop,
        })
    }

    /// Register a new active transaction
    pub(crate) fn begin(&mut self, xid: DtxId, epoch: u64) -> Result<()> {
        if epoch == 0 {
            return Err(CellarError::InvalidArgument(
                "transaction epoch must be non-zero".to_string(),
            ));
        }
        if self.active.contains_key(&xid) || self.committed.contains_key(&xid) {
            return Err(CellarError::AlreadyExists);
        }

        let key = self.array.alloc(ActiveDtx { xid, epoch })?;
        self.active.insert(xid, key);
        if self.lowest_act_eph == 0 || epoch < self.lowest_act_eph {
            self.lowest_act_eph = epoch;
        }
        Ok(())
    }

    /// Active entry for `xid`
    pub(crate) fn active_entry(&self, xid: &DtxId) -> Result<ActiveDtx> {
        self.active
            .get(xid)
            .and_then(|key| self.array.get(*key))
            .copied()
            .ok_or(CellarError::NotFound)
    }

    /// Drop `xid` from the active set
    pub(crate) fn remove_active(&mut self, xid: &DtxId) -> Result<ActiveDtx> {
        let key = self.active.remove(xid).ok_or(CellarError::NotFound)?;
        let entry = self.array.free(key).ok_or_else(|| {
            CellarError::StorageFault(format!("active DTX {:?} lost its slot", xid))
        })?;
        self.recompute_lowest();
        Ok(entry)
    }

    /// Record a committed transaction; false if it was already indexed
    pub(crate) fn index_committed(&mut self, record: &DtxCmtRecord) -> bool {
        self.highest_cmt_eph = self.highest_cmt_eph.max(record.epoch);
        self.committed
            .insert(record.xid, CommittedDtx { epoch: record.epoch })
            .is_none()
    }

    pub(crate) fn lookup(&self, xid: &DtxId) -> DtxStatus {
        if let Ok(entry) = self.active_entry(xid) {
            return DtxStatus::Active { epoch: entry.epoch };
        }
        match self.committed.get(xid) {
            Some(entry) => DtxStatus::Committed { epoch: entry.epoch },
            None => DtxStatus::Unknown,
        }
    }

    fn recompute_lowest(&mut self) {
        self.lowest_act_eph = self
            .active
            .values()
            .filter_map(|key| self.array.get(*key))
            .map(|entry| entry.epoch)
            .min()
            .unwrap_or(0);
    }
}
