//! Container Module
//!
//! The in-memory side of a container and the handles callers hold.
//!
//! ## Architecture
//! ```text
//!   Pool ──► HandleCache ──weak──► Container ◄──Arc── ContainerHandle (open)
//!                                      │      ◄──Arc── ContainerRef  (no open)
//!                                      ├── df: Offset<ContainerDf>
//!                                      ├── objects: BTree<ObjectClass>
//!                                      ├── dtx: DtxState (LRU array, indexes)
//!                                      └── hints per I/O class
//! ```
//!
//! ## Lock Order
//! per-key lock → `dtx` → `df` → `objects` → `hints` → heap
//!
//! A container is freed when its last `Arc` goes; freeing never touches
//! durable state.

mod boundary;
mod cache;
pub(crate) mod lifecycle;
mod obj_cache;
mod objects;

use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::btree::BTree;
use crate::catalog::ContainerDf;
use crate::dtx::{append_committed, DtxCmtRecord, DtxId, DtxState, DtxStatus, LruCallbacks, ReindexState};
use crate::error::{CellarError, Result};
use crate::heap::{Offset, Resolve};
use crate::pool::{PoolDf, PoolShared};
use crate::space::{load_hints, HintContext, IoClass, SpaceInfo, IO_CLASS_COUNT};
use crate::ts::TsType;

pub use cache::{CacheKey, HandleCache, KeyGuard};
pub use obj_cache::ObjCache;
pub use objects::{object_key, ObjectClass, ObjectDf, ObjectInput};

/// Usage counters reported by `query`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub nobjs: u64,
    pub used: u64,
    pub hae: u64,
}

/// In-memory container object, shared by every opener
pub struct Container {
    pool: Arc<PoolShared>,
    cache: Weak<HandleCache>,
    id: Uuid,
    open_count: AtomicU32,
    df: RwLock<Offset<ContainerDf>>,
    objects: Mutex<BTree<ObjectClass>>,
    dtx: Mutex<DtxState>,
    solo_epoch: u64,
    hints: Option<Mutex<[HintContext; IO_CLASS_COUNT]>>,
}

impl Container {
    /// Build the object for cataloged container `id` with one open
    pub(crate) fn load(
        pool: &Arc<PoolShared>,
        cache: Weak<HandleCache>,
        id: Uuid,
    ) -> Result<Arc<Self>> {
        let (df_off, objects, reindex, stop, hints, gc_pending) = {
            let view = pool.heap.view();
            let df_off = pool.catalog(&view)?.lookup(&view, id)?;
            let df = view.resolve(df_off)?;

            let objects = BTree::open(&view, df.obj_root, ObjectClass::deferred(df_off))?;
            let (reindex, stop) = ReindexState::start(&view, df)?;
            let hints = pool.space.as_ref().map(|_| Mutex::new(load_hints(&df.hints)));
            (df_off, objects, reindex, stop, hints, !df.gc_bin.is_empty())
        };

        let callbacks: Arc<dyn LruCallbacks> = pool.telemetry.clone();
        let dtx = DtxState::new(
            pool.config.dtx_array_len,
            pool.config.dtx_array_nr,
            Some(callbacks),
            reindex,
            stop,
        )?;

        let cont = Arc::new(Self {
            pool: Arc::clone(pool),
            cache,
            id,
            open_count: AtomicU32::new(1),
            df: RwLock::new(df_off),
            objects: Mutex::new(objects),
            dtx: Mutex::new(dtx),
            solo_epoch: pool.hlc.now(),
            hints,
        });

        if gc_pending {
            pool.gc.link(id);
            pool.gc.kick();
        }

        let indexed = cont.reindex(pool.config.open_reindex_limit)?;
        tracing::debug!(
            "container {} loaded, {} committed DTX(s) reindexed",
            id,
            indexed
        );
        Ok(cont)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of outstanding opens
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }

    /// Current descriptor offset
    pub fn descriptor(&self) -> Offset<ContainerDf> {
        *self.df.read()
    }

    /// Epoch assigned to single-participant updates, fixed at open
    pub fn solo_epoch(&self) -> u64 {
        self.solo_epoch
    }

    /// Snapshot of the descriptor
    pub fn descriptor_df(&self) -> Result<ContainerDf> {
        let df = self.df.read();
        let view = self.pool.heap.view();
        let copy = view.resolve(*df)?.clone();
        Ok(copy)
    }

    pub fn query(&self) -> Result<ContainerInfo> {
        let df = self.descriptor_df()?;
        Ok(ContainerInfo {
            nobjs: df.nobjs,
            used: df.used,
            hae: df.hae,
        })
    }

    pub(crate) fn add_open(&self) -> u32 {
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn close_one(&self) {
        let prev = self
            .open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        assert!(
            prev.is_ok(),
            "container {} closed more times than opened",
            self.id
        );

        if prev == Ok(1) {
            self.pool.obj_cache.evict_container(self.id);
            tracing::debug!("container {} has no open handles", self.id);
        }
    }

    // =========================================================================
    // Distributed Transactions
    // =========================================================================

    /// Register transaction `xid` as active at `epoch`
    pub fn dtx_begin(&self, xid: DtxId, epoch: u64) -> Result<()> {
        self.dtx.lock().begin(xid, epoch)?;
        tracing::trace!("DTX {:?} active at epoch {}", xid, epoch);
        Ok(())
    }

    /// Commit `xid`: append it durably, then move it to the committed index
    pub fn dtx_commit(&self, xid: DtxId) -> Result<()> {
        let mut dtx = self.dtx.lock();
        let entry = dtx.active_entry(&xid)?;
        let record = DtxCmtRecord {
            xid,
            epoch: entry.epoch,
        };

        {
            let df = self.df.read();
            let mut tx = self.pool.heap.begin()?;
            append_committed(&mut tx, *df, record, self.pool.config.dtx_blob_capacity)?;
            tx.commit()?;
        }

        dtx.remove_active(&xid)?;
        if dtx.index_committed(&record) {
            self.pool.telemetry.add_committed(1);
        }
        tracing::trace!("DTX {:?} committed at epoch {}", xid, entry.epoch);
        Ok(())
    }

    /// Forget active transaction `xid`
    pub fn dtx_abort(&self, xid: DtxId) -> Result<()> {
        self.dtx.lock().remove_active(&xid)?;
        tracing::trace!("DTX {:?} aborted", xid);
        Ok(())
    }

    pub fn dtx_lookup(&self, xid: DtxId) -> Result<DtxStatus> {
        let mut dtx = self.dtx.lock();
        self.reindex_locked(&mut dtx, None)?;
        Ok(dtx.lookup(&xid))
    }

    /// Number of active transactions
    pub fn dtx_active_count(&self) -> usize {
        self.dtx.lock().active.len()
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Insert object `oid`, or overwrite it when present
    pub fn insert_object(&self, oid: u64, size: u64, epoch: u64) -> Result<()> {
        let df = self.df.read();
        let objects = self.objects.lock();
        let mut hints = self.hints.as_ref().map(|hints| hints.lock());

        let key = object_key(oid);
        let mut tx = self.pool.heap.begin()?;
        let old_size = match objects.lookup(&tx, &key)? {
            Some(record) => Some(tx.resolve(record)?.size),
            None => None,
        };

        let used = tx
            .resolve(*df)?
            .used
            .saturating_sub(old_size.unwrap_or(0))
            .checked_add(size)
            .ok_or_else(|| {
                CellarError::InvalidArgument(format!(
                    "object {} of {} bytes overflows container usage",
                    oid, size
                ))
            })?;

        let new_blocks = SpaceInfo::blocks_for(size);
        let old_blocks = old_size.map_or(0, SpaceInfo::blocks_for);
        let grow = new_blocks.saturating_sub(old_blocks);
        let shrink = old_blocks.saturating_sub(new_blocks);
        if let Some(space) = &self.pool.space {
            space.reserve(grow)?;
        }

        let addr = match hints.as_mut() {
            Some(hints) => match hints[IoClass::for_size(size).index()].reserve(size) {
                Ok(addr) => addr,
                Err(e) => {
                    if let Some(space) = &self.pool.space {
                        space.release(grow);
                    }
                    return Err(e);
                }
            },
            None => 0,
        };

        let result = (|| -> Result<()> {
            objects.insert(&mut tx, &key, &ObjectInput { size, epoch, addr })?;

            let cont = tx.get_mut(*df)?;
            if old_size.is_none() {
                cont.nobjs += 1;
            }
            cont.used = used;
            cont.hae = cont.hae.max(epoch);
            if let Some(hints) = hints.as_ref() {
                for hint in hints.iter() {
                    hint.publish(&mut cont.hints[hint.class().index()]);
                }
            }

            if self.pool.space.is_some() {
                let hdr: Offset<PoolDf> = tx.root();
                let pool = tx.get_mut(hdr)?;
                pool.used_blocks = pool.used_blocks.saturating_add(grow).saturating_sub(shrink);
            }
            tx.commit()
        })();

        if let Some(space) = &self.pool.space {
            match &result {
                Ok(()) => space.release(shrink),
                Err(_) => space.release(grow),
            }
        }
        result?;

        self.pool.obj_cache.remove(self.id, oid);
        tracing::trace!("container {} object {} written ({} bytes)", self.id, oid, size);
        Ok(())
    }

    /// Copy of object `oid`, if present
    pub fn fetch_object(&self, oid: u64) -> Result<Option<ObjectDf>> {
        let objects = self.objects.lock();
        let view = self.pool.heap.view();

        let record = match self.pool.obj_cache.get(self.id, oid) {
            Some(record) => record,
            None => match objects.lookup(&view, &object_key(oid))? {
                Some(record) => {
                    self.pool.obj_cache.insert(self.id, oid, record);
                    record
                }
                None => return Ok(None),
            },
        };

        let object = view.resolve(record)?.clone();
        Ok(Some(object))
    }

    /// Delete object `oid`; its record is reclaimed by the GC
    pub fn delete_object(&self, oid: u64) -> Result<()> {
        let df = self.df.read();
        let objects = self.objects.lock();

        let key = object_key(oid);
        let mut tx = self.pool.heap.begin()?;
        let record = objects.lookup(&tx, &key)?.ok_or(CellarError::NotFound)?;
        let size = tx.resolve(record)?.size;
        let blocks = SpaceInfo::blocks_for(size);

        objects.delete(&mut tx, &key)?;
        let cont = tx.get_mut(*df)?;
        cont.nobjs = cont.nobjs.saturating_sub(1);
        cont.used = cont.used.saturating_sub(size);

        if self.pool.space.is_some() {
            let hdr: Offset<PoolDf> = tx.root();
            let pool = tx.get_mut(hdr)?;
            pool.used_blocks = pool.used_blocks.saturating_sub(blocks);
        }
        tx.commit()?;

        if let Some(space) = &self.pool.space {
            space.release(blocks);
        }
        self.pool.obj_cache.remove(self.id, oid);
        self.pool.gc.link(self.id);
        self.pool.gc.kick();

        tracing::trace!("container {} object {} deleted", self.id, oid);
        Ok(())
    }

    // =========================================================================
    // Timestamps
    // =========================================================================

    /// Record a read of the container at `epoch`
    pub fn record_read(&self, epoch: u64) -> Result<()> {
        let ts_idx = self.descriptor_df()?.ts_idx;
        self.pool.ts.update_read(ts_idx, TsType::Container, epoch);
        Ok(())
    }

    /// Highest read epoch recorded since the anchor was last evicted
    pub fn read_timestamp(&self) -> Result<Option<u64>> {
        let ts_idx = self.descriptor_df()?.ts_idx;
        Ok(self
            .pool
            .ts
            .get(ts_idx, TsType::Container)
            .map(|entry| entry.read))
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        let dtx = self.dtx.get_mut();
        if !std::thread::panicking() {
            assert!(
                dtx.active.is_empty(),
                "container {} freed with {} active DTX(s)",
                self.id,
                dtx.active.len()
            );
        }

        self.pool.telemetry.sub_committed(dtx.committed.len() as u64);
        if let Some(cache) = self.cache.upgrade() {
            cache.remove_dead(&(self.pool.id, self.id));
        }
        tracing::debug!("container {} freed", self.id);
    }
}

// =============================================================================
// Handles
// =============================================================================

/// One open of a container; closes on drop
pub struct ContainerHandle {
    cont: Arc<Container>,
    closed: bool,
}

impl ContainerHandle {
    pub(crate) fn new(cont: Arc<Container>) -> Self {
        Self {
            cont,
            closed: false,
        }
    }

    /// Give up this open
    pub fn close(mut self) {
        self.release();
    }

    /// Extra reference that does not count as an open
    pub fn add_ref(&self) -> ContainerRef {
        ContainerRef::new(Arc::clone(&self.cont))
    }

    /// True when both handles share one in-memory object
    pub fn same_object(&self, other: &ContainerHandle) -> bool {
        Arc::ptr_eq(&self.cont, &other.cont)
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cont.close_one();
        }
    }
}

impl Deref for ContainerHandle {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.cont
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reference on a container without an open; dropping it releases it
#[derive(Clone)]
pub struct ContainerRef {
    cont: Arc<Container>,
}

impl ContainerRef {
    pub(crate) fn new(cont: Arc<Container>) -> Self {
        Self { cont }
    }
}

impl Deref for ContainerRef {
    type Target = Container;

    fn deref(&self) -> &Container {
        &self.cont
    }
}
