//! Pool Module
//!
//! A pool is one directory holding a persistent heap whose root object is the
//! pool header. The header points at the container catalog.
//!
//! ## Open Flow
//! ```text
//!   Heap::open (image + WAL replay)
//!        │
//!        ▼
//!   heap root null? ──yes──► format: catalog tree + PoolDf, set as root
//!        │
//!        ▼
//!   PoolShared (heap, clock, timestamps, space, caches, GC front end)
//!        │
//!        ▼
//!   spawn GC worker, kick it to resume bins left by a previous run
//! ```
//!
//! Container lifecycle operations live in `container::lifecycle`; `Pool`
//! exposes them with logging.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::btree::{Anchor, TreeRootDf};
use crate::catalog::{Catalog, ContainerClass};
use crate::config::Config;
use crate::container::{lifecycle, ContainerHandle, ContainerRef, HandleCache, ObjCache};
use crate::dtx::LruCallbacks;
use crate::error::Result;
use crate::gc::{Gc, GcItem, GcWorker};
use crate::heap::{FailPoint, Heap, HeapStats, Offset, Resolve};
use crate::hlc::Hlc;
use crate::space::SpaceInfo;
use crate::ts::TsTable;

// =============================================================================
// Format Versions
// =============================================================================

/// Legacy layout; cannot be upgraded in place
pub const FORMAT_V1: u32 = 1;

/// Oldest layout that upgrades in place
pub const FORMAT_V2: u32 = 2;

/// Adds the durable commit-epoch boundary
pub const FORMAT_V3: u32 = 3;

pub const CURRENT_FORMAT: u32 = FORMAT_V3;

/// Pools below this version refuse to upgrade
pub const FORMAT_UPGRADE_FLOOR: u32 = FORMAT_V2;

/// First version with epoch boundary support
pub const FORMAT_BOUNDARY: u32 = FORMAT_V3;

/// Pool header, the heap root
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolDf {
    pub id: Uuid,
    pub version: u32,
    pub cont_root: Offset<TreeRootDf>,

    /// Destroyed containers awaiting reclamation
    pub gc_bin: Vec<GcItem>,

    /// Next timestamp anchor handed to a container
    pub next_ts_idx: u32,

    /// Blocks charged by object records
    pub used_blocks: u64,
}

// =============================================================================
// Telemetry
// =============================================================================

/// Pool-wide gauges
#[derive(Debug, Default)]
pub struct Telemetry {
    committed_dtx: AtomicU64,
    lru_bytes: AtomicU64,
}

impl Telemetry {
    pub fn committed_dtx(&self) -> u64 {
        self.committed_dtx.load(Ordering::Relaxed)
    }

    pub fn lru_bytes(&self) -> u64 {
        self.lru_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn add_committed(&self, count: u64) {
        self.committed_dtx.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn sub_committed(&self, count: u64) {
        self.committed_dtx.fetch_sub(count, Ordering::Relaxed);
    }
}

impl LruCallbacks for Telemetry {
    fn on_alloc(&self, bytes: usize) {
        self.lru_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn on_free(&self, bytes: usize) {
        self.lru_bytes.fetch_sub(bytes as u64, Ordering::Relaxed);
    }
}

/// Snapshot returned by `Pool::stats`
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub id: Uuid,
    pub version: u32,
    pub containers: u64,
    pub cached_containers: usize,
    pub committed_dtx: u64,
    pub lru_bytes: u64,
    pub gc_pending: usize,
    pub cached_objects: usize,
    pub used_blocks: Option<u64>,
    pub heap: HeapStats,
}

// =============================================================================
// Shared Pool State
// =============================================================================

/// State shared by the pool, its containers and the GC worker
pub(crate) struct PoolShared {
    pub(crate) id: Uuid,
    pub(crate) config: Config,
    pub(crate) heap: Heap,
    pub(crate) hdr: Offset<PoolDf>,
    pub(crate) version: AtomicU32,
    pub(crate) hlc: Hlc,
    pub(crate) ts: TsTable,
    pub(crate) space: Option<SpaceInfo>,
    pub(crate) obj_cache: ObjCache,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) gc: Gc,
}

impl PoolShared {
    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn container_class(&self) -> ContainerClass<'_> {
        ContainerClass::new(&self.ts, self.config.obj_tree_order)
    }

    /// Catalog handle resolved through `view`
    pub(crate) fn catalog(&self, view: &impl Resolve) -> Result<Catalog<'_>> {
        let root = view.resolve(self.hdr)?.cont_root;
        Catalog::open(view, root, self.container_class())
    }
}

// =============================================================================
// Pool
// =============================================================================

/// An open pool
pub struct Pool {
    shared: Arc<PoolShared>,
    cache: Arc<HandleCache>,
    worker: GcWorker,
}

impl Pool {
    /// Open the pool in `config.data_dir`, formatting it when empty
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_cache(config, Arc::new(HandleCache::new()))
    }

    /// Open sharing a handle cache with other pools
    pub fn open_with_cache(config: Config, cache: Arc<HandleCache>) -> Result<Self> {
        config.validate()?;
        tracing::info!("opening pool in {}", config.data_dir.display());

        let heap = Heap::open(&config.data_dir, &config)?;
        let ts = TsTable::new();

        let mut hdr: Offset<PoolDf> = heap.root();
        if hdr.is_null() {
            hdr = Self::format(&heap, &config, &ts)?;
        }

        let (id, version, used_blocks) = {
            let view = heap.view();
            let df = view.resolve(hdr)?;
            (df.id, df.version, df.used_blocks)
        };
        let space = config
            .space_blocks
            .map(|total| SpaceInfo::new(total, used_blocks));

        let (requests, inbox) = channel::unbounded();
        let shared = Arc::new(PoolShared {
            id,
            config,
            heap,
            hdr,
            version: AtomicU32::new(version),
            hlc: Hlc::new(),
            ts,
            space,
            obj_cache: ObjCache::new(),
            telemetry: Arc::new(Telemetry::default()),
            gc: Gc::new(requests),
        });

        let worker = GcWorker::spawn(Arc::clone(&shared), inbox)?;
        shared.gc.kick();

        tracing::info!("pool {} open (format v{})", id, version);
        Ok(Self {
            shared,
            cache,
            worker,
        })
    }

    fn format(heap: &Heap, config: &Config, ts: &TsTable) -> Result<Offset<PoolDf>> {
        let mut tx = heap.begin()?;
        let cont_root = Catalog::format(
            &mut tx,
            config.catalog_order,
            ContainerClass::new(ts, config.obj_tree_order),
        )?;
        let id = config.pool_id.unwrap_or_else(Uuid::new_v4);
        let hdr = tx.alloc(PoolDf {
            id,
            version: config.format_version,
            cont_root,
            ..PoolDf::default()
        })?;
        tx.set_root(hdr);
        tx.commit()?;

        tracing::info!("formatted pool {} (format v{})", id, config.format_version);
        Ok(hdr)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Format version of the pool
    pub fn version(&self) -> u32 {
        self.shared.version()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn handle_cache(&self) -> &Arc<HandleCache> {
        &self.cache
    }

    // =========================================================================
    // Container Lifecycle
    // =========================================================================

    /// Add an empty container to the catalog
    pub fn create_container(&self, id: Uuid) -> Result<()> {
        match lifecycle::create(&self.shared, &self.cache, id) {
            Ok(()) => {
                tracing::info!("created container {}", id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("create container {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Open a container, reusing the cached object when one is alive
    pub fn open_container(&self, id: Uuid) -> Result<ContainerHandle> {
        let handle = lifecycle::open(&self.shared, &self.cache, id)?;
        tracing::debug!(
            "opened container {} (open count {})",
            id,
            handle.open_count()
        );
        Ok(handle)
    }

    /// Remove a container and wait for its space to be reclaimed
    pub fn destroy_container(&self, id: Uuid) -> Result<()> {
        match lifecycle::destroy(&self.shared, &self.cache, id) {
            Ok(()) => {
                tracing::info!("destroyed container {}", id);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("destroy container {} failed: {}", id, e);
                Err(e)
            }
        }
    }

    /// Rewrite an open container's descriptor in the current format
    pub fn upgrade_container(&self, id: Uuid) -> Result<()> {
        lifecycle::upgrade_container(&self.shared, &self.cache, id)
    }

    /// Upgrade every container, then stamp the pool with `CURRENT_FORMAT`
    pub fn upgrade(&self) -> Result<()> {
        lifecycle::upgrade_pool(&self.shared, &self.cache)
    }

    /// Extra reference on a cached container without opening it
    pub fn container_ref(&self, id: Uuid) -> Option<ContainerRef> {
        self.cache
            .lookup(&(self.shared.id, id))
            .map(ContainerRef::new)
    }

    /// Up to `max` container ids after `anchor`, plus the anchor to resume from
    pub fn containers(&self, anchor: Anchor, max: usize) -> Result<(Vec<Uuid>, Anchor)> {
        let view = self.shared.heap.view();
        let catalog = self.shared.catalog(&view)?;
        let mut iter = catalog.iter(&view, anchor);

        let mut ids = Vec::new();
        while ids.len() < max {
            match iter.next() {
                Some(item) => ids.push(item?.0),
                None => break,
            }
        }
        let anchor = iter.anchor().clone();
        Ok((ids, anchor))
    }

    /// Every container id in UUID order
    pub fn list_containers(&self) -> Result<Vec<Uuid>> {
        let view = self.shared.heap.view();
        let catalog = self.shared.catalog(&view)?;
        let ids: Result<Vec<Uuid>> = catalog
            .iter(&view, Anchor::zero())
            .map(|item| item.map(|(id, _)| id))
            .collect();
        ids
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn stats(&self) -> Result<PoolStats> {
        let view = self.shared.heap.view();
        let containers = self.shared.catalog(&view)?.len(&view)?;
        let gc_pending = view.resolve(self.shared.hdr)?.gc_bin.len();
        drop(view);

        Ok(PoolStats {
            id: self.shared.id,
            version: self.shared.version(),
            containers,
            cached_containers: self.cache.len(),
            committed_dtx: self.shared.telemetry.committed_dtx(),
            lru_bytes: self.shared.telemetry.lru_bytes(),
            gc_pending,
            cached_objects: self.shared.obj_cache.len(),
            used_blocks: self.shared.space.as_ref().map(SpaceInfo::used_blocks),
            heap: self.shared.heap.stats(),
        })
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.shared.heap.stats()
    }

    /// Run the garbage collector until every bin is empty
    pub fn gc_wait(&self) -> Result<usize> {
        self.shared.gc.wait_all()
    }

    /// Arm a one-shot heap failure
    pub fn inject_fault(&self, point: FailPoint) {
        tracing::debug!("fault injected: {:?}", point);
        self.shared.heap.inject_fault(point);
    }

    /// Fold the WAL into a fresh heap image
    pub fn checkpoint(&self) -> Result<()> {
        self.shared.heap.checkpoint()
    }

    /// Checkpoint and stop the GC worker
    pub fn close(self) -> Result<()> {
        self.shared.heap.checkpoint()?;
        tracing::info!("pool {} closed", self.shared.id);
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shared.gc.shutdown();
        self.worker.join();
    }
}
