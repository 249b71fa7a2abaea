//! Configuration for Cellar
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use uuid::Uuid;

use crate::error::{CellarError, Result};
use crate::pool::CURRENT_FORMAT;

/// Main configuration for a Cellar pool
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the pool files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── heap.img         (checkpointed heap image)
    ///     └── heap.wal         (committed transactions since the image)
    pub data_dir: PathBuf,

    /// Capacity of the persistent heap (in bytes)
    pub heap_capacity: u64,

    /// Format version stamped on newly formatted pools
    pub format_version: u32,

    /// Pool identifier for newly formatted pools (random when unset)
    pub pool_id: Option<Uuid>,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Committed transactions between two heap checkpoints
    pub checkpoint_interval: usize,

    // -------------------------------------------------------------------------
    // Tree Configuration
    // -------------------------------------------------------------------------
    /// Fan-out of the container catalog tree
    pub catalog_order: u16,

    /// Fan-out of each container's object tree
    pub obj_tree_order: u16,

    // -------------------------------------------------------------------------
    // DTX Configuration
    // -------------------------------------------------------------------------
    /// Slots per sub-array of the active DTX array
    pub dtx_array_len: usize,

    /// Number of sub-arrays of the active DTX array
    pub dtx_array_nr: usize,

    /// Committed records per durable committed blob
    pub dtx_blob_capacity: usize,

    /// Max committed records reindexed synchronously on open (None = all)
    pub open_reindex_limit: Option<usize>,

    // -------------------------------------------------------------------------
    // Space / GC Configuration
    // -------------------------------------------------------------------------
    /// Blocks managed by the space accounting subsystem (None = disabled)
    pub space_blocks: Option<u64>,

    /// Records reclaimed per garbage collection transaction
    pub gc_batch: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./cellar_pool"),
            heap_capacity: 256 * 1024 * 1024, // 256 MB
            format_version: CURRENT_FORMAT,
            pool_id: None,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            checkpoint_interval: 4096,
            catalog_order: 20,
            obj_tree_order: 20,
            dtx_array_len: 256,
            dtx_array_nr: 16,
            dtx_blob_capacity: 128,
            open_reindex_limit: None,
            space_blocks: Some(1 << 20),
            gc_batch: 64,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.catalog_order < 3 || self.obj_tree_order < 3 {
            return Err(CellarError::Config(format!(
                "tree order must be >= 3 (catalog={}, object={})",
                self.catalog_order, self.obj_tree_order
            )));
        }
        if self.dtx_array_len == 0 || self.dtx_array_nr == 0 {
            return Err(CellarError::Config(
                "DTX array needs at least one slot".to_string(),
            ));
        }
        let slots = self.dtx_array_len.checked_mul(self.dtx_array_nr);
        if slots.map_or(true, |slots| slots > u32::MAX as usize) {
            return Err(CellarError::Config(
                "DTX array capacity exceeds u32 slot indexes".to_string(),
            ));
        }
        if self.dtx_blob_capacity == 0 {
            return Err(CellarError::Config(
                "committed blob capacity must be non-zero".to_string(),
            ));
        }
        if self.gc_batch == 0 {
            return Err(CellarError::Config("gc batch must be non-zero".to_string()));
        }
        if self.format_version == 0 || self.format_version > CURRENT_FORMAT {
            return Err(CellarError::Config(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all pool files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the heap capacity (in bytes)
    pub fn heap_capacity(mut self, bytes: u64) -> Self {
        self.config.heap_capacity = bytes;
        self
    }

    /// Set the format version used when formatting a new pool
    pub fn format_version(mut self, version: u32) -> Self {
        self.config.format_version = version;
        self
    }

    /// Set the pool identifier used when formatting a new pool
    pub fn pool_id(mut self, id: Uuid) -> Self {
        self.config.pool_id = Some(id);
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the number of committed transactions between checkpoints
    pub fn checkpoint_interval(mut self, entries: usize) -> Self {
        self.config.checkpoint_interval = entries;
        self
    }

    /// Set the catalog tree order
    pub fn catalog_order(mut self, order: u16) -> Self {
        self.config.catalog_order = order;
        self
    }

    /// Set the object tree order
    pub fn obj_tree_order(mut self, order: u16) -> Self {
        self.config.obj_tree_order = order;
        self
    }

    /// Set the active DTX array geometry
    pub fn dtx_array(mut self, len: usize, nr: usize) -> Self {
        self.config.dtx_array_len = len;
        self.config.dtx_array_nr = nr;
        self
    }

    /// Set the number of records per committed blob
    pub fn dtx_blob_capacity(mut self, records: usize) -> Self {
        self.config.dtx_blob_capacity = records;
        self
    }

    /// Bound the committed reindex walk done inside open
    pub fn open_reindex_limit(mut self, limit: Option<usize>) -> Self {
        self.config.open_reindex_limit = limit;
        self
    }

    /// Enable (Some) or disable (None) space accounting
    pub fn space_blocks(mut self, blocks: Option<u64>) -> Self {
        self.config.space_blocks = blocks;
        self
    }

    /// Set the number of records reclaimed per GC transaction
    pub fn gc_batch(mut self, batch: usize) -> Self {
        self.config.gc_batch = batch;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
