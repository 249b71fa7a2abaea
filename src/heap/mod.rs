//! Persistent Heap Module
//!
//! A transactional object heap standing in for persistent memory.
//!
//! ## Responsibilities
//! - Typed offsets (`Offset<T>`) resolved only through a view or transaction
//! - Scoped transactions with an undo log: abort on drop, explicit commit
//! - Durability: committed transactions go to the WAL, the WAL is folded into
//!   a checkpointed image every `checkpoint_interval` commits
//! - Capacity accounting (`NoSpace`) and one-shot fault injection
//!
//! ## Concurrency
//! A single `RwLock` guards the heap. A transaction holds the write guard for
//! its whole life, so transactions on one pool are serialized; views hold the
//! read guard.

mod image;
mod object;
mod offset;
mod tx;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::config::Config;
use crate::error::{CellarError, Result};
use crate::wal::{HeapWrite, Operation, WalRecovery, WalWriter};

use image::HeapImage;

pub use object::{Durable, DurableObject, Payload};
pub use offset::Offset;
pub use tx::Tx;

/// First usable offset; 0 stays null
const HEAP_BASE: u64 = 64;

/// Allocation granularity
const HEAP_ALIGN: u64 = 64;

/// Injectable one-shot failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// The next `Heap::begin` fails
    TxBegin,

    /// The next `Tx::commit` fails and the transaction rolls back
    TxCommit,

    /// The next allocation reports `NoSpace`
    Alloc,
}

/// Heap usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub objects: usize,
    pub used_bytes: u64,
    pub capacity: u64,
    pub next_lsn: u64,
}

/// Read access to durable objects
pub trait Resolve {
    fn resolve<T: Durable>(&self, offset: Offset<T>) -> Result<&T>;
}

pub(crate) struct HeapState {
    objects: HashMap<u64, DurableObject>,
    next_offset: u64,
    used: u64,
    root: u64,
    wal: WalWriter,
    since_checkpoint: usize,
    fail_point: Option<FailPoint>,
}

impl HeapState {
    fn take_fail(&mut self, point: FailPoint) -> bool {
        if self.fail_point == Some(point) {
            self.fail_point = None;
            true
        } else {
            false
        }
    }
}

/// The persistent heap of one pool
pub struct Heap {
    state: RwLock<HeapState>,
    capacity: u64,
    image_path: PathBuf,
    checkpoint_interval: usize,
}

impl Heap {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const IMAGE_FILENAME: &'static str = "heap.img";
    const WAL_FILENAME: &'static str = "heap.wal";

    /// Open or create the heap stored in `dir`
    ///
    /// On startup:
    /// 1. Load the checkpointed image if present
    /// 2. Replay WAL entries newer than the image
    /// 3. Fold replayed entries into a fresh image
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let image_path = dir.join(Self::IMAGE_FILENAME);
        let wal_path = dir.join(Self::WAL_FILENAME);

        let image = if image_path.exists() {
            HeapImage::read(&image_path)?
        } else {
            HeapImage {
                next_offset: HEAP_BASE,
                ..HeapImage::default()
            }
        };

        let image_lsn = image.lsn;
        let mut objects: HashMap<u64, DurableObject> = image.objects.into_iter().collect();
        let mut next_offset = image.next_offset.max(HEAP_BASE);
        let mut root = image.root;
        let mut last_lsn = image_lsn;
        let mut replayed = 0u64;

        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;
            for entry in entries {
                if entry.lsn <= image_lsn {
                    continue;
                }
                let Operation::Commit {
                    next_offset: after,
                    root: new_root,
                    writes,
                } = entry.operation;
                for write in writes {
                    match write {
                        HeapWrite::Put { offset, object } => {
                            objects.insert(offset, object);
                        }
                        HeapWrite::Free { offset } => {
                            objects.remove(&offset);
                        }
                    }
                }
                next_offset = next_offset.max(after);
                root = new_root;
                last_lsn = entry.lsn;
                replayed += 1;
            }

            if replayed > 0 || result.entries_corrupted > 0 {
                tracing::info!(
                    "heap recovery in {}: {} transactions replayed, {} corrupted, last_lsn={}",
                    dir.display(),
                    replayed,
                    result.entries_corrupted,
                    last_lsn
                );
            }
        }

        let used = objects.values().map(DurableObject::footprint).sum();
        let wal = WalWriter::open_at(&wal_path, config.wal_sync_strategy, last_lsn + 1)?;

        let heap = Self {
            state: RwLock::new(HeapState {
                objects,
                next_offset,
                used,
                root,
                wal,
                since_checkpoint: 0,
                fail_point: None,
            }),
            capacity: config.heap_capacity,
            image_path,
            checkpoint_interval: config.checkpoint_interval.max(1),
        };

        // Replayed transactions are durable in the WAL; fold them into the image
        if replayed > 0 {
            heap.checkpoint()?;
        }

        Ok(heap)
    }

    /// Start a transaction (blocks while another one is running)
    pub fn begin(&self) -> Result<Tx<'_>> {
        let mut state = self.state.write();
        if state.take_fail(FailPoint::TxBegin) {
            return Err(CellarError::StorageFault(
                "injected transaction begin failure".to_string(),
            ));
        }
        Ok(Tx::new(self, state))
    }

    /// Read-only access to durable objects
    pub fn view(&self) -> HeapView<'_> {
        HeapView {
            state: self.state.read(),
        }
    }

    /// Offset of the heap root object (null on a fresh heap)
    pub fn root<T: Durable>(&self) -> Offset<T> {
        Offset::from_raw(self.state.read().root)
    }

    /// Write a checkpoint image and truncate the WAL
    pub fn checkpoint(&self) -> Result<()> {
        let mut state = self.state.write();
        Self::checkpoint_locked(&self.image_path, &mut state)
    }

    /// fsync outstanding WAL entries
    pub fn sync_wal(&self) -> Result<()> {
        self.state.write().wal.sync()
    }

    /// Arm a one-shot failure
    pub fn inject_fault(&self, point: FailPoint) {
        self.state.write().fail_point = Some(point);
    }

    pub fn stats(&self) -> HeapStats {
        let state = self.state.read();
        HeapStats {
            objects: state.objects.len(),
            used_bytes: state.used,
            capacity: self.capacity,
            next_lsn: state.wal.current_lsn(),
        }
    }

    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn checkpoint_interval(&self) -> usize {
        self.checkpoint_interval
    }

    pub(crate) fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub(crate) fn checkpoint_locked(image_path: &Path, state: &mut HeapState) -> Result<()> {
        let mut objects: Vec<(u64, DurableObject)> = state
            .objects
            .iter()
            .map(|(offset, object)| (*offset, object.clone()))
            .collect();
        objects.sort_by_key(|(offset, _)| *offset);

        let image = HeapImage {
            lsn: state.wal.current_lsn() - 1,
            next_offset: state.next_offset,
            root: state.root,
            objects,
        };
        image.write(image_path)?;
        state.wal.truncate()?;
        state.since_checkpoint = 0;

        tracing::debug!(
            "heap checkpoint at LSN {} ({} objects)",
            image.lsn,
            image.objects.len()
        );
        Ok(())
    }
}

/// Shared read guard over the heap
pub struct HeapView<'a> {
    state: RwLockReadGuard<'a, HeapState>,
}

impl HeapView<'_> {
    /// Offset of the heap root object
    pub fn root<T: Durable>(&self) -> Offset<T> {
        Offset::from_raw(self.state.root)
    }
}

impl Resolve for HeapView<'_> {
    fn resolve<T: Durable>(&self, offset: Offset<T>) -> Result<&T> {
        resolve_in(&self.state.objects, offset)
    }
}

pub(crate) fn resolve_in<T: Durable>(
    objects: &HashMap<u64, DurableObject>,
    offset: Offset<T>,
) -> Result<&T> {
    if offset.is_null() {
        return Err(CellarError::StorageFault(format!(
            "null {} offset",
            T::KIND
        )));
    }

    let object = objects.get(&offset.raw()).ok_or_else(|| {
        CellarError::StorageFault(format!("dangling {} offset {:?}", T::KIND, offset))
    })?;

    T::from_object(object).ok_or_else(|| {
        CellarError::StorageFault(format!(
            "offset {:?} holds {} not {}",
            offset,
            object.kind(),
            T::KIND
        ))
    })
}

pub(crate) fn align_up(size: u64) -> u64 {
    size.max(1).div_ceil(HEAP_ALIGN) * HEAP_ALIGN
}
