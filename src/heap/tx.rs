//! Scoped heap transactions
//!
//! `Tx` holds the heap write guard. Every object it touches is snapshotted into
//! an undo log before the first mutable borrow, so dropping an uncommitted
//! transaction restores the heap exactly, allocations included.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLockWriteGuard;

use crate::error::{CellarError, Result};
use crate::wal::{HeapWrite, Operation};

use super::{align_up, resolve_in, Durable, DurableObject, FailPoint, Heap, HeapState, Offset, Resolve};

enum Undo {
    /// Object allocated by this transaction
    Alloc { offset: u64 },

    /// Pre-transaction image of a modified object
    Snapshot { offset: u64, image: DurableObject },

    /// Image of an object freed by this transaction
    Free { offset: u64, image: DurableObject },
}

/// An open heap transaction; aborts on drop unless committed
pub struct Tx<'a> {
    heap: &'a Heap,
    state: RwLockWriteGuard<'a, HeapState>,
    undo: Vec<Undo>,

    /// Offsets whose pre-image is already in the undo log
    captured: HashSet<u64>,

    /// Offsets to log on commit
    touched: BTreeSet<u64>,

    start_next_offset: u64,
    start_root: u64,
    start_used: u64,
    finished: bool,
}

impl<'a> Tx<'a> {
    pub(super) fn new(heap: &'a Heap, state: RwLockWriteGuard<'a, HeapState>) -> Self {
        let start_next_offset = state.next_offset;
        let start_root = state.root;
        let start_used = state.used;
        Self {
            heap,
            state,
            undo: Vec::new(),
            captured: HashSet::new(),
            touched: BTreeSet::new(),
            start_next_offset,
            start_root,
            start_used,
            finished: false,
        }
    }

    /// Allocate a zero-initialized object
    pub fn zalloc<T: Durable>(&mut self) -> Result<Offset<T>> {
        self.alloc(T::default())
    }

    /// Allocate an object holding `value`
    pub fn alloc<T: Durable>(&mut self, value: T) -> Result<Offset<T>> {
        let footprint = value.footprint();
        if self.state.take_fail(FailPoint::Alloc) {
            return Err(CellarError::NoSpace {
                requested: footprint,
                available: 0,
            });
        }

        let available = self.heap.capacity().saturating_sub(self.state.used);
        if footprint > available {
            return Err(CellarError::NoSpace {
                requested: footprint,
                available,
            });
        }

        let offset = self.state.next_offset;
        self.state.next_offset += align_up(T::FOOTPRINT);
        self.state.used += footprint;
        self.state.objects.insert(offset, value.into_object());

        self.undo.push(Undo::Alloc { offset });
        self.captured.insert(offset);
        self.touched.insert(offset);

        Ok(Offset::from_raw(offset))
    }

    /// Free an object
    pub fn free<T: Durable>(&mut self, offset: Offset<T>) -> Result<()> {
        // Type check before removal
        self.resolve(offset)?;

        let raw = offset.raw();
        let image = self.state.objects.remove(&raw).ok_or_else(|| {
            CellarError::StorageFault(format!("double free of {} {:?}", T::KIND, offset))
        })?;
        self.state.used = self.state.used.saturating_sub(image.footprint());

        self.undo.push(Undo::Free { offset: raw, image });
        self.touched.insert(raw);
        Ok(())
    }

    /// Mutable access; the object joins the undo log first
    pub fn get_mut<T: Durable>(&mut self, offset: Offset<T>) -> Result<&mut T> {
        self.resolve(offset)?;

        let raw = offset.raw();
        if self.captured.insert(raw) {
            if let Some(image) = self.state.objects.get(&raw).cloned() {
                self.undo.push(Undo::Snapshot { offset: raw, image });
            }
        }
        self.touched.insert(raw);

        let object = self.state.objects.get_mut(&raw).ok_or_else(|| {
            CellarError::StorageFault(format!("dangling {} offset {:?}", T::KIND, offset))
        })?;
        T::from_object_mut(object).ok_or_else(|| {
            CellarError::StorageFault(format!("offset {:?} is not a {}", offset, T::KIND))
        })
    }

    /// Point the heap root at `offset`
    pub fn set_root<T: Durable>(&mut self, offset: Offset<T>) {
        self.state.root = offset.raw();
    }

    /// Offset of the heap root object
    pub fn root<T: Durable>(&self) -> Offset<T> {
        Offset::from_raw(self.state.root)
    }

    /// Make every change durable
    ///
    /// On error the transaction is rolled back before returning.
    pub fn commit(mut self) -> Result<()> {
        if self.state.take_fail(FailPoint::TxCommit) {
            return Err(CellarError::StorageFault(
                "injected transaction commit failure".to_string(),
            ));
        }

        // Objects resized through `get_mut` are charged here
        let used = self.settled_used();
        let capacity = self.heap.capacity();
        if used > capacity && used > self.start_used {
            return Err(CellarError::NoSpace {
                requested: used - self.start_used,
                available: capacity.saturating_sub(self.start_used),
            });
        }
        self.state.used = used;

        let root_changed = self.state.root != self.start_root;
        if !self.touched.is_empty() || root_changed {
            let writes = self
                .touched
                .iter()
                .map(|offset| match self.state.objects.get(offset) {
                    Some(object) => HeapWrite::Put {
                        offset: *offset,
                        object: object.clone(),
                    },
                    None => HeapWrite::Free { offset: *offset },
                })
                .collect();

            let operation = Operation::Commit {
                next_offset: self.state.next_offset,
                root: self.state.root,
                writes,
            };
            self.state.wal.append(operation)?;
            self.state.since_checkpoint += 1;
        }

        self.finished = true;

        if self.state.since_checkpoint >= self.heap.checkpoint_interval() {
            // Already durable in the WAL; a failed checkpoint only delays folding
            if let Err(e) = Heap::checkpoint_locked(self.heap.image_path(), &mut self.state) {
                tracing::warn!("heap checkpoint failed: {}", e);
            }
        }

        Ok(())
    }

    /// Roll back every change
    pub fn abort(self) {
        drop(self);
    }

    /// Heap usage with every touched object charged at its current size
    fn settled_used(&self) -> u64 {
        let mut before: HashMap<u64, u64> = HashMap::new();
        for undo in &self.undo {
            let (offset, bytes) = match undo {
                Undo::Alloc { offset } => (*offset, 0),
                Undo::Snapshot { offset, image } | Undo::Free { offset, image } => {
                    (*offset, image.footprint())
                }
            };
            before.entry(offset).or_insert(bytes);
        }

        before.into_iter().fold(self.start_used, |used, (offset, bytes)| {
            let now = self
                .state
                .objects
                .get(&offset)
                .map_or(0, DurableObject::footprint);
            used.saturating_add(now).saturating_sub(bytes)
        })
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Alloc { offset } => {
                    self.state.objects.remove(&offset);
                }
                Undo::Snapshot { offset, image } | Undo::Free { offset, image } => {
                    self.state.objects.insert(offset, image);
                }
            }
        }
        self.state.next_offset = self.start_next_offset;
        self.state.root = self.start_root;
        self.state.used = self.start_used;
    }
}

impl Resolve for Tx<'_> {
    fn resolve<T: Durable>(&self, offset: Offset<T>) -> Result<&T> {
        resolve_in(&self.state.objects, offset)
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!("transaction aborted, undoing {} change(s)", self.undo.len());
            self.rollback();
        }
    }
}
