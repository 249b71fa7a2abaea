//! Fixed-capacity LRU slot array
//!
//! ```text
//!   sub-array 0          sub-array 1 (allocated on demand)
//!   ┌───┬───┬───┬───┐    ┌───┬───┬───┬───┐
//!   │ 0 │ 1 │ 2 │ 3 │    │ 4 │ 5 │ 6 │ 7 │
//!   └───┴───┴───┴───┘    └───┴───┴───┴───┘
//!   free queue: front = next slot handed out
//!   lru list:   head = least recently used
//! ```
//!
//! Slots are addressed by `LruKey { idx, gen }`. Every free bumps the slot
//! generation, so a stale key never resolves to a reused slot. With unique
//! reuse a freed slot goes to the back of the free queue instead of the front.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{CellarError, Result};

/// Stable address of an occupied slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LruKey {
    pub idx: u32,
    pub gen: u32,
}

/// Memory hooks fired when sub-arrays are allocated or released
pub trait LruCallbacks: Send + Sync {
    fn on_alloc(&self, bytes: usize);
    fn on_free(&self, bytes: usize);
}

struct Slot<T> {
    gen: u32,
    value: Option<T>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Self {
            gen: 0,
            value: None,
            prev: None,
            next: None,
        }
    }
}

pub struct LruArray<T> {
    sub_len: usize,
    subs: Vec<Option<Vec<Slot<T>>>>,
    free: VecDeque<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    used: usize,
    reuse_unique: bool,
    callbacks: Option<Arc<dyn LruCallbacks>>,
}

impl<T> LruArray<T> {
    /// `nr` sub-arrays of `len` slots each; nothing is allocated up front
    pub fn new(
        len: usize,
        nr: usize,
        reuse_unique: bool,
        callbacks: Option<Arc<dyn LruCallbacks>>,
    ) -> Result<Self> {
        if len == 0 || nr == 0 {
            return Err(CellarError::InvalidArgument(
                "LRU array needs at least one slot".to_string(),
            ));
        }
        if len.checked_mul(nr).map_or(true, |cap| cap > u32::MAX as usize) {
            return Err(CellarError::InvalidArgument(format!(
                "LRU array of {}x{} slots is too large",
                nr, len
            )));
        }

        Ok(Self {
            sub_len: len,
            subs: (0..nr).map(|_| None).collect(),
            free: VecDeque::new(),
            head: None,
            tail: None,
            used: 0,
            reuse_unique,
            callbacks,
        })
    }

    pub fn capacity(&self) -> usize {
        self.sub_len * self.subs.len()
    }

    pub fn len(&self) -> usize {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Bytes held by allocated sub-arrays
    pub fn allocated_bytes(&self) -> usize {
        self.subs.iter().flatten().count() * self.sub_bytes()
    }

    /// Store `value` in a free slot, as most recently used
    pub fn alloc(&mut self, value: T) -> Result<LruKey> {
        if self.free.is_empty() {
            self.grow()?;
        }
        let idx = self.free.pop_front().ok_or_else(|| {
            CellarError::OutOfMemory(format!("all {} LRU slots in use", self.capacity()))
        })?;

        let slot = self.slot_mut(idx);
        slot.value = Some(value);
        let gen = slot.gen;
        self.push_back(idx);
        self.used += 1;

        Ok(LruKey { idx, gen })
    }

    pub fn get(&self, key: LruKey) -> Option<&T> {
        self.slot(key.idx)
            .filter(|slot| slot.gen == key.gen)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: LruKey) -> Option<&mut T> {
        if self.get(key).is_none() {
            return None;
        }
        self.slot_mut(key.idx).value.as_mut()
    }

    /// Mark a slot most recently used
    pub fn touch(&mut self, key: LruKey) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        self.unlink(key.idx);
        self.push_back(key.idx);
        true
    }

    /// Release a slot and return its value
    pub fn free(&mut self, key: LruKey) -> Option<T> {
        self.get(key)?;

        self.unlink(key.idx);
        let slot = self.slot_mut(key.idx);
        let value = slot.value.take();
        slot.gen = slot.gen.wrapping_add(1);

        if self.reuse_unique {
            self.free.push_back(key.idx);
        } else {
            self.free.push_front(key.idx);
        }
        self.used -= 1;
        value
    }

    /// Occupied slots from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = (LruKey, &T)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let idx = cursor?;
            let slot = self.slot(idx)?;
            cursor = slot.next;
            slot.value
                .as_ref()
                .map(|value| (LruKey { idx, gen: slot.gen }, value))
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn sub_bytes(&self) -> usize {
        self.sub_len * std::mem::size_of::<Slot<T>>()
    }

    fn grow(&mut self) -> Result<()> {
        let Some(sub) = self.subs.iter().position(Option::is_none) else {
            return Err(CellarError::OutOfMemory(format!(
                "all {} LRU slots in use",
                self.capacity()
            )));
        };

        self.subs[sub] = Some((0..self.sub_len).map(|_| Slot::vacant()).collect());
        let base = (sub * self.sub_len) as u32;
        self.free.extend(base..base + self.sub_len as u32);

        let bytes = self.sub_bytes();
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_alloc(bytes);
        }
        tracing::trace!("LRU sub-array {} allocated ({} bytes)", sub, bytes);
        Ok(())
    }

    fn slot(&self, idx: u32) -> Option<&Slot<T>> {
        let idx = idx as usize;
        self.subs
            .get(idx / self.sub_len)?
            .as_ref()?
            .get(idx % self.sub_len)
    }

    /// Only called with indexes handed out by `grow`
    fn slot_mut(&mut self, idx: u32) -> &mut Slot<T> {
        let idx = idx as usize;
        let sub_len = self.sub_len;
        match self.subs[idx / sub_len].as_mut() {
            Some(sub) => &mut sub[idx % sub_len],
            None => unreachable!("slot {} in unallocated sub-array", idx),
        }
    }

    fn push_back(&mut self, idx: u32) {
        let tail = self.tail;
        {
            let slot = self.slot_mut(idx);
            slot.prev = tail;
            slot.next = None;
        }
        match tail {
            Some(tail) => self.slot_mut(tail).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: u32) {
        let (prev, next) = {
            let slot = self.slot_mut(idx);
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slot_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }
}

impl<T> Drop for LruArray<T> {
    fn drop(&mut self) {
        let allocated = self.allocated_bytes();
        if allocated > 0 {
            if let Some(callbacks) = &self.callbacks {
                callbacks.on_free(allocated);
            }
        }
    }
}
