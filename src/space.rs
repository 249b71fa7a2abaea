//! Space Accounting Module
//!
//! Allocation hints per I/O class and optional block accounting.
//!
//! ## Responsibilities
//! - `HintDf`: durable per-class hint slot stored in each container descriptor
//! - `HintContext`: in-memory hint loaded at open, advanced by reservations and
//!   published back into the descriptor inside the caller's transaction
//! - `SpaceInfo`: pool-wide block budget (`NoSpace` when exhausted)
//!
//! Hints are advisory: losing one only costs locality, never correctness.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{CellarError, Result};

/// Number of I/O classes
pub const IO_CLASS_COUNT: usize = 2;

/// Bytes per accounted block
pub const BLOCK_SIZE: u64 = 4096;

/// Media an extent is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoClass {
    /// Byte-addressable storage class memory
    Scm,

    /// Block storage
    Nvme,
}

impl IoClass {
    pub const ALL: [IoClass; IO_CLASS_COUNT] = [IoClass::Scm, IoClass::Nvme];

    /// Small extents live on SCM, whole blocks go to NVMe
    pub fn for_size(size: u64) -> Self {
        if size < BLOCK_SIZE {
            IoClass::Scm
        } else {
            IoClass::Nvme
        }
    }

    pub fn index(self) -> usize {
        match self {
            IoClass::Scm => 0,
            IoClass::Nvme => 1,
        }
    }
}

/// Durable hint slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintDf {
    /// Next offset expected to be free
    pub offset: u64,

    /// Bumped on every publish
    pub seq: u64,
}

/// In-memory hint for one I/O class
#[derive(Debug, Clone)]
pub struct HintContext {
    class: IoClass,
    next: u64,
    seq: u64,
}

impl HintContext {
    /// Load from a durable slot
    pub fn load(class: IoClass, df: &HintDf) -> Self {
        Self {
            class,
            next: df.offset,
            seq: df.seq,
        }
    }

    pub fn class(&self) -> IoClass {
        self.class
    }

    /// Reserve `size` bytes; returns the hinted address
    ///
    /// The hint is left untouched when the extent would run past the end of
    /// the address space.
    pub fn reserve(&mut self, size: u64) -> Result<u64> {
        let addr = self.next;
        let unit = match self.class {
            IoClass::Scm => 64,
            IoClass::Nvme => BLOCK_SIZE,
        };
        let next = size
            .max(1)
            .div_ceil(unit)
            .checked_mul(unit)
            .and_then(|extent| addr.checked_add(extent))
            .ok_or(CellarError::NoSpace {
                requested: size,
                available: u64::MAX - addr,
            })?;
        self.next = next;
        self.seq += 1;
        Ok(addr)
    }

    /// Write the hint back into its durable slot
    ///
    /// Call with the slot borrowed from a transaction so the hint commits or
    /// aborts with the data it describes.
    pub fn publish(&self, df: &mut HintDf) {
        if self.seq > df.seq {
            df.offset = self.next;
            df.seq = self.seq;
        }
    }
}

/// Load one context per I/O class from a descriptor's hint slots
pub fn load_hints(slots: &[HintDf; IO_CLASS_COUNT]) -> [HintContext; IO_CLASS_COUNT] {
    IoClass::ALL.map(|class| HintContext::load(class, &slots[class.index()]))
}

/// Pool-wide block budget
#[derive(Debug)]
pub struct SpaceInfo {
    total_blocks: u64,
    used_blocks: AtomicU64,
}

impl SpaceInfo {
    /// Budget of `total_blocks` with `used_blocks` already taken
    pub fn new(total_blocks: u64, used_blocks: u64) -> Self {
        Self {
            total_blocks,
            used_blocks: AtomicU64::new(used_blocks),
        }
    }

    /// Blocks needed to hold `bytes`
    pub fn blocks_for(bytes: u64) -> u64 {
        bytes.div_ceil(BLOCK_SIZE)
    }

    /// Take `blocks` from the budget
    pub fn reserve(&self, blocks: u64) -> Result<()> {
        self.used_blocks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(blocks)
                    .filter(|total| *total <= self.total_blocks)
            })
            .map(|_| ())
            .map_err(|used| CellarError::NoSpace {
                requested: blocks.saturating_mul(BLOCK_SIZE),
                available: self.total_blocks.saturating_sub(used).saturating_mul(BLOCK_SIZE),
            })
    }

    /// Return `blocks` to the budget
    pub fn release(&self, blocks: u64) {
        let _ = self
            .used_blocks
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(blocks))
            });
    }

    pub fn used_blocks(&self) -> u64 {
        self.used_blocks.load(Ordering::Acquire)
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }
}
