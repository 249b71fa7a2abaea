//! Hybrid logical clock
//!
//! Timestamps are physical nanoseconds with the low `LOGICAL_BITS` bits
//! replaced by a logical counter. `now()` never returns the same value twice
//! and never goes backwards, even when the wall clock does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

#[derive(Debug, Default)]
pub struct Hlc {
    last: AtomicU64,
}

impl Hlc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, strictly greater than every earlier one
    pub fn now(&self) -> u64 {
        let physical = Self::physical() & !LOGICAL_MASK;
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = if physical > last { physical } else { last + 1 };
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    /// Fold a remote timestamp in so later `now()` calls exceed it
    pub fn observe(&self, remote: u64) {
        self.last.fetch_max(remote, Ordering::AcqRel);
    }

    fn physical() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

