//! Record classes
//!
//! A record class tells the tree how to allocate, free and update the durable
//! record hanging off each key. The tree stores only the record offset.

use crate::error::Result;
use crate::heap::{Durable, Offset, Tx};

/// Typed record behaviour plugged into a `BTree`
pub trait RecordClass {
    /// Durable record stored per key
    type Record: Durable;

    /// Caller payload handed to `rec_alloc` / `rec_update`
    type Input: ?Sized;

    /// Stamped into the tree root; `BTree::open` rejects a mismatch
    const TAG: u32;

    /// Exact key length, or 0 for variable-length keys
    const KEY_SIZE: usize;

    /// Allocate the record for a new key
    fn rec_alloc(
        &self,
        tx: &mut Tx<'_>,
        key: &[u8],
        input: &Self::Input,
    ) -> Result<Offset<Self::Record>>;

    /// Release the record of a deleted key
    fn rec_free(&self, tx: &mut Tx<'_>, record: Offset<Self::Record>) -> Result<()>;

    /// Insert over an existing key
    fn rec_update(
        &self,
        tx: &mut Tx<'_>,
        record: Offset<Self::Record>,
        input: &Self::Input,
    ) -> Result<()>;
}
