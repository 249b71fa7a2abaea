//! Object records
//!
//! Each container keeps its objects in a tree keyed by the big-endian object
//! id. Deleted records either go straight back to the heap or, for trees of
//! live containers, into the container's GC bin.

use serde::{Deserialize, Serialize};

use crate::btree::RecordClass;
use crate::catalog::ContainerDf;
use crate::error::{CellarError, Result};
use crate::gc::{Gc, GcItem};
use crate::heap::{Offset, Tx};

/// Durable object record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDf {
    pub oid: u64,
    pub size: u64,
    pub epoch: u64,

    /// Placement chosen from the container's allocation hint
    pub addr: u64,
}

/// Payload for inserting or overwriting an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInput {
    pub size: u64,
    pub epoch: u64,
    pub addr: u64,
}

/// Tree key of `oid`
pub fn object_key(oid: u64) -> [u8; 8] {
    oid.to_be_bytes()
}

#[derive(Debug, Clone, Copy)]
pub struct ObjectClass {
    /// Descriptor whose bin receives freed records (None frees immediately)
    bin: Option<Offset<ContainerDf>>,
}

impl ObjectClass {
    /// Freed records return to the heap inside the deleting transaction
    pub fn immediate() -> Self {
        Self { bin: None }
    }

    /// Freed records are queued in `cont`'s GC bin
    pub fn deferred(cont: Offset<ContainerDf>) -> Self {
        Self { bin: Some(cont) }
    }

    pub(crate) fn rebind(&mut self, cont: Offset<ContainerDf>) {
        if self.bin.is_some() {
            self.bin = Some(cont);
        }
    }
}

impl RecordClass for ObjectClass {
    type Record = ObjectDf;
    type Input = ObjectInput;

    const TAG: u32 = 0x4f42_4a54; // "OBJT"
    const KEY_SIZE: usize = 8;

    fn rec_alloc(
        &self,
        tx: &mut Tx<'_>,
        key: &[u8],
        input: &ObjectInput,
    ) -> Result<Offset<ObjectDf>> {
        let oid = <[u8; 8]>::try_from(key)
            .map(u64::from_be_bytes)
            .map_err(|_| CellarError::InvalidArgument("object key must be 8 bytes".to_string()))?;

        tx.alloc(ObjectDf {
            oid,
            size: input.size,
            epoch: input.epoch,
            addr: input.addr,
        })
    }

    fn rec_free(&self, tx: &mut Tx<'_>, record: Offset<ObjectDf>) -> Result<()> {
        match self.bin {
            Some(cont) => Gc::enqueue_cont(tx, cont, GcItem::object(record)),
            None => tx.free(record),
        }
    }

    fn rec_update(
        &self,
        tx: &mut Tx<'_>,
        record: Offset<ObjectDf>,
        input: &ObjectInput,
    ) -> Result<()> {
        let df = tx.get_mut(record)?;
        df.size = input.size;
        df.epoch = df.epoch.max(input.epoch);
        df.addr = input.addr;
        Ok(())
    }
}
