//! Catalog record class
//!
//! Keys are the 16 raw bytes of the container UUID; records are `ContainerDf`.
//! Freeing a record only hands the descriptor to the garbage collector, the
//! object tree and committed list behind it are reclaimed in the background.
//! Timestamp anchors of freed records are evicted by `Catalog::commit`, after
//! the freeing transaction is durable.

use parking_lot::Mutex;
use uuid::Uuid;

use crate::btree::{BTree, RecordClass};
use crate::container::ObjectClass;
use crate::error::{CellarError, Result};
use crate::gc::{Gc, GcItem};
use crate::heap::{Offset, Resolve, Tx};
use crate::pool::PoolDf;
use crate::ts::{TsTable, TsType};

use super::ContainerDf;

pub struct ContainerClass<'a> {
    ts: &'a TsTable,
    obj_tree_order: u16,

    /// Anchors of descriptors freed in the current transaction
    freed: Mutex<Vec<u32>>,
}

impl<'a> ContainerClass<'a> {
    pub fn new(ts: &'a TsTable, obj_tree_order: u16) -> Self {
        Self {
            ts,
            obj_tree_order,
            freed: Mutex::new(Vec::new()),
        }
    }

    /// Evict the anchors of every descriptor freed so far
    pub(crate) fn evict_freed(&self) {
        for ts_idx in self.freed.lock().drain(..) {
            self.ts.evict(ts_idx, TsType::Container);
        }
    }
}

impl RecordClass for ContainerClass<'_> {
    type Record = ContainerDf;

    /// `Some` carries a descriptor to copy instead of creating a fresh one
    type Input = Option<ContainerDf>;

    const TAG: u32 = 0x434f_4e54; // "CONT"
    const KEY_SIZE: usize = 16;

    fn rec_alloc(
        &self,
        tx: &mut Tx<'_>,
        key: &[u8],
        input: &Option<ContainerDf>,
    ) -> Result<Offset<ContainerDf>> {
        let id = Uuid::from_slice(key)
            .map_err(|e| CellarError::InvalidArgument(format!("container key: {}", e)))?;

        let hdr: Offset<PoolDf> = tx.root();
        let (version, ts_idx) = {
            let pool = tx.get_mut(hdr)?;
            let idx = pool.next_ts_idx;
            pool.next_ts_idx = pool.next_ts_idx.wrapping_add(1);
            (pool.version, idx)
        };

        let mut df = match input {
            Some(source) => {
                if source.obj_root.is_null() {
                    return Err(CellarError::InvalidArgument(
                        "source descriptor has no object tree".to_string(),
                    ));
                }
                // The source tree root moves into a record owned by the copy
                let root = tx.resolve(source.obj_root)?.clone();
                let mut df = source.clone();
                df.obj_root = tx.alloc(root)?;
                tx.free(source.obj_root)?;
                df
            }
            None => {
                let tree = BTree::create(tx, self.obj_tree_order, ObjectClass::immediate())?;
                let mut df = ContainerDf {
                    format: version,
                    obj_root: tree.root(),
                    ..ContainerDf::default()
                };
                Gc::init_cont(&mut df);
                df
            }
        };
        df.id = id;
        df.ts_idx = ts_idx;

        let offset = tx.zalloc::<ContainerDf>()?;
        *tx.get_mut(offset)? = df;

        tracing::debug!("container {} descriptor allocated at {:?}", id, offset);
        Ok(offset)
    }

    fn rec_free(&self, tx: &mut Tx<'_>, record: Offset<ContainerDf>) -> Result<()> {
        let (id, ts_idx) = {
            let df = tx.resolve(record)?;
            (df.id, df.ts_idx)
        };

        self.freed.lock().push(ts_idx);
        Gc::enqueue(tx, GcItem::container(record))?;

        tracing::debug!("container {} descriptor queued for reclamation", id);
        Ok(())
    }

    fn rec_update(
        &self,
        _tx: &mut Tx<'_>,
        record: Offset<ContainerDf>,
        _input: &Option<ContainerDf>,
    ) -> Result<()> {
        tracing::debug!("catalog update of {:?} ignored", record);
        Ok(())
    }
}
