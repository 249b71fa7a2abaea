//! Catalog Module
//!
//! The durable container catalog of a pool: a B+tree keyed by container UUID
//! whose records are container descriptors.
//!
//! ## Responsibilities
//! - lookup / create / delete of descriptors inside the caller's transaction
//! - `commit`: commit a transaction that deleted entries, then evict their
//!   timestamp anchors
//! - Restartable iteration over every container
//!
//! The catalog never begins transactions; it only mutates the one it is given.

mod descriptor;
mod record;

use uuid::Uuid;

use crate::btree::{Anchor, BTree, TreeIter, TreeRootDf};
use crate::error::{CellarError, Result};
use crate::heap::{Offset, Resolve, Tx};

pub use descriptor::ContainerDf;
pub use record::ContainerClass;

/// Handle on a pool's catalog tree
pub struct Catalog<'a> {
    tree: BTree<ContainerClass<'a>>,
}

impl<'a> Catalog<'a> {
    /// Create an empty catalog tree; returns its root
    pub fn format(
        tx: &mut Tx<'_>,
        order: u16,
        class: ContainerClass<'a>,
    ) -> Result<Offset<TreeRootDf>> {
        Ok(BTree::create(tx, order, class)?.root())
    }

    pub fn open(
        view: &impl Resolve,
        root: Offset<TreeRootDf>,
        class: ContainerClass<'a>,
    ) -> Result<Self> {
        Ok(Self {
            tree: BTree::open(view, root, class)?,
        })
    }

    /// Descriptor of container `id`
    pub fn lookup(&self, view: &impl Resolve, id: Uuid) -> Result<Offset<ContainerDf>> {
        self.tree
            .lookup(view, id.as_bytes())?
            .ok_or(CellarError::NotFound)
    }

    /// Insert a descriptor for `id`, fresh or copied from `existing`
    pub fn create(
        &self,
        tx: &mut Tx<'_>,
        id: Uuid,
        existing: Option<ContainerDf>,
    ) -> Result<Offset<ContainerDf>> {
        if self.tree.lookup(&*tx, id.as_bytes())?.is_some() {
            return Err(CellarError::AlreadyExists);
        }
        let (offset, _) = self.tree.insert(tx, id.as_bytes(), &existing)?;
        Ok(offset)
    }

    /// Remove the entry for `id`; the descriptor goes to the GC
    pub fn delete(&self, tx: &mut Tx<'_>, id: Uuid) -> Result<()> {
        self.tree.delete(tx, id.as_bytes())
    }

    /// Commit `tx`, then evict the timestamp anchors of the descriptors it
    /// freed. On failure the anchors stay in place with their containers.
    pub fn commit(&self, tx: Tx<'_>) -> Result<()> {
        tx.commit()?;
        self.tree.class().evict_freed();
        Ok(())
    }

    /// Containers in UUID order, starting after `anchor`
    pub fn iter<'t, V: Resolve>(&'t self, view: &'t V, anchor: Anchor) -> CatalogIter<'t, 'a, V> {
        CatalogIter {
            inner: self.tree.iter(view, anchor),
        }
    }

    pub fn len(&self, view: &impl Resolve) -> Result<u64> {
        self.tree.len(view)
    }

    pub fn is_empty(&self, view: &impl Resolve) -> Result<bool> {
        self.tree.is_empty(view)
    }
}

/// Lazy catalog walk yielding `(uuid, descriptor)` pairs
pub struct CatalogIter<'t, 'a, V: Resolve> {
    inner: TreeIter<'t, ContainerClass<'a>, V>,
}

impl<V: Resolve> CatalogIter<'_, '_, V> {
    /// Position to resume a later walk from
    pub fn anchor(&self) -> &Anchor {
        self.inner.anchor()
    }
}

impl<V: Resolve> Iterator for CatalogIter<'_, '_, V> {
    type Item = Result<(Uuid, Offset<ContainerDf>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.and_then(|(key, offset)| {
            let id = Uuid::from_slice(&key).map_err(|e| {
                CellarError::StorageFault(format!("corrupt catalog key: {}", e))
            })?;
            Ok((id, offset))
        }))
    }
}
