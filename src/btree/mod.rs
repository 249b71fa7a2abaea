//! B-tree Module
//!
//! Generic durable B+tree living in the persistent heap.
//!
//! ## Responsibilities
//! - Ordered byte-string keys mapped to typed durable records
//! - Record allocation/free delegated to a `RecordClass`
//! - Restartable iteration through `Anchor`s
//!
//! The tree never opens transactions: every mutation takes the caller's `Tx`.
//! Deletion removes empty nodes but does not rebalance underfull ones.

mod class;
mod iter;
mod node;

use crate::error::{CellarError, Result};
use crate::heap::{Offset, Resolve, Tx};

pub use class::RecordClass;
pub use iter::{Anchor, TreeIter};
pub use node::{TreeNodeDf, TreeRootDf};

/// Open handle on a durable tree
pub struct BTree<C: RecordClass> {
    root: Offset<TreeRootDf>,
    class: C,
}

impl<C: RecordClass> BTree<C> {
    /// Create an empty tree and return its handle
    pub fn create(tx: &mut Tx<'_>, order: u16, class: C) -> Result<Self> {
        if order < 3 {
            return Err(CellarError::InvalidArgument(format!(
                "tree order {} below minimum 3",
                order
            )));
        }

        let node = tx.alloc(TreeNodeDf::empty_leaf())?;
        let root = tx.alloc(TreeRootDf {
            class_tag: C::TAG,
            order,
            depth: 0,
            count: 0,
            node,
        })?;

        Ok(Self { root, class })
    }

    /// Open an existing tree
    pub fn open(view: &impl Resolve, root: Offset<TreeRootDf>, class: C) -> Result<Self> {
        let df = view.resolve(root)?;
        if df.class_tag != C::TAG {
            return Err(CellarError::StorageFault(format!(
                "tree {:?} has class tag {:#x}, expected {:#x}",
                root,
                df.class_tag,
                C::TAG
            )));
        }
        Ok(Self { root, class })
    }

    pub fn root(&self) -> Offset<TreeRootDf> {
        self.root
    }

    pub fn class(&self) -> &C {
        &self.class
    }

    pub(crate) fn class_mut(&mut self) -> &mut C {
        &mut self.class
    }

    /// Repoint the handle at another root of the same class
    pub fn reset_root(&mut self, root: Offset<TreeRootDf>) {
        self.root = root;
    }

    /// Number of records
    pub fn len(&self, view: &impl Resolve) -> Result<u64> {
        Ok(view.resolve(self.root)?.count)
    }

    pub fn is_empty(&self, view: &impl Resolve) -> Result<bool> {
        Ok(self.len(view)? == 0)
    }

    /// Record offset for `key`, if present
    pub fn lookup(&self, view: &impl Resolve, key: &[u8]) -> Result<Option<Offset<C::Record>>> {
        self.check_key(key)?;

        let mut node_off = view.resolve(self.root)?.node;
        loop {
            let node = view.resolve(node_off)?;
            if node.leaf {
                return Ok(node
                    .keys
                    .binary_search_by(|k| k.as_slice().cmp(key))
                    .ok()
                    .map(|pos| Offset::from_raw(node.slots[pos])));
            }
            node_off = Offset::from_raw(node.slots[node.child_index(key)]);
        }
    }

    /// Insert `key`, allocating its record through the class
    ///
    /// An existing key is handed to `rec_update` instead. Returns the record
    /// offset and whether a new record was allocated.
    pub fn insert(
        &self,
        tx: &mut Tx<'_>,
        key: &[u8],
        input: &C::Input,
    ) -> Result<(Offset<C::Record>, bool)> {
        if let Some(existing) = self.lookup(&*tx, key)? {
            self.class.rec_update(tx, existing, input)?;
            return Ok((existing, false));
        }

        let record = self.class.rec_alloc(tx, key, input)?;
        let (order, top) = {
            let root = tx.resolve(self.root)?;
            (root.order as usize, root.node)
        };

        if let Some((separator, right)) = self.insert_rec(tx, top, key, record.raw(), order)? {
            let new_top = tx.alloc(TreeNodeDf {
                leaf: false,
                keys: vec![separator],
                slots: vec![top.raw(), right.raw()],
            })?;
            let root = tx.get_mut(self.root)?;
            root.node = new_top;
            root.depth += 1;
        }

        tx.get_mut(self.root)?.count += 1;
        Ok((record, true))
    }

    /// Remove `key` and free its record through the class
    pub fn delete(&self, tx: &mut Tx<'_>, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        let top = tx.resolve(self.root)?.node;
        let (record, top_empty) = self
            .delete_rec(tx, top, key)?
            .ok_or(CellarError::NotFound)?;

        if top_empty && !tx.resolve(top)?.leaf {
            tx.free(top)?;
            let leaf = tx.alloc(TreeNodeDf::empty_leaf())?;
            let root = tx.get_mut(self.root)?;
            root.node = leaf;
            root.depth = 0;
        }
        self.collapse(tx)?;

        let root = tx.get_mut(self.root)?;
        root.count = root.count.saturating_sub(1);

        self.class.rec_free(tx, Offset::from_raw(record))
    }

    /// Smallest key strictly greater than `bound` (or the first key)
    pub fn next_after(
        &self,
        view: &impl Resolve,
        bound: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, Offset<C::Record>)>> {
        let top = view.resolve(self.root)?.node;
        Ok(Self::find_next(view, top, bound)?
            .map(|(key, slot)| (key, Offset::from_raw(slot))))
    }

    /// Iterate in key order starting after `anchor`
    pub fn iter<'t, V: Resolve>(&'t self, view: &'t V, anchor: Anchor) -> TreeIter<'t, C, V> {
        TreeIter::new(self, view, anchor)
    }

    /// Delete up to `max` records from the front; returns how many went
    pub fn drain(&self, tx: &mut Tx<'_>, max: usize) -> Result<usize> {
        let mut removed = 0;
        while removed < max {
            let Some((key, _)) = self.next_after(&*tx, None)? else {
                break;
            };
            self.delete(tx, &key)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Free every record, node and the root itself
    pub fn destroy(self, tx: &mut Tx<'_>) -> Result<()> {
        let top = tx.resolve(self.root)?.node;
        self.destroy_rec(tx, top)?;
        tx.free(self.root)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if C::KEY_SIZE != 0 && key.len() != C::KEY_SIZE {
            return Err(CellarError::InvalidArgument(format!(
                "key is {} bytes, class expects {}",
                key.len(),
                C::KEY_SIZE
            )));
        }
        Ok(())
    }

    /// Returns the separator and new right sibling when `node_off` split
    fn insert_rec(
        &self,
        tx: &mut Tx<'_>,
        node_off: Offset<TreeNodeDf>,
        key: &[u8],
        record: u64,
        order: usize,
    ) -> Result<Option<(Vec<u8>, Offset<TreeNodeDf>)>> {
        let (leaf, index) = {
            let node = tx.resolve(node_off)?;
            if node.leaf {
                match node.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                    Ok(_) => {
                        return Err(CellarError::StorageFault(
                            "key already present in leaf".to_string(),
                        ))
                    }
                    Err(pos) => (true, pos),
                }
            } else {
                (false, node.child_index(key))
            }
        };

        if leaf {
            let node = tx.get_mut(node_off)?;
            node.keys.insert(index, key.to_vec());
            node.slots.insert(index, record);
            if node.keys.len() <= order {
                return Ok(None);
            }

            let mid = node.keys.len() / 2;
            let right = TreeNodeDf {
                leaf: true,
                keys: node.keys.split_off(mid),
                slots: node.slots.split_off(mid),
            };
            let separator = right.keys[0].clone();
            let right = tx.alloc(right)?;
            return Ok(Some((separator, right)));
        }

        let child = Offset::from_raw(tx.resolve(node_off)?.slots[index]);
        let Some((separator, right)) = self.insert_rec(tx, child, key, record, order)? else {
            return Ok(None);
        };

        let node = tx.get_mut(node_off)?;
        node.keys.insert(index, separator);
        node.slots.insert(index + 1, right.raw());
        if node.keys.len() <= order {
            return Ok(None);
        }

        let mid = node.keys.len() / 2;
        let mut upper = node.keys.split_off(mid);
        let separator = upper.remove(0);
        let right = TreeNodeDf {
            leaf: false,
            keys: upper,
            slots: node.slots.split_off(mid + 1),
        };
        let right = tx.alloc(right)?;
        Ok(Some((separator, right)))
    }

    /// Returns the removed record and whether `node_off` is now empty
    fn delete_rec(
        &self,
        tx: &mut Tx<'_>,
        node_off: Offset<TreeNodeDf>,
        key: &[u8],
    ) -> Result<Option<(u64, bool)>> {
        let (leaf, index) = {
            let node = tx.resolve(node_off)?;
            if node.leaf {
                match node.keys.binary_search_by(|k| k.as_slice().cmp(key)) {
                    Ok(pos) => (true, pos),
                    Err(_) => return Ok(None),
                }
            } else {
                (false, node.child_index(key))
            }
        };

        if leaf {
            let node = tx.get_mut(node_off)?;
            node.keys.remove(index);
            let record = node.slots.remove(index);
            return Ok(Some((record, node.keys.is_empty())));
        }

        let child = Offset::from_raw(tx.resolve(node_off)?.slots[index]);
        let Some((record, child_empty)) = self.delete_rec(tx, child, key)? else {
            return Ok(None);
        };
        if !child_empty {
            return Ok(Some((record, false)));
        }

        tx.free(child)?;
        let node = tx.get_mut(node_off)?;
        node.slots.remove(index);
        if !node.keys.is_empty() {
            node.keys.remove(index.saturating_sub(1));
        }
        Ok(Some((record, node.slots.is_empty())))
    }

    /// Shrink the tree while the top node has a single child
    fn collapse(&self, tx: &mut Tx<'_>) -> Result<()> {
        loop {
            let top = tx.resolve(self.root)?.node;
            let only_child = {
                let node = tx.resolve(top)?;
                if node.leaf || node.slots.len() != 1 {
                    return Ok(());
                }
                Offset::from_raw(node.slots[0])
            };

            tx.free(top)?;
            let root = tx.get_mut(self.root)?;
            root.node = only_child;
            root.depth = root.depth.saturating_sub(1);
        }
    }

    fn find_next(
        view: &impl Resolve,
        node_off: Offset<TreeNodeDf>,
        bound: Option<&[u8]>,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        let node = view.resolve(node_off)?;
        if node.leaf {
            let start = match bound {
                Some(bound) => node.keys.partition_point(|k| k.as_slice() <= bound),
                None => 0,
            };
            return Ok(node.keys.get(start).map(|k| (k.clone(), node.slots[start])));
        }

        let start = bound.map(|b| node.child_index(b)).unwrap_or(0);
        for slot in &node.slots[start..] {
            if let Some(found) = Self::find_next(view, Offset::from_raw(*slot), bound)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    fn destroy_rec(&self, tx: &mut Tx<'_>, node_off: Offset<TreeNodeDf>) -> Result<()> {
        let node = tx.resolve(node_off)?.clone();
        for slot in node.slots {
            if node.leaf {
                self.class.rec_free(tx, Offset::from_raw(slot))?;
            } else {
                self.destroy_rec(tx, Offset::from_raw(slot))?;
            }
        }
        tx.free(node_off)
    }
}
