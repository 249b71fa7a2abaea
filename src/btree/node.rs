//! Durable tree layout

use serde::{Deserialize, Serialize};

use crate::heap::Offset;

/// Tree anchor, referenced from the owning structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeRootDf {
    /// `RecordClass::TAG` of the class that created the tree
    pub class_tag: u32,

    /// Max keys per node before a split
    pub order: u16,

    /// 0 while the root node is a leaf
    pub depth: u16,

    /// Number of records
    pub count: u64,

    pub node: Offset<TreeNodeDf>,
}

/// One B+tree node
///
/// Leaves: `slots[i]` is the record offset for `keys[i]`.
/// Internal nodes: `slots.len() == keys.len() + 1`, `keys[i]` is the smallest
/// key reachable through `slots[i + 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeNodeDf {
    pub leaf: bool,
    pub keys: Vec<Vec<u8>>,
    pub slots: Vec<u64>,
}

impl TreeNodeDf {
    pub(crate) fn empty_leaf() -> Self {
        Self {
            leaf: true,
            keys: Vec::new(),
            slots: Vec::new(),
        }
    }

    /// Child to descend into for `key`
    pub(crate) fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }
}
