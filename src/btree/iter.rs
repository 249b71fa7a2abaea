//! Restartable tree iteration

use crate::error::Result;
use crate::heap::{Offset, Resolve};

use super::{BTree, RecordClass};

/// Iteration position; a zero anchor starts from the first key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Anchor {
    last: Option<Vec<u8>>,
}

impl Anchor {
    /// Anchor positioned before the first key
    pub fn zero() -> Self {
        Self::default()
    }

    /// Anchor positioned just after `key`
    pub fn after(key: impl Into<Vec<u8>>) -> Self {
        Self {
            last: Some(key.into()),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.last.is_none()
    }

    /// Last key returned through this anchor
    pub fn key(&self) -> Option<&[u8]> {
        self.last.as_deref()
    }
}

/// Lazy in-order iterator; each step searches again from the anchor, so the tree may
/// be modified between iterations that share an anchor
pub struct TreeIter<'t, C: RecordClass, V: Resolve> {
    tree: &'t BTree<C>,
    view: &'t V,
    anchor: Anchor,
    done: bool,
}

impl<'t, C: RecordClass, V: Resolve> TreeIter<'t, C, V> {
    pub(super) fn new(tree: &'t BTree<C>, view: &'t V, anchor: Anchor) -> Self {
        Self {
            tree,
            view,
            anchor,
            done: false,
        }
    }

    /// Position to resume from
    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    pub fn into_anchor(self) -> Anchor {
        self.anchor
    }
}

impl<C: RecordClass, V: Resolve> Iterator for TreeIter<'_, C, V> {
    type Item = Result<(Vec<u8>, Offset<C::Record>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.tree.next_after(self.view, self.anchor.key()) {
            Ok(Some((key, record))) => {
                self.anchor = Anchor::after(key.clone());
                Some(Ok((key, record)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
