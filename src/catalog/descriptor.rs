//! Container descriptor

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::btree::TreeRootDf;
use crate::dtx::DtxCmtBlobDf;
use crate::gc::GcItem;
use crate::heap::Offset;
use crate::pool::CURRENT_FORMAT;
use crate::space::{HintDf, IO_CLASS_COUNT};

/// Durable per-container record, one per catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerDf {
    /// Catalog key
    pub id: Uuid,

    /// Format version the descriptor was written under
    pub format: u32,

    /// Object tree; null once ownership moved to an upgraded descriptor
    pub obj_root: Offset<TreeRootDf>,

    // -------------------------------------------------------------------------
    // Usage
    // -------------------------------------------------------------------------
    pub nobjs: u64,
    pub used: u64,

    /// Highest epoch written
    pub hae: u64,

    // -------------------------------------------------------------------------
    // Committed DTX list
    // -------------------------------------------------------------------------
    /// Null head means the list is empty
    pub dtx_committed_head: Offset<DtxCmtBlobDf>,
    pub dtx_committed_tail: Offset<DtxCmtBlobDf>,
    pub dtx_committed_count: u64,

    /// Allocation hint per I/O class
    pub hints: [HintDf; IO_CLASS_COUNT],

    /// Items waiting for reclamation
    pub gc_bin: Vec<GcItem>,

    /// Timestamp cache anchor
    pub ts_idx: u32,

    /// Durable epoch boundary; only meaningful from format 3 on
    pub commit_epoch: u64,
}

impl ContainerDf {
    /// Field copy carrying the usage, the object tree and the committed list
    /// into the current format; fields the old format lacked start at zero
    pub fn upgraded(&self) -> Self {
        Self {
            format: CURRENT_FORMAT,
            commit_epoch: 0,
            ..self.clone()
        }
    }

    /// Detach everything an upgraded copy took over
    pub(crate) fn release_ownership(&mut self) {
        self.obj_root = Offset::NULL;
        self.dtx_committed_head = Offset::NULL;
        self.dtx_committed_tail = Offset::NULL;
        self.dtx_committed_count = 0;
        self.gc_bin.clear();
    }
}
