//! Durable committed-transaction list
//!
//! ```text
//!   ContainerDf.dtx_committed_head                 ContainerDf.dtx_committed_tail
//!        │                                                    │
//!        ▼                                                    ▼
//!   ┌──────────┐ next ┌──────────┐ next          ┌──────────┐
//!   │ blob     │─────►│ blob     │──────► ... ──►│ blob     │──► null
//!   │ records  │      │ records  │               │ records  │
//!   └──────────┘      └──────────┘               └──────────┘
//! ```
//!
//! Records are appended at the tail inside the committing transaction. On open
//! the list is replayed into the in-memory committed index, possibly in several
//! bounded steps.

use serde::{Deserialize, Serialize};

use crate::catalog::ContainerDf;
use crate::error::Result;
use crate::heap::{Offset, Resolve, Tx};

use super::DtxId;

/// One committed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtxCmtRecord {
    pub xid: DtxId,
    pub epoch: u64,
}

/// Blob of committed records, linked from the container descriptor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DtxCmtBlobDf {
    pub next: Offset<DtxCmtBlobDf>,
    pub records: Vec<DtxCmtRecord>,
}

/// Append `record` to the committed list of `cont`
pub fn append_committed(
    tx: &mut Tx<'_>,
    cont: Offset<ContainerDf>,
    record: DtxCmtRecord,
    blob_capacity: usize,
) -> Result<()> {
    let tail = tx.resolve(cont)?.dtx_committed_tail;

    let tail_full = tail.is_null() || tx.resolve(tail)?.records.len() >= blob_capacity;
    let target = if tail_full {
        let blob = tx.alloc(DtxCmtBlobDf {
            next: Offset::NULL,
            records: Vec::with_capacity(blob_capacity),
        })?;
        if tail.is_null() {
            tx.get_mut(cont)?.dtx_committed_head = blob;
        } else {
            tx.get_mut(tail)?.next = blob;
        }
        tx.get_mut(cont)?.dtx_committed_tail = blob;
        blob
    } else {
        tail
    };

    tx.get_mut(target)?.records.push(record);
    tx.get_mut(cont)?.dtx_committed_count += 1;
    Ok(())
}

/// Replay progress through the committed list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexState {
    /// Next record to index is `records[pos]` of `blob`
    Pending {
        blob: Offset<DtxCmtBlobDf>,
        pos: usize,
    },
    /// Every record present at open is indexed
    Done,
}

/// End of the list as it was when the container was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexStop {
    pub blob: Offset<DtxCmtBlobDf>,
    pub len: usize,
}

impl ReindexState {
    /// Starting state and stop position for the list hanging off `cont`
    pub fn start(view: &impl Resolve, cont: &ContainerDf) -> Result<(Self, Option<ReindexStop>)> {
        if cont.dtx_committed_head.is_null() {
            return Ok((ReindexState::Done, None));
        }

        let tail = cont.dtx_committed_tail;
        let stop = ReindexStop {
            blob: tail,
            len: view.resolve(tail)?.records.len(),
        };
        let state = ReindexState::Pending {
            blob: cont.dtx_committed_head,
            pos: 0,
        };
        Ok((state, Some(stop)))
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ReindexState::Done)
    }

    /// Feed up to `limit` records to `index`; returns how many were fed
    ///
    /// Each step replaces the whole state, so the cursor and the done flag can
    /// never disagree.
    pub fn advance(
        &mut self,
        view: &impl Resolve,
        stop: Option<ReindexStop>,
        limit: Option<usize>,
        mut index: impl FnMut(&DtxCmtRecord),
    ) -> Result<usize> {
        let mut fed = 0;
        let mut budget = limit.unwrap_or(usize::MAX);

        while let ReindexState::Pending { blob, pos } = *self {
            let Some(stop) = stop else {
                *self = ReindexState::Done;
                break;
            };
            if budget == 0 {
                break;
            }

            let df = view.resolve(blob)?;
            let end = if blob == stop.blob {
                stop.len.min(df.records.len())
            } else {
                df.records.len()
            };

            let take = (end.saturating_sub(pos)).min(budget);
            for record in &df.records[pos..pos + take] {
                index(record);
            }
            fed += take;
            budget -= take;

            let pos = pos + take;
            *self = if pos < end {
                ReindexState::Pending { blob, pos }
            } else if blob == stop.blob || df.next.is_null() {
                ReindexState::Done
            } else {
                ReindexState::Pending {
                    blob: df.next,
                    pos: 0,
                }
            };
        }

        Ok(fed)
    }
}

/// Free one blob from the head of the list; returns false once empty
pub(crate) fn free_head_blob(tx: &mut Tx<'_>, cont: Offset<ContainerDf>) -> Result<bool> {
    let head = tx.resolve(cont)?.dtx_committed_head;
    if head.is_null() {
        return Ok(false);
    }

    let blob = tx.resolve(head)?;
    let next = blob.next;
    let freed = blob.records.len() as u64;
    tx.free(head)?;

    let df = tx.get_mut(cont)?;
    df.dtx_committed_head = next;
    if next.is_null() {
        df.dtx_committed_tail = Offset::NULL;
    }
    df.dtx_committed_count = df.dtx_committed_count.saturating_sub(freed);
    Ok(true)
}
