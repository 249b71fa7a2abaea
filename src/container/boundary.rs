//! Epoch boundary
//!
//! The boundary is the epoch below which every write of the container is known
//! to be committed:
//!
//! 1. pools older than `FORMAT_BOUNDARY` report 0
//! 2. with active transactions: lowest active epoch - 1
//! 3. otherwise, once reindexing is done: highest committed epoch + 1
//! 4. otherwise the durable `commit_epoch` of the descriptor

use crate::dtx::DtxState;
use crate::error::Result;
use crate::heap::Resolve;
use crate::pool::FORMAT_BOUNDARY;

use super::Container;

impl Container {
    pub fn get_boundary(&self) -> Result<u64> {
        if self.pool.version() < FORMAT_BOUNDARY {
            return Ok(0);
        }

        let mut dtx = self.dtx.lock();
        if !dtx.active.is_empty() {
            return Ok(dtx.lowest_act_eph.saturating_sub(1));
        }

        self.reindex_locked(&mut dtx, None)?;
        if dtx.highest_cmt_eph != 0 {
            return Ok(dtx.highest_cmt_eph + 1);
        }

        let df = self.df.read();
        let view = self.pool.heap.view();
        let epoch = view.resolve(*df)?.commit_epoch;
        Ok(epoch)
    }

    /// Raise the durable boundary to `epoch`; lower values are ignored
    pub fn update_boundary(&self, epoch: u64) -> Result<()> {
        if self.pool.version() < FORMAT_BOUNDARY {
            return Ok(());
        }

        let df = self.df.read();
        {
            let view = self.pool.heap.view();
            let current = view.resolve(*df)?.commit_epoch;
            if epoch <= current {
                tracing::trace!(
                    "container {} boundary {} not above {}, ignored",
                    self.id,
                    epoch,
                    current
                );
                return Ok(());
            }
        }

        let mut tx = self.pool.heap.begin()?;
        let cont = tx.get_mut(*df)?;
        // Re-check under the write lock; another writer may have moved it
        if epoch <= cont.commit_epoch {
            return Ok(());
        }
        cont.commit_epoch = epoch;
        tx.commit()?;

        tracing::debug!("container {} boundary raised to {}", self.id, epoch);
        Ok(())
    }

    /// Continue reindexing committed transactions, at most `limit` records
    pub fn reindex(&self, limit: Option<usize>) -> Result<usize> {
        let mut dtx = self.dtx.lock();
        self.reindex_locked(&mut dtx, limit)
    }

    /// True once every committed record present at open is indexed
    pub fn reindex_done(&self) -> bool {
        self.dtx.lock().reindex.is_done()
    }

    pub(crate) fn reindex_locked(&self, dtx: &mut DtxState, limit: Option<usize>) -> Result<usize> {
        if dtx.reindex.is_done() {
            return Ok(0);
        }

        let view = self.pool.heap.view();
        let stop = dtx.reindex_stop;
        let mut state = dtx.reindex;
        let mut fresh = 0u64;
        let fed = state.advance(&view, stop, limit, |record| {
            if dtx.index_committed(record) {
                fresh += 1;
            }
        })?;
        dtx.reindex = state;

        self.pool.telemetry.add_committed(fresh);
        if dtx.reindex.is_done() {
            tracing::debug!("container {} committed reindex complete", self.id);
        }
        Ok(fed)
    }
}
