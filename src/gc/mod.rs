//! GC Module
//!
//! Background reclamation of destroyed containers and deleted objects.
//!
//! ## Responsibilities
//! - Durable GC bins: one in the pool header, one per container descriptor
//! - `enqueue`: queue an item inside the caller's transaction
//! - GC link: containers whose bin holds items; only the worker unlinks, once
//!   it finds the bin empty or the container gone
//! - A worker thread draining bins in batches, one transaction per batch
//!
//! ```text
//!   catalog delete ──► PoolDf.gc_bin ──┐
//!                                      ├──► worker ──► tx.free(...)
//!   object delete ──► ContainerDf.gc_bin (linked) ──┘
//! ```
//!
//! Because bins are durable, a crash between the catalog delete and the end
//! of reclamation only delays it: the worker resumes when the pool reopens.

mod worker;

use std::collections::BTreeSet;

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ContainerDf;
use crate::container::ObjectDf;
use crate::error::{CellarError, Result};
use crate::heap::{Offset, Tx};
use crate::pool::PoolDf;

pub(crate) use worker::GcWorker;

/// What a queued offset points at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcKind {
    /// A container descriptor and everything hanging off it
    #[default]
    Container,

    /// A single object record
    Object,
}

/// One pending reclamation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcItem {
    pub kind: GcKind,
    pub offset: u64,
}

impl GcItem {
    pub fn container(offset: Offset<ContainerDf>) -> Self {
        Self {
            kind: GcKind::Container,
            offset: offset.raw(),
        }
    }

    pub fn object(offset: Offset<ObjectDf>) -> Self {
        Self {
            kind: GcKind::Object,
            offset: offset.raw(),
        }
    }
}

pub(crate) enum GcRequest {
    /// Reclaim until every bin is empty, then report
    Kick(Option<Sender<Result<usize>>>),
    Shutdown,
}

/// GC front end owned by the pool
pub struct Gc {
    linked: Mutex<BTreeSet<Uuid>>,
    requests: Sender<GcRequest>,
}

impl Gc {
    pub(crate) fn new(requests: Sender<GcRequest>) -> Self {
        Self {
            linked: Mutex::new(BTreeSet::new()),
            requests,
        }
    }

    /// Queue `item` in the pool bin
    pub fn enqueue(tx: &mut Tx<'_>, item: GcItem) -> Result<()> {
        let hdr: Offset<PoolDf> = tx.root();
        tx.get_mut(hdr)?.gc_bin.push(item);
        Ok(())
    }

    /// Queue `item` in the bin of container `cont`
    pub fn enqueue_cont(tx: &mut Tx<'_>, cont: Offset<ContainerDf>, item: GcItem) -> Result<()> {
        tx.get_mut(cont)?.gc_bin.push(item);
        Ok(())
    }

    /// Per-container hook run when a descriptor is allocated
    pub fn init_cont(df: &mut ContainerDf) {
        df.gc_bin.clear();
    }

    // =========================================================================
    // GC Link
    // =========================================================================

    pub fn link(&self, id: Uuid) {
        if self.linked.lock().insert(id) {
            tracing::trace!("container {} linked to GC", id);
        }
    }

    pub fn unlink(&self, id: Uuid) -> bool {
        self.linked.lock().remove(&id)
    }

    pub fn is_linked(&self, id: Uuid) -> bool {
        self.linked.lock().contains(&id)
    }

    pub(crate) fn linked(&self) -> Vec<Uuid> {
        self.linked.lock().iter().copied().collect()
    }

    // =========================================================================
    // Worker Control
    // =========================================================================

    /// Wake the worker without waiting
    pub fn kick(&self) {
        if self.requests.send(GcRequest::Kick(None)).is_err() {
            tracing::debug!("GC kick ignored, worker stopped");
        }
    }

    /// Block until every bin is empty; returns the number of items reclaimed
    pub fn wait_all(&self) -> Result<usize> {
        let (reply, done) = channel::bounded(1);
        self.requests
            .send(GcRequest::Kick(Some(reply)))
            .map_err(|_| CellarError::StorageFault("GC worker stopped".to_string()))?;
        done.recv()
            .map_err(|_| CellarError::StorageFault("GC worker stopped".to_string()))?
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.requests.send(GcRequest::Shutdown);
    }
}
