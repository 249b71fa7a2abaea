//! GC worker thread

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use uuid::Uuid;

use crate::btree::BTree;
use crate::catalog::ContainerDf;
use crate::container::{ObjectClass, ObjectDf};
use crate::dtx::free_head_blob;
use crate::error::{CellarError, Result};
use crate::heap::{Offset, Resolve, Tx};
use crate::pool::{PoolDf, PoolShared};
use crate::space::SpaceInfo;

use super::{GcItem, GcKind, GcRequest};

pub(crate) struct GcWorker {
    handle: Option<JoinHandle<()>>,
}

impl GcWorker {
    pub(crate) fn spawn(shared: Arc<PoolShared>, requests: Receiver<GcRequest>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("cellar-gc".to_string())
            .spawn(move || run(shared, requests))?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// Wait for the thread to exit; send `Shutdown` first
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("GC worker panicked");
            }
        }
    }
}

fn run(shared: Arc<PoolShared>, requests: Receiver<GcRequest>) {
    tracing::debug!("GC worker started for pool {}", shared.id);

    for request in requests.iter() {
        match request {
            GcRequest::Kick(reply) => {
                let result = reclaim_all(&shared);
                if let Err(e) = &result {
                    tracing::error!("GC pass failed: {}", e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            GcRequest::Shutdown => break,
        }
    }

    tracing::debug!("GC worker stopped for pool {}", shared.id);
}

fn reclaim_all(shared: &PoolShared) -> Result<usize> {
    let mut total = 0;
    loop {
        let reclaimed = reclaim_batch(shared)?;
        if reclaimed == 0 {
            break;
        }
        total += reclaimed;
    }
    if total > 0 {
        tracing::debug!("GC reclaimed {} item(s)", total);
    }
    Ok(total)
}

/// One transaction's worth of reclamation
fn reclaim_batch(shared: &PoolShared) -> Result<usize> {
    let budget = shared.config.gc_batch;
    let mut tx = shared.heap.begin()?;
    let mut done = 0;
    let mut blocks = 0;

    while done < budget {
        match reclaim_pool_step(&mut tx, budget - done, &mut blocks)? {
            0 => break,
            n => done += n,
        }
    }

    let mut drained = Vec::new();
    if done < budget {
        done += drain_linked(shared, &mut tx, budget - done, &mut drained)?;
    }

    // Unlink while the heap is still held: a delete refilling one of these
    // bins commits after us and links the container again
    for id in &drained {
        shared.gc.unlink(*id);
    }
    if done == 0 {
        return Ok(0);
    }

    if blocks > 0 && shared.space.is_some() {
        let hdr: Offset<PoolDf> = tx.root();
        let pool = tx.get_mut(hdr)?;
        pool.used_blocks = pool.used_blocks.saturating_sub(blocks);
    }
    if let Err(e) = tx.commit() {
        for id in drained {
            shared.gc.link(id);
        }
        return Err(e);
    }

    if let Some(space) = &shared.space {
        space.release(blocks);
    }
    tracing::trace!("GC batch committed, {} item(s), {} block(s)", done, blocks);
    Ok(done)
}

/// Work on the last item of the pool bin; 0 when the bin is empty
fn reclaim_pool_step(tx: &mut Tx<'_>, budget: usize, blocks: &mut u64) -> Result<usize> {
    let hdr: Offset<PoolDf> = tx.root();
    let Some(item) = tx.resolve(hdr)?.gc_bin.last().copied() else {
        return Ok(0);
    };

    match item.kind {
        GcKind::Object => free_object(tx, item)?,
        GcKind::Container => {
            let cont = Offset::<ContainerDf>::from_raw(item.offset);
            let progress = reclaim_container_step(tx, cont, budget, blocks)?;
            if progress > 0 {
                return Ok(progress);
            }
            let id = tx.resolve(cont)?.id;
            tx.free(cont)?;
            tracing::debug!("container {} descriptor reclaimed", id);
        }
    }

    tx.get_mut(hdr)?.gc_bin.pop();
    Ok(1)
}

/// Reclaim part of what hangs off a destroyed descriptor; 0 once only the
/// descriptor itself is left. Blocks held by live objects add to `blocks`.
fn reclaim_container_step(
    tx: &mut Tx<'_>,
    cont: Offset<ContainerDf>,
    budget: usize,
    blocks: &mut u64,
) -> Result<usize> {
    let root = tx.resolve(cont)?.obj_root;
    if !root.is_null() {
        let tree = BTree::open(&*tx, root, ObjectClass::immediate())?;
        let mut drained = 0;
        while drained < budget {
            let Some((key, record)) = tree.next_after(&*tx, None)? else {
                break;
            };
            *blocks += SpaceInfo::blocks_for(tx.resolve(record)?.size);
            tree.delete(tx, &key)?;
            drained += 1;
        }
        if tree.is_empty(&*tx)? {
            tree.destroy(tx)?;
            tx.get_mut(cont)?.obj_root = Offset::NULL;
        }
        return Ok(drained.max(1));
    }

    if free_head_blob(tx, cont)? {
        return Ok(1);
    }

    drain_cont_bin(tx, cont, budget)
}

/// Free up to `budget` items from a container bin
fn drain_cont_bin(tx: &mut Tx<'_>, cont: Offset<ContainerDf>, budget: usize) -> Result<usize> {
    let mut freed = 0;
    while freed < budget {
        let Some(item) = tx.resolve(cont)?.gc_bin.last().copied() else {
            break;
        };
        free_object(tx, item)?;
        tx.get_mut(cont)?.gc_bin.pop();
        freed += 1;
    }
    Ok(freed)
}

/// Drain bins of open containers; ids whose bin emptied go to `drained`
fn drain_linked(
    shared: &PoolShared,
    tx: &mut Tx<'_>,
    budget: usize,
    drained: &mut Vec<Uuid>,
) -> Result<usize> {
    let linked = shared.gc.linked();
    if linked.is_empty() {
        return Ok(0);
    }

    let catalog = shared.catalog(&*tx)?;
    let mut freed = 0;
    for id in linked {
        if freed >= budget {
            break;
        }
        let cont = match catalog.lookup(&*tx, id) {
            Ok(cont) => cont,
            Err(CellarError::NotFound) => {
                drained.push(id);
                continue;
            }
            Err(e) => return Err(e),
        };

        freed += drain_cont_bin(tx, cont, budget - freed)?;
        if tx.resolve(cont)?.gc_bin.is_empty() {
            drained.push(id);
        }
    }
    Ok(freed)
}

fn free_object(tx: &mut Tx<'_>, item: GcItem) -> Result<()> {
    if item.kind != GcKind::Object {
        return Err(CellarError::StorageFault(format!(
            "unexpected {:?} item in object bin",
            item.kind
        )));
    }
    tx.free(Offset::<ObjectDf>::from_raw(item.offset))
}
