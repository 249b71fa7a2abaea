//! Container lifecycle
//!
//! ```text
//!   Absent ──create──► Cataloged ──open──► Open(1) ──open──► Open(n)
//!     ▲                  │    ▲                │
//!     └─────destroy──────┘    └─────close──────┘ (at n = 0)
//! ```
//!
//! Every durable step runs in one heap transaction; a failure anywhere leaves
//! the catalog as it was.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{CellarError, Result};
use crate::heap::{Offset, Resolve};
use crate::pool::{PoolDf, PoolShared, CURRENT_FORMAT, FORMAT_UPGRADE_FLOOR};

use super::{Container, ContainerHandle, HandleCache};

/// Catalog a fresh, empty container
pub(crate) fn create(shared: &PoolShared, cache: &HandleCache, id: Uuid) -> Result<()> {
    let _key = cache.lock_key((shared.id, id));

    let mut tx = shared.heap.begin()?;
    let catalog = shared.catalog(&tx)?;
    catalog.create(&mut tx, id, None)?;
    tx.commit()
}

/// Open `id`, building the in-memory object on a cache miss
pub(crate) fn open(
    shared: &Arc<PoolShared>,
    cache: &Arc<HandleCache>,
    id: Uuid,
) -> Result<ContainerHandle> {
    let key = (shared.id, id);
    let _key = cache.lock_key(key);

    if let Some(cont) = cache.lookup(&key) {
        cont.add_open();
        return Ok(ContainerHandle::new(cont));
    }

    let cont = Container::load(shared, Arc::downgrade(cache), id)?;
    cache.insert(key, &cont);
    Ok(ContainerHandle::new(cont))
}

/// Remove `id` from the catalog and block until it is reclaimed
pub(crate) fn destroy(shared: &PoolShared, cache: &HandleCache, id: Uuid) -> Result<()> {
    let key = (shared.id, id);
    {
        let _key = cache.lock_key(key);

        if let Some(cont) = cache.lookup(&key) {
            let open_count = cont.open_count();
            if open_count > 0 {
                return Err(CellarError::Busy { open_count });
            }
            // Only extra references remain; they lose the cache entry
            cache.remove(&key);
        }

        {
            let view = shared.heap.view();
            shared.catalog(&view)?.lookup(&view, id)?;
        }

        // Persist everything logged so far before the catalog delete
        shared.heap.sync_wal()?;

        let mut tx = shared.heap.begin()?;
        let catalog = shared.catalog(&tx)?;
        catalog.delete(&mut tx, id)?;
        catalog.commit(tx)?;

        shared.obj_cache.evict_container(id);
    }

    let reclaimed = shared.gc.wait_all()?;
    tracing::debug!("container {} reclaimed ({} GC item(s))", id, reclaimed);
    Ok(())
}

/// Rewrite the descriptor of an open container in the current format
pub(crate) fn upgrade_container(shared: &PoolShared, cache: &HandleCache, id: Uuid) -> Result<()> {
    let key = (shared.id, id);
    let _key = cache.lock_key(key);

    let Some(cont) = cache.lookup(&key) else {
        tracing::debug!("container {} not open, nothing to upgrade", id);
        return Ok(());
    };

    let version = shared.version();
    if version >= CURRENT_FORMAT {
        return Ok(());
    }
    if version < FORMAT_UPGRADE_FLOOR {
        return Err(CellarError::PermissionDenied(format!(
            "pool format v{} cannot be upgraded (minimum v{})",
            version, FORMAT_UPGRADE_FLOOR
        )));
    }

    let mut df_slot = cont.df.write();
    let mut objects = cont.objects.lock();

    let mut tx = shared.heap.begin()?;
    let old_off = *df_slot;
    let old = tx.resolve(old_off)?.clone();
    if old.format >= CURRENT_FORMAT {
        tracing::debug!("container {} already at format v{}", id, old.format);
        return Ok(());
    }

    let upgraded = old.upgraded();
    tx.get_mut(old_off)?.release_ownership();

    let catalog = shared.catalog(&tx)?;
    catalog.delete(&mut tx, id)?;
    let new_off = catalog.create(&mut tx, id, Some(upgraded))?;
    let new_root = tx.resolve(new_off)?.obj_root;
    catalog.commit(tx)?;

    *df_slot = new_off;
    objects.reset_root(new_root);
    objects.class_mut().rebind(new_off);

    tracing::info!(
        "container {} upgraded v{} -> v{} ({:?} -> {:?})",
        id,
        old.format,
        CURRENT_FORMAT,
        old_off,
        new_off
    );
    Ok(())
}

/// Upgrade every container, then the pool header
pub(crate) fn upgrade_pool(shared: &Arc<PoolShared>, cache: &Arc<HandleCache>) -> Result<()> {
    let version = shared.version();
    if version >= CURRENT_FORMAT {
        tracing::debug!("pool {} already at format v{}", shared.id, version);
        return Ok(());
    }
    if version < FORMAT_UPGRADE_FLOOR {
        return Err(CellarError::PermissionDenied(format!(
            "pool format v{} cannot be upgraded (minimum v{})",
            version, FORMAT_UPGRADE_FLOOR
        )));
    }

    let ids: Vec<Uuid> = {
        let view = shared.heap.view();
        let catalog = shared.catalog(&view)?;
        let ids: Result<Vec<Uuid>> = catalog
            .iter(&view, Default::default())
            .map(|item| item.map(|(id, _)| id))
            .collect();
        ids?
    };

    for id in &ids {
        let handle = open(shared, cache, *id)?;
        upgrade_container(shared, cache, *id)?;
        handle.close();
    }

    let mut tx = shared.heap.begin()?;
    let hdr: Offset<PoolDf> = tx.root();
    tx.get_mut(hdr)?.version = CURRENT_FORMAT;
    tx.commit()?;
    shared.version.store(CURRENT_FORMAT, Ordering::Release);

    tracing::info!(
        "pool {} upgraded v{} -> v{} ({} container(s))",
        shared.id,
        version,
        CURRENT_FORMAT,
        ids.len()
    );
    Ok(())
}
