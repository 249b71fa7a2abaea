//! Tests for in-place format upgrades
//!
//! These tests verify:
//! - A pool upgrade rewrites every descriptor and stamps the pool header
//! - Objects, committed DTXs and pending GC items move to the new descriptor
//! - Upgrades are idempotent and refused below the upgrade floor
//! - The replaced descriptor is reclaimed

use std::path::Path;

use cellar::pool::{CURRENT_FORMAT, FORMAT_V1, FORMAT_V2};
use cellar::{CellarError, Config, DtxId, DtxStatus, Pool};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path, format: u32) -> Config {
    Config::builder()
        .data_dir(dir)
        .format_version(format)
        .obj_tree_order(4)
        .build()
}

fn setup_pool(format: u32, containers: usize) -> (TempDir, Pool, Vec<Uuid>) {
    let temp_dir = TempDir::new().unwrap();
    let pool = Pool::open(config(temp_dir.path(), format)).unwrap();

    let ids: Vec<Uuid> = (0..containers).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        pool.create_container(*id).unwrap();
        let cont = pool.open_container(*id).unwrap();
        for oid in 0..10 {
            cont.insert_object(oid, 100, i as u64 + 1).unwrap();
        }
        let xid = DtxId::new(*id, 1);
        cont.dtx_begin(xid, 42).unwrap();
        cont.dtx_commit(xid).unwrap();
        cont.close();
    }
    (temp_dir, pool, ids)
}

// =============================================================================
// Pool Upgrade Tests
// =============================================================================

#[test]
fn test_pool_upgrade_rewrites_descriptors() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V2, 3);

    pool.upgrade().unwrap();
    assert_eq!(pool.version(), CURRENT_FORMAT);

    for id in &ids {
        let cont = pool.open_container(*id).unwrap();
        let df = cont.descriptor_df().unwrap();
        assert_eq!(df.format, CURRENT_FORMAT);
        assert_eq!(df.commit_epoch, 0);
        assert_eq!(df.nobjs, 10);
        assert_eq!(cont.fetch_object(7).unwrap().unwrap().size, 100);
        assert_eq!(
            cont.dtx_lookup(DtxId::new(*id, 1)).unwrap(),
            DtxStatus::Committed { epoch: 42 }
        );
        cont.close();
    }
}

#[test]
fn test_upgrade_enables_boundary() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V2, 1);
    let cont = pool.open_container(ids[0]).unwrap();
    cont.update_boundary(9).unwrap();
    assert_eq!(cont.get_boundary().unwrap(), 0);
    cont.close();

    pool.upgrade().unwrap();

    let cont = pool.open_container(ids[0]).unwrap();
    assert_eq!(cont.get_boundary().unwrap(), 43);
    cont.close();
}

#[test]
fn test_pool_upgrade_idempotent() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V2, 2);

    pool.upgrade().unwrap();
    let lsn = pool.heap_stats().next_lsn;
    let cont = pool.open_container(ids[0]).unwrap();
    let descriptor = cont.descriptor();
    cont.close();

    pool.upgrade().unwrap();
    assert_eq!(pool.heap_stats().next_lsn, lsn);
    let cont = pool.open_container(ids[0]).unwrap();
    assert_eq!(cont.descriptor(), descriptor);
    cont.close();
}

#[test]
fn test_upgrade_survives_reopen() {
    let (temp, pool, ids) = setup_pool(FORMAT_V2, 2);
    pool.upgrade().unwrap();
    drop(pool);

    let pool = Pool::open(config(temp.path(), FORMAT_V2)).unwrap();
    assert_eq!(pool.version(), CURRENT_FORMAT);
    let cont = pool.open_container(ids[1]).unwrap();
    assert_eq!(cont.descriptor_df().unwrap().format, CURRENT_FORMAT);
    assert_eq!(cont.query().unwrap().nobjs, 10);
    cont.close();
}

#[test]
fn test_v1_pool_refuses_upgrade() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V1, 1);

    assert!(matches!(pool.upgrade(), Err(CellarError::PermissionDenied(_))));
    assert_eq!(pool.version(), FORMAT_V1);

    let cont = pool.open_container(ids[0]).unwrap();
    assert!(matches!(
        pool.upgrade_container(ids[0]),
        Err(CellarError::PermissionDenied(_))
    ));
    assert_eq!(cont.descriptor_df().unwrap().format, FORMAT_V1);
    cont.close();
}

#[test]
fn test_current_pool_upgrade_is_noop() {
    let (_temp, pool, ids) = setup_pool(CURRENT_FORMAT, 1);
    let lsn = pool.heap_stats().next_lsn;

    pool.upgrade().unwrap();
    let cont = pool.open_container(ids[0]).unwrap();
    pool.upgrade_container(ids[0]).unwrap();
    cont.close();

    assert_eq!(pool.heap_stats().next_lsn, lsn);
}

// =============================================================================
// Single Container Upgrade Tests
// =============================================================================

#[test]
fn test_upgrade_unopened_container_is_noop() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V2, 1);

    pool.upgrade_container(ids[0]).unwrap();

    let cont = pool.open_container(ids[0]).unwrap();
    assert_eq!(cont.descriptor_df().unwrap().format, FORMAT_V2);
    cont.close();
}

#[test]
fn test_open_container_upgrade_moves_state() {
    let (_temp, pool, ids) = setup_pool(FORMAT_V2, 1);
    pool.gc_wait().unwrap();
    let objects_before = pool.heap_stats().objects;

    let cont = pool.open_container(ids[0]).unwrap();
    let old = cont.descriptor();
    pool.upgrade_container(ids[0]).unwrap();
    assert_ne!(cont.descriptor(), old);

    // Second call finds the descriptor already current
    let lsn = pool.heap_stats().next_lsn;
    pool.upgrade_container(ids[0]).unwrap();
    assert_eq!(pool.heap_stats().next_lsn, lsn);

    // Old descriptor reclaimed, the moved tree root replaced one for one
    pool.gc_wait().unwrap();
    assert_eq!(pool.heap_stats().objects, objects_before);
    assert_eq!(pool.stats().unwrap().gc_pending, 0);

    // The handle keeps working against the new descriptor
    cont.insert_object(100, 50, 7).unwrap();
    cont.delete_object(0).unwrap();
    assert_eq!(cont.query().unwrap().nobjs, 10);
    assert_eq!(cont.fetch_object(100).unwrap().unwrap().epoch, 7);
    assert!(cont.fetch_object(0).unwrap().is_none());

    pool.gc_wait().unwrap();
    let df = cont.descriptor_df().unwrap();
    assert!(df.gc_bin.is_empty());
    assert_eq!(df.dtx_committed_count, 1);
    assert_eq!(
        cont.dtx_lookup(DtxId::new(ids[0], 1)).unwrap(),
        DtxStatus::Committed { epoch: 42 }
    );
    cont.close();
}
