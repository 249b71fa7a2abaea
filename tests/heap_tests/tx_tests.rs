//! Tests for heap transactions
//!
//! These tests verify:
//! - Committed changes are visible through views
//! - Dropped or aborted transactions restore the heap exactly
//! - Capacity accounting and `NoSpace`, owned payloads included
//! - One-shot fail points

use cellar::catalog::ContainerDf;
use cellar::config::{Config, WalSyncStrategy};
use cellar::container::ObjectDf;
use cellar::gc::GcItem;
use cellar::heap::{Durable, Heap, Offset, Resolve};
use cellar::{CellarError, FailPoint};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_heap(capacity: u64) -> (TempDir, Heap) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .heap_capacity(capacity)
        .wal_sync_strategy(WalSyncStrategy::EveryWrite)
        .build();
    let heap = Heap::open(temp_dir.path(), &config).unwrap();
    (temp_dir, heap)
}

fn object(oid: u64) -> ObjectDf {
    ObjectDf {
        oid,
        size: oid * 10,
        epoch: 1,
        addr: 0,
    }
}

// =============================================================================
// Commit Tests
// =============================================================================

#[test]
fn test_commit_makes_objects_visible() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    let mut tx = heap.begin().unwrap();
    let offset = tx.alloc(object(7)).unwrap();
    tx.set_root(offset);
    tx.commit().unwrap();

    let view = heap.view();
    assert_eq!(view.root::<ObjectDf>(), offset);
    assert_eq!(view.resolve(offset).unwrap().oid, 7);
}

#[test]
fn test_get_mut_then_commit() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    let mut tx = heap.begin().unwrap();
    let offset = tx.alloc(object(1)).unwrap();
    tx.commit().unwrap();

    let mut tx = heap.begin().unwrap();
    tx.get_mut(offset).unwrap().size = 4096;
    assert_eq!(tx.resolve(offset).unwrap().size, 4096);
    tx.commit().unwrap();

    assert_eq!(heap.view().resolve(offset).unwrap().size, 4096);
}

#[test]
fn test_free_then_resolve_is_fault() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    let mut tx = heap.begin().unwrap();
    let offset = tx.alloc(object(1)).unwrap();
    tx.commit().unwrap();

    let mut tx = heap.begin().unwrap();
    tx.free(offset).unwrap();
    assert!(matches!(tx.free(offset), Err(CellarError::StorageFault(_))));
    tx.commit().unwrap();

    assert!(matches!(
        heap.view().resolve(offset),
        Err(CellarError::StorageFault(_))
    ));
    assert_eq!(heap.stats().objects, 0);
}

#[test]
fn test_null_offset_is_fault() {
    let (_temp, heap) = setup_temp_heap(1 << 20);
    let view = heap.view();
    let result = view.resolve(Offset::<ObjectDf>::NULL);
    assert!(matches!(result, Err(CellarError::StorageFault(_))));
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_drop_rolls_back_everything() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    let mut tx = heap.begin().unwrap();
    let kept = tx.alloc(object(1)).unwrap();
    tx.commit().unwrap();
    let before = heap.stats();

    {
        let mut tx = heap.begin().unwrap();
        tx.get_mut(kept).unwrap().epoch = 99;
        let extra = tx.alloc(object(2)).unwrap();
        tx.set_root(extra);
        tx.free(kept).unwrap();
    }

    let after = heap.stats();
    assert_eq!(before, after);
    let view = heap.view();
    assert_eq!(view.resolve(kept).unwrap().epoch, 1);
    assert!(view.root::<ObjectDf>().is_null());
}

#[test]
fn test_abort_reuses_allocation_cursor() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    let mut tx = heap.begin().unwrap();
    let first = tx.alloc(object(1)).unwrap();
    tx.abort();

    let mut tx = heap.begin().unwrap();
    let second = tx.alloc(object(2)).unwrap();
    tx.commit().unwrap();

    assert_eq!(first, second);
}

// =============================================================================
// Capacity Tests
// =============================================================================

#[test]
fn test_no_space_when_capacity_exhausted() {
    let footprint = std::mem::size_of::<ObjectDf>() as u64;
    let (_temp, heap) = setup_temp_heap(footprint * 3);

    let mut tx = heap.begin().unwrap();
    for oid in 0..3 {
        tx.alloc(object(oid)).unwrap();
    }
    let result = tx.alloc(object(3));
    assert!(matches!(
        result,
        Err(CellarError::NoSpace { available: 0, .. })
    ));
    tx.commit().unwrap();

    let stats = heap.stats();
    assert_eq!(stats.objects, 3);
    assert_eq!(stats.used_bytes, stats.capacity);
}

#[test]
fn test_free_returns_capacity() {
    let footprint = std::mem::size_of::<ObjectDf>() as u64;
    let (_temp, heap) = setup_temp_heap(footprint);

    let mut tx = heap.begin().unwrap();
    let offset = tx.alloc(object(1)).unwrap();
    tx.commit().unwrap();

    let mut tx = heap.begin().unwrap();
    tx.free(offset).unwrap();
    tx.alloc(object(2)).unwrap();
    tx.commit().unwrap();

    assert_eq!(heap.stats().objects, 1);
}

#[test]
fn test_growing_bin_is_charged() {
    let fixed = ContainerDf::FOOTPRINT;
    let item = std::mem::size_of::<GcItem>() as u64;
    let (_temp, heap) = setup_temp_heap(fixed + 4 * item);

    let mut tx = heap.begin().unwrap();
    let cont = tx.zalloc::<ContainerDf>().unwrap();
    tx.commit().unwrap();
    assert_eq!(heap.stats().used_bytes, fixed);

    let mut tx = heap.begin().unwrap();
    for raw in 1..=4 {
        tx.get_mut(cont)
            .unwrap()
            .gc_bin
            .push(GcItem::object(Offset::from_raw(raw * 64)));
    }
    tx.commit().unwrap();
    assert_eq!(heap.stats().used_bytes, fixed + 4 * item);

    // One more item no longer fits; the commit rolls everything back
    let before = heap.stats();
    let mut tx = heap.begin().unwrap();
    tx.get_mut(cont)
        .unwrap()
        .gc_bin
        .push(GcItem::object(Offset::from_raw(5 * 64)));
    assert!(matches!(tx.commit(), Err(CellarError::NoSpace { .. })));
    assert_eq!(heap.stats(), before);
    assert_eq!(heap.view().resolve(cont).unwrap().gc_bin.len(), 4);

    // Shrinking always commits and returns the bytes
    let mut tx = heap.begin().unwrap();
    tx.get_mut(cont).unwrap().gc_bin.clear();
    tx.commit().unwrap();
    assert_eq!(heap.stats().used_bytes, fixed);
}

// =============================================================================
// Fail Point Tests
// =============================================================================

#[test]
fn test_fail_begin_is_one_shot() {
    let (_temp, heap) = setup_temp_heap(1 << 20);
    heap.inject_fault(FailPoint::TxBegin);

    assert!(matches!(heap.begin(), Err(CellarError::StorageFault(_))));
    assert!(heap.begin().is_ok());
}

#[test]
fn test_fail_commit_rolls_back() {
    let (_temp, heap) = setup_temp_heap(1 << 20);
    heap.inject_fault(FailPoint::TxCommit);

    let mut tx = heap.begin().unwrap();
    tx.alloc(object(1)).unwrap();
    assert!(tx.commit().is_err());

    let stats = heap.stats();
    assert_eq!(stats.objects, 0);
    assert_eq!(stats.used_bytes, 0);
    assert_eq!(stats.next_lsn, 1);
}

#[test]
fn test_fail_alloc_reports_no_space() {
    let (_temp, heap) = setup_temp_heap(1 << 20);
    heap.inject_fault(FailPoint::Alloc);

    let mut tx = heap.begin().unwrap();
    assert!(matches!(
        tx.alloc(object(1)),
        Err(CellarError::NoSpace { .. })
    ));
    assert!(tx.alloc(object(1)).is_ok());
}

#[test]
fn test_empty_commit_writes_nothing() {
    let (_temp, heap) = setup_temp_heap(1 << 20);

    heap.begin().unwrap().commit().unwrap();
    assert_eq!(heap.stats().next_lsn, 1);
}
