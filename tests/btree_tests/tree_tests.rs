//! Tests for the durable B+tree
//!
//! These tests verify:
//! - Insert, lookup and overwrite through the record class
//! - Node splits grow the depth and keep every key reachable
//! - Delete frees records and collapses emptied nodes
//! - Drain and destroy leave nothing behind in the heap

use cellar::btree::{BTree, TreeRootDf};
use cellar::config::Config;
use cellar::container::{object_key, ObjectClass, ObjectInput};
use cellar::heap::{Heap, Resolve};
use cellar::CellarError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_heap() -> (TempDir, Heap) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let heap = Heap::open(temp_dir.path(), &config).unwrap();
    (temp_dir, heap)
}

fn input(size: u64) -> ObjectInput {
    ObjectInput {
        size,
        epoch: 1,
        addr: 0,
    }
}

fn create_tree(heap: &Heap, order: u16) -> BTree<ObjectClass> {
    let mut tx = heap.begin().unwrap();
    let tree = BTree::create(&mut tx, order, ObjectClass::immediate()).unwrap();
    tx.commit().unwrap();
    tree
}

fn insert_all(heap: &Heap, tree: &BTree<ObjectClass>, oids: impl IntoIterator<Item = u64>) {
    let mut tx = heap.begin().unwrap();
    for oid in oids {
        tree.insert(&mut tx, &object_key(oid), &input(oid)).unwrap();
    }
    tx.commit().unwrap();
}

// =============================================================================
// Create / Open Tests
// =============================================================================

#[test]
fn test_order_below_three_rejected() {
    let (_temp, heap) = setup_temp_heap();
    let mut tx = heap.begin().unwrap();

    let result = BTree::create(&mut tx, 2, ObjectClass::immediate());
    assert!(matches!(result, Err(CellarError::InvalidArgument(_))));
}

#[test]
fn test_open_checks_class_tag() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);

    let mut tx = heap.begin().unwrap();
    tx.get_mut(tree.root()).unwrap().class_tag = 0xdead_beef;
    tx.commit().unwrap();

    let result = BTree::open(&heap.view(), tree.root(), ObjectClass::immediate());
    assert!(matches!(result, Err(CellarError::StorageFault(_))));
}

#[test]
fn test_reopened_tree_sees_records() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 4);
    insert_all(&heap, &tree, 0..20);

    let view = heap.view();
    let reopened = BTree::open(&view, tree.root(), ObjectClass::immediate()).unwrap();
    assert_eq!(reopened.len(&view).unwrap(), 20);
    assert!(reopened.lookup(&view, &object_key(13)).unwrap().is_some());
}

// =============================================================================
// Insert / Lookup Tests
// =============================================================================

#[test]
fn test_insert_then_lookup() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);

    let mut tx = heap.begin().unwrap();
    let (record, fresh) = tree.insert(&mut tx, &object_key(42), &input(512)).unwrap();
    assert!(fresh);
    tx.commit().unwrap();

    let view = heap.view();
    assert_eq!(tree.lookup(&view, &object_key(42)).unwrap(), Some(record));
    assert_eq!(view.resolve(record).unwrap().size, 512);
    assert_eq!(tree.lookup(&view, &object_key(43)).unwrap(), None);
}

#[test]
fn test_insert_existing_key_updates_record() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);
    insert_all(&heap, &tree, [5]);

    let mut tx = heap.begin().unwrap();
    let (record, fresh) = tree.insert(&mut tx, &object_key(5), &input(999)).unwrap();
    assert!(!fresh);
    tx.commit().unwrap();

    let view = heap.view();
    assert_eq!(view.resolve(record).unwrap().size, 999);
    assert_eq!(tree.len(&view).unwrap(), 1);
}

#[test]
fn test_wrong_key_size_rejected() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);

    assert!(matches!(
        tree.lookup(&heap.view(), b"short"),
        Err(CellarError::InvalidArgument(_))
    ));
}

#[test]
fn test_splits_keep_every_key_reachable() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 3);

    // Reverse order exercises splits on the left edge
    insert_all(&heap, &tree, (0..200).rev());

    let view = heap.view();
    let root: &TreeRootDf = view.resolve(tree.root()).unwrap();
    assert!(root.depth >= 3);
    assert_eq!(root.count, 200);
    for oid in 0..200 {
        let record = tree.lookup(&view, &object_key(oid)).unwrap().unwrap();
        assert_eq!(view.resolve(record).unwrap().oid, oid);
    }
}

#[test]
fn test_aborted_insert_leaves_tree_untouched() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 3);
    insert_all(&heap, &tree, 0..10);
    let before = heap.stats();

    {
        let mut tx = heap.begin().unwrap();
        for oid in 10..50 {
            tree.insert(&mut tx, &object_key(oid), &input(oid)).unwrap();
        }
    }

    assert_eq!(heap.stats(), before);
    let view = heap.view();
    assert_eq!(tree.len(&view).unwrap(), 10);
    assert!(tree.lookup(&view, &object_key(20)).unwrap().is_none());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_missing_key_is_not_found() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);
    insert_all(&heap, &tree, [1]);

    let mut tx = heap.begin().unwrap();
    assert!(matches!(
        tree.delete(&mut tx, &object_key(2)),
        Err(CellarError::NotFound)
    ));
}

#[test]
fn test_delete_frees_record() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 8);
    insert_all(&heap, &tree, [1, 2]);
    let before = heap.stats().objects;

    let mut tx = heap.begin().unwrap();
    tree.delete(&mut tx, &object_key(1)).unwrap();
    tx.commit().unwrap();

    let view = heap.view();
    assert!(tree.lookup(&view, &object_key(1)).unwrap().is_none());
    assert!(tree.lookup(&view, &object_key(2)).unwrap().is_some());
    drop(view);
    assert_eq!(heap.stats().objects, before - 1);
}

#[test]
fn test_delete_everything_collapses_root() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 3);
    let empty_objects = heap.stats().objects;
    insert_all(&heap, &tree, 0..100);

    let mut tx = heap.begin().unwrap();
    for oid in 0..100 {
        tree.delete(&mut tx, &object_key(oid)).unwrap();
    }
    tx.commit().unwrap();

    let view = heap.view();
    let root = view.resolve(tree.root()).unwrap();
    assert_eq!(root.count, 0);
    assert_eq!(root.depth, 0);
    drop(view);
    assert_eq!(heap.stats().objects, empty_objects);
}

// =============================================================================
// Drain / Destroy Tests
// =============================================================================

#[test]
fn test_drain_in_batches() {
    let (_temp, heap) = setup_temp_heap();
    let tree = create_tree(&heap, 4);
    insert_all(&heap, &tree, 0..25);

    let mut batches = Vec::new();
    loop {
        let mut tx = heap.begin().unwrap();
        let removed = tree.drain(&mut tx, 10).unwrap();
        tx.commit().unwrap();
        if removed == 0 {
            break;
        }
        batches.push(removed);
    }

    assert_eq!(batches, vec![10, 10, 5]);
    assert!(tree.is_empty(&heap.view()).unwrap());
}

#[test]
fn test_destroy_frees_all_nodes() {
    let (_temp, heap) = setup_temp_heap();
    let baseline = heap.stats().objects;
    let tree = create_tree(&heap, 3);
    insert_all(&heap, &tree, 0..64);

    let mut tx = heap.begin().unwrap();
    tree.destroy(&mut tx).unwrap();
    tx.commit().unwrap();

    let stats = heap.stats();
    assert_eq!(stats.objects, baseline);
    assert_eq!(stats.used_bytes, 0);
}
