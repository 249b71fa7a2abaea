//! Tests for anchored tree iteration
//!
//! These tests verify:
//! - Iteration visits keys in order
//! - Anchors resume strictly after the last key returned
//! - Iteration tolerates deletes between steps

use cellar::btree::{Anchor, BTree};
use cellar::config::Config;
use cellar::container::{object_key, ObjectClass, ObjectInput};
use cellar::heap::Heap;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_tree(oids: &[u64]) -> (TempDir, Heap, BTree<ObjectClass>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let heap = Heap::open(temp_dir.path(), &config).unwrap();

    let mut tx = heap.begin().unwrap();
    let tree = BTree::create(&mut tx, 4, ObjectClass::immediate()).unwrap();
    for oid in oids {
        let input = ObjectInput {
            size: 1,
            epoch: 1,
            addr: 0,
        };
        tree.insert(&mut tx, &object_key(*oid), &input).unwrap();
    }
    tx.commit().unwrap();

    (temp_dir, heap, tree)
}

fn oid_of(key: &[u8]) -> u64 {
    u64::from_be_bytes(key.try_into().unwrap())
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_iter_in_key_order() {
    let (_temp, heap, tree) = setup_tree(&[9, 3, 27, 1, 81, 0, 5]);
    let view = heap.view();

    let oids: Vec<u64> = tree
        .iter(&view, Anchor::zero())
        .map(|item| oid_of(&item.unwrap().0))
        .collect();

    assert_eq!(oids, vec![0, 1, 3, 5, 9, 27, 81]);
}

#[test]
fn test_iter_empty_tree() {
    let (_temp, heap, tree) = setup_tree(&[]);
    let view = heap.view();

    assert_eq!(tree.iter(&view, Anchor::zero()).count(), 0);
    assert!(tree.next_after(&view, None).unwrap().is_none());
}

// =============================================================================
// Anchor Tests
// =============================================================================

#[test]
fn test_anchor_resumes_after_last_key() {
    let oids: Vec<u64> = (0..30).collect();
    let (_temp, heap, tree) = setup_tree(&oids);
    let view = heap.view();

    let mut iter = tree.iter(&view, Anchor::zero());
    let first: Vec<u64> = iter.by_ref().take(12).map(|r| oid_of(&r.unwrap().0)).collect();
    let anchor = iter.into_anchor();
    assert_eq!(anchor.key(), Some(&object_key(11)[..]));

    let rest: Vec<u64> = tree
        .iter(&view, anchor)
        .map(|r| oid_of(&r.unwrap().0))
        .collect();

    assert_eq!(first, (0..12).collect::<Vec<_>>());
    assert_eq!(rest, (12..30).collect::<Vec<_>>());
}

#[test]
fn test_anchor_on_absent_key() {
    let (_temp, heap, tree) = setup_tree(&[10, 20, 30]);
    let view = heap.view();

    let next = tree
        .next_after(&view, Some(&object_key(15)))
        .unwrap()
        .map(|(key, _)| oid_of(&key));
    assert_eq!(next, Some(20));

    let past_end = tree.next_after(&view, Some(&object_key(30))).unwrap();
    assert!(past_end.is_none());
}

#[test]
fn test_anchor_survives_deletes() {
    let oids: Vec<u64> = (0..20).collect();
    let (_temp, heap, tree) = setup_tree(&oids);

    let anchor = {
        let view = heap.view();
        let mut iter = tree.iter(&view, Anchor::zero());
        iter.by_ref().take(5).for_each(drop);
        iter.into_anchor()
    };

    let mut tx = heap.begin().unwrap();
    for oid in [4, 5, 6] {
        tree.delete(&mut tx, &object_key(oid)).unwrap();
    }
    tx.commit().unwrap();

    let view = heap.view();
    let rest: Vec<u64> = tree
        .iter(&view, anchor)
        .map(|r| oid_of(&r.unwrap().0))
        .collect();
    assert_eq!(rest, (7..20).collect::<Vec<_>>());
}
