//! Tests for catalog iteration
//!
//! These tests verify:
//! - Listing returns ids in UUID order
//! - Paging with anchors covers every id exactly once
//! - Anchors stay valid across creates and destroys

use std::collections::BTreeSet;

use cellar::btree::Anchor;
use cellar::{Config, Pool};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_pool_with(count: usize) -> (TempDir, Pool, Vec<Uuid>) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .catalog_order(4)
        .build();
    let pool = Pool::open(config).unwrap();

    let mut ids: Vec<Uuid> = (0..count).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        pool.create_container(*id).unwrap();
    }
    ids.sort();
    (temp_dir, pool, ids)
}

// =============================================================================
// Listing Tests
// =============================================================================

#[test]
fn test_list_sorted() {
    let (_temp, pool, ids) = setup_pool_with(50);
    assert_eq!(pool.list_containers().unwrap(), ids);
    assert_eq!(pool.stats().unwrap().containers, 50);
}

#[test]
fn test_list_empty_pool() {
    let (_temp, pool, _) = setup_pool_with(0);
    assert!(pool.list_containers().unwrap().is_empty());

    let (page, anchor) = pool.containers(Anchor::zero(), 10).unwrap();
    assert!(page.is_empty());
    assert!(anchor.is_zero());
}

// =============================================================================
// Paging Tests
// =============================================================================

#[test]
fn test_paging_covers_all() {
    let (_temp, pool, ids) = setup_pool_with(23);

    let mut anchor = Anchor::zero();
    let mut collected = Vec::new();
    loop {
        let (page, next) = pool.containers(anchor, 5).unwrap();
        if page.is_empty() {
            break;
        }
        assert!(page.len() <= 5);
        collected.extend(page);
        anchor = next;
    }

    assert_eq!(collected, ids);
}

#[test]
fn test_anchor_survives_catalog_changes() {
    let (_temp, pool, ids) = setup_pool_with(12);

    let (first, anchor) = pool.containers(Anchor::zero(), 6).unwrap();
    assert_eq!(first, ids[..6]);

    // Destroy one already returned and one still ahead, then add more
    pool.destroy_container(ids[2]).unwrap();
    pool.destroy_container(ids[8]).unwrap();
    let added: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for id in &added {
        pool.create_container(*id).unwrap();
    }

    let (rest, _) = pool.containers(anchor, 100).unwrap();
    let last_seen = ids[5];
    let mut expected: BTreeSet<Uuid> = ids[6..].iter().copied().collect();
    expected.remove(&ids[8]);
    expected.extend(added.iter().copied().filter(|id| *id > last_seen));

    assert_eq!(rest, expected.into_iter().collect::<Vec<_>>());
}
