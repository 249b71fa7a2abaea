//! Tests for container handles and the handle cache
//!
//! These tests verify:
//! - Open and close keep the open count balanced
//! - Concurrent opens of one id share a single in-memory object
//! - Extra references keep the object alive without counting as opens
//! - The in-memory object goes away with its last reference
//! - Destroy and open of one id never interleave
//! - Pending reclamation outlives the in-memory object

use std::sync::{Arc, Barrier};
use std::thread;

use cellar::container::HandleCache;
use cellar::{CellarError, Config, Pool};
use tempfile::TempDir;
use uuid::Uuid;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_pool() -> (TempDir, Pool, Uuid) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();
    let pool = Pool::open(config).unwrap();
    let id = Uuid::new_v4();
    pool.create_container(id).unwrap();
    (temp_dir, pool, id)
}

// =============================================================================
// Open Count Tests
// =============================================================================

#[test]
fn test_open_close_balance() {
    let (_temp, pool, id) = setup_pool();

    let a = pool.open_container(id).unwrap();
    let b = pool.open_container(id).unwrap();
    let c = pool.open_container(id).unwrap();
    assert_eq!(a.open_count(), 3);
    assert!(a.same_object(&b) && b.same_object(&c));

    b.close();
    assert_eq!(a.open_count(), 2);
    drop(c);
    assert_eq!(a.open_count(), 1);
    a.close();

    assert!(pool.container_ref(id).is_none());
    assert_eq!(pool.handle_cache().len(), 0);
}

#[test]
fn test_reopen_builds_fresh_object() {
    let (_temp, pool, id) = setup_pool();

    let first = pool.open_container(id).unwrap();
    let solo = first.solo_epoch();
    first.close();

    let second = pool.open_container(id).unwrap();
    assert_eq!(second.open_count(), 1);
    assert!(second.solo_epoch() > solo);
    second.close();
}

#[test]
fn test_solo_epoch_stable_while_cached() {
    let (_temp, pool, id) = setup_pool();

    let a = pool.open_container(id).unwrap();
    let b = pool.open_container(id).unwrap();
    assert_eq!(a.solo_epoch(), b.solo_epoch());
    a.close();
    b.close();
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_opens_share_object() {
    let (_temp, pool, id) = setup_pool();
    let pool = Arc::new(pool);
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pool.open_container(id).unwrap()
            })
        })
        .collect();

    let opened: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(opened.iter().all(|h| h.same_object(&opened[0])));
    assert_eq!(opened[0].open_count(), 8);
    assert_eq!(pool.stats().unwrap().cached_containers, 1);

    for handle in opened {
        handle.close();
    }
    assert_eq!(pool.handle_cache().len(), 0);
}

#[test]
fn test_concurrent_open_close_cycles() {
    let (_temp, pool, id) = setup_pool();
    let pool = Arc::new(pool);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..50 {
                    let handle = pool.open_container(id).unwrap();
                    assert!(handle.open_count() >= 1);
                    handle.close();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let handle = pool.open_container(id).unwrap();
    assert_eq!(handle.open_count(), 1);
    handle.close();
}

#[test]
fn test_destroy_races_open() {
    let (_temp, pool, _) = setup_pool();
    let pool = Arc::new(pool);

    for _ in 0..10 {
        let id = Uuid::new_v4();
        pool.create_container(id).unwrap();
        let barrier = Arc::new(Barrier::new(5));

        let openers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..20 {
                        match pool.open_container(id) {
                            Ok(handle) => {
                                // An open handle pins a live descriptor
                                handle.query().unwrap();
                                handle.insert_object(1, 10, 1).unwrap();
                                handle.close();
                            }
                            Err(CellarError::NotFound) => return,
                            Err(e) => panic!("unexpected open error: {}", e),
                        }
                    }
                })
            })
            .collect();

        let destroyer = {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                loop {
                    match pool.destroy_container(id) {
                        Ok(()) => return,
                        Err(CellarError::Busy { open_count }) => {
                            assert!(open_count > 0);
                            thread::yield_now();
                        }
                        Err(e) => panic!("unexpected destroy error: {}", e),
                    }
                }
            })
        };

        destroyer.join().unwrap();
        for opener in openers {
            opener.join().unwrap();
        }

        assert!(matches!(
            pool.open_container(id),
            Err(CellarError::NotFound)
        ));
        assert!(pool.container_ref(id).is_none());
    }

    pool.gc_wait().unwrap();
    let stats = pool.stats().unwrap();
    assert_eq!(stats.containers, 1);
    assert_eq!(stats.gc_pending, 0);
    assert_eq!(stats.used_blocks, Some(0));
}

// =============================================================================
// Reference Tests
// =============================================================================

#[test]
fn test_add_ref_keeps_object_alive() {
    let (_temp, pool, id) = setup_pool();

    let handle = pool.open_container(id).unwrap();
    let extra = handle.add_ref();
    handle.close();

    assert_eq!(extra.open_count(), 0);
    let again = pool.open_container(id).unwrap();
    assert_eq!(again.open_count(), 1);
    assert_eq!(again.solo_epoch(), extra.solo_epoch());
    again.close();

    let cached = pool.container_ref(id).unwrap();
    assert_eq!(cached.id(), id);
    drop(cached);
    drop(extra);
    assert!(pool.container_ref(id).is_none());
}

#[test]
fn test_shared_cache_across_pools() {
    let cache = Arc::new(HandleCache::new());
    let t1 = TempDir::new().unwrap();
    let t2 = TempDir::new().unwrap();
    let p1 = Pool::open_with_cache(
        Config::builder().data_dir(t1.path()).build(),
        Arc::clone(&cache),
    )
    .unwrap();
    let p2 = Pool::open_with_cache(
        Config::builder().data_dir(t2.path()).build(),
        Arc::clone(&cache),
    )
    .unwrap();

    // Same container id in two pools stays two objects
    let id = Uuid::new_v4();
    p1.create_container(id).unwrap();
    p2.create_container(id).unwrap();
    let h1 = p1.open_container(id).unwrap();
    let h2 = p2.open_container(id).unwrap();

    assert!(!h1.same_object(&h2));
    assert_eq!(cache.len(), 2);
    h1.close();
    h2.close();
    assert!(cache.is_empty());
}

// =============================================================================
// Reclamation Tests
// =============================================================================

#[test]
fn test_bin_drained_after_last_close() {
    let (_temp, pool, id) = setup_pool();
    pool.gc_wait().unwrap();
    let baseline = pool.heap_stats().objects;

    let handle = pool.open_container(id).unwrap();
    for oid in 0..5 {
        handle.insert_object(oid, 100, 1).unwrap();
    }
    for oid in 0..5 {
        handle.delete_object(oid).unwrap();
    }
    handle.close();

    pool.gc_wait().unwrap();
    assert_eq!(pool.heap_stats().objects, baseline);
    assert_eq!(pool.stats().unwrap().used_blocks, Some(0));
}

#[test]
fn test_stale_ref_leaves_new_container_linked() {
    let (_temp, pool, id) = setup_pool();

    let handle = pool.open_container(id).unwrap();
    let stale = handle.add_ref();
    handle.close();
    pool.destroy_container(id).unwrap();

    pool.create_container(id).unwrap();
    pool.gc_wait().unwrap();
    let baseline = pool.heap_stats().objects;

    let fresh = pool.open_container(id).unwrap();
    assert_ne!(fresh.solo_epoch(), stale.solo_epoch());
    for oid in 0..5 {
        fresh.insert_object(oid, 100, 1).unwrap();
        fresh.delete_object(oid).unwrap();
    }

    // Freeing the destroyed object must not stall the new container's bin
    drop(stale);
    pool.gc_wait().unwrap();
    assert!(fresh.descriptor_df().unwrap().gc_bin.is_empty());
    fresh.close();
    assert_eq!(pool.heap_stats().objects, baseline);
}
