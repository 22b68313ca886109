//! Release behaviour of the IPAM engine against the mock store

mod common;

use common::*;
use ipam::{Block, IpamStore};
use std::collections::BTreeMap;

#[tokio::test]
async fn test_release_returns_pool_to_initial_state() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 25)]);
    let attrs = BTreeMap::new();
    ipam.auto_assign("p", "h1", &attrs).await.unwrap();
    ipam.auto_assign("p", "h1", &attrs).await.unwrap();

    ipam.release_by_handle("h1").await.unwrap();

    let usage = ipam.get_utilization(&["p"]).await.unwrap();
    assert_eq!(usage[0].allocated, 0);
    assert_eq!(usage[0].unallocated, 256);
    assert!(store.blocks().is_empty());
    assert!(store.handle("h1").is_none());
    assert!(ipam.ips_by_handle("h1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();

    ipam.release_by_handle("h1").await.unwrap();
    let writes = store.block_writes();
    ipam.release_by_handle("h1").await.unwrap();
    ipam.release_by_handle("never-assigned").await.unwrap();

    assert_eq!(store.block_writes(), writes);
}

#[tokio::test]
async fn test_release_leaves_other_handles_alone() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    let attrs = BTreeMap::new();
    ipam.auto_assign("p", "h1", &attrs).await.unwrap();
    let kept = ipam.auto_assign("p", "h2", &attrs).await.unwrap();
    ipam.auto_assign("p", "h1", &attrs).await.unwrap();

    ipam.release_by_handle("h1").await.unwrap();

    assert_eq!(ipam.ips_by_handle("h2").await.unwrap(), vec![kept.ip()]);
    assert!(store.handle("h1").is_none());
    let blocks = store.blocks();
    assert_eq!(blocks.len(), 1);
    assert!(!blocks[0].spec.deleted);

    // Freed slots are handed out again, lowest first
    let reused = ipam.auto_assign("p", "h3", &attrs).await.unwrap();
    assert_eq!(reused.ip().to_string(), "10.0.0.0");
}

#[tokio::test]
async fn test_release_spanning_blocks() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/29", 30)]);
    let attrs = BTreeMap::new();
    for _ in 0..6 {
        ipam.auto_assign("p", "pod", &attrs).await.unwrap();
    }
    assert_eq!(store.handle("pod").unwrap().spec.blocks.len(), 2);

    ipam.release_by_handle("pod").await.unwrap();

    assert!(store.blocks().is_empty());
    assert_eq!(store.handle_count(), 0);
}

#[tokio::test]
async fn test_block_with_reserved_addresses_survives_release() {
    let mut pool = local_pool("p", "10.0.0.0/24", 26);
    reserve(&mut pool, "10.0.0.0", "10.0.0.9");
    let (store, ipam) = setup(vec![pool]);

    let assigned = ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();
    assert_eq!(assigned.ip().to_string(), "10.0.0.10");

    ipam.release_by_handle("h1").await.unwrap();

    let blocks = store.blocks();
    assert_eq!(blocks.len(), 1);
    let block = Block::from_resource(blocks[0].clone()).unwrap();
    assert_eq!(block.num_allocated(), 0);
    assert_eq!(block.num_reserved(), 10);
    assert!(!block.is_deleted());
}

#[tokio::test]
async fn test_release_retries_block_conflicts() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    let attrs = BTreeMap::new();
    ipam.auto_assign("p", "h1", &attrs).await.unwrap();
    ipam.auto_assign("p", "h2", &attrs).await.unwrap();

    store.inject_block_update_conflicts(2);
    ipam.release_by_handle("h1").await.unwrap();

    assert!(ipam.ips_by_handle("h1").await.unwrap().is_empty());
    assert!(store.handle("h1").is_none());
}

#[tokio::test]
async fn test_release_hits_max_retries_under_persistent_conflicts() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();

    store.inject_block_update_conflicts(10);
    let result = ipam.release_by_handle("h1").await;

    assert!(matches!(result, Err(ipam::IpamError::MaxRetries(_))), "got {:?}", result);
    // Nothing was freed, so the handle still accounts for the address
    assert_eq!(handle_total(&store, "h1"), 1);
}

#[tokio::test]
async fn test_failed_handle_update_does_not_fail_release() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();

    store.inject_handle_write_failures(1);
    ipam.release_by_handle("h1").await.unwrap();

    // Addresses are free even though the handle record is now stale
    assert!(store.blocks().is_empty());
    assert_eq!(handle_total(&store, "h1"), 1);

    // The block is gone, so releasing again cannot reconcile the count
    ipam.release_by_handle("h1").await.unwrap();
    assert_eq!(handle_total(&store, "h1"), 1);
}

#[tokio::test]
async fn test_release_skips_missing_block() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();

    let block = store.blocks().remove(0);
    store.delete_block(&block).await.unwrap();

    ipam.release_by_handle("h1").await.unwrap();
    assert!(ipam.ips_by_handle("h1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_finishes_tombstoned_delete() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);
    ipam.auto_assign("p", "h1", &BTreeMap::new()).await.unwrap();

    let mut stale = store.blocks().remove(0);
    stale.spec.allocations.iter_mut().for_each(|slot| *slot = None);
    stale.spec.deleted = true;
    store.put_block(stale);

    ipam.release_by_handle("h1").await.unwrap();
    assert!(store.blocks().is_empty());
}

#[tokio::test]
async fn test_handle_ids_outside_dns_naming_round_trip() {
    let (store, ipam) = setup(vec![local_pool("p", "10.0.0.0/24", 26)]);

    let assigned = ipam
        .auto_assign("p", "Container_ID/eth0", &BTreeMap::new())
        .await
        .unwrap();
    let handle = store.handle("Container_ID/eth0").unwrap();
    assert_eq!(handle.spec.handle_id, "Container_ID/eth0");
    assert_eq!(
        ipam.ips_by_handle("Container_ID/eth0").await.unwrap(),
        vec![assigned.ip()]
    );

    ipam.release_by_handle("Container_ID/eth0").await.unwrap();
    assert_eq!(store.handle_count(), 0);
}
