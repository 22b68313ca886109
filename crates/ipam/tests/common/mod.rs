//! Shared fixtures for engine tests

#![allow(dead_code)]

use crds::{IPPool, IPPoolSpec, PoolType, ReservedRange};
use ipam::{Ipam, IpamConfig, MockStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Install a test-writer subscriber so `RUST_LOG=debug cargo test` shows engine logs
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub fn local_pool(name: &str, cidr: &str, block_size: u8) -> IPPool {
    IPPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: IPPoolSpec {
            cidr: cidr.to_string(),
            pool_type: PoolType::Local,
            block_size: Some(block_size),
            ..Default::default()
        },
        status: None,
    }
}

pub fn vlan_pool(name: &str, cidr: &str) -> IPPool {
    let mut pool = local_pool(name, cidr, 0);
    pool.spec.pool_type = PoolType::Vlan;
    pool.spec.block_size = None;
    pool
}

pub fn reserve(pool: &mut IPPool, start: &str, end: &str) {
    pool.spec.reserved = Some(ReservedRange {
        start: start.to_string(),
        end: end.to_string(),
    });
}

/// Mock store seeded with `pools`, and an engine over it
pub fn setup(pools: Vec<IPPool>) -> (MockStore, Ipam<MockStore>) {
    setup_with_config(pools, IpamConfig::default())
}

pub fn setup_with_config(pools: Vec<IPPool>, config: IpamConfig) -> (MockStore, Ipam<MockStore>) {
    init_tracing();
    let store = MockStore::new();
    for pool in pools {
        store.add_pool(pool);
    }
    (store.clone(), Ipam::with_config(store, config))
}

/// Sum of a handle's per-block counts as stored
pub fn handle_total(store: &MockStore, handle_id: &str) -> u64 {
    store
        .handle(handle_id)
        .map(|h| h.spec.blocks.values().map(|n| u64::from(*n)).sum())
        .unwrap_or(0)
}
