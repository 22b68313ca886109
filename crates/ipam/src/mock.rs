//! In-memory IpamStore for unit testing
//!
//! Behaves like the Kubernetes store: every write bumps a resource version,
//! updates and deletes against a stale version fail with `Conflict`, and
//! creates of a taken name fail with `AlreadyExists`. Listing is ordered by
//! record name so tests are deterministic.
//!
//! Faults can be injected to exercise the engine's retry and compensation
//! paths without real concurrent writers.

use crate::error::StoreError;
use crate::handle::handle_name;
use crate::store::IpamStore;
use crds::{IPAMBlock, IPAMHandle, IPPool, POOL_NAME_LABEL};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock IpamStore for testing
#[derive(Clone, Debug, Default)]
pub struct MockStore {
    pub(crate) pools: Arc<Mutex<BTreeMap<String, IPPool>>>,
    pub(crate) blocks: Arc<Mutex<BTreeMap<String, IPAMBlock>>>,
    pub(crate) handles: Arc<Mutex<BTreeMap<String, IPAMHandle>>>,
    pub(crate) faults: Arc<Mutex<Faults>>,
    // Counter for resource versions
    pub(crate) version: Arc<Mutex<u64>>,
}

/// Pending injected faults and write statistics
#[derive(Debug, Default)]
pub(crate) struct Faults {
    block_update_conflicts: usize,
    block_update_failures: usize,
    handle_write_failures: usize,
    block_create_race: bool,
    block_writes: usize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_version<K: Resource>(incoming: &K, stored: &K, what: &str) -> Result<(), StoreError> {
    match incoming.meta().resource_version.as_deref() {
        Some(rv) if Some(rv) != stored.meta().resource_version.as_deref() => Err(
            StoreError::Conflict(format!("{} was modified (version {} is stale)", what, rv)),
        ),
        _ => Ok(()),
    }
}

impl MockStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a pool (for test setup)
    pub fn add_pool(&self, mut pool: IPPool) {
        pool.meta_mut().resource_version = Some(self.next_version());
        lock(&self.pools).insert(pool.name_any(), pool);
    }

    /// Insert a block as-is (for test setup)
    pub fn put_block(&self, mut block: IPAMBlock) {
        block.meta_mut().resource_version = Some(self.next_version());
        lock(&self.blocks).insert(block.name_any(), block);
    }

    /// Snapshot of every stored block, ordered by name
    pub fn blocks(&self) -> Vec<IPAMBlock> {
        lock(&self.blocks).values().cloned().collect()
    }

    pub fn block(&self, name: &str) -> Option<IPAMBlock> {
        lock(&self.blocks).get(name).cloned()
    }

    /// Stored handle record for a caller-facing handle id
    pub fn handle(&self, handle_id: &str) -> Option<IPAMHandle> {
        lock(&self.handles).get(&handle_name(handle_id)).cloned()
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.handles).len()
    }

    /// Make the next `n` block updates fail with `Conflict`, as if another
    /// writer got there first
    pub fn inject_block_update_conflicts(&self, n: usize) {
        lock(&self.faults).block_update_conflicts = n;
    }

    /// Make the next `n` block updates fail with a backend error
    pub fn inject_block_update_failures(&self, n: usize) {
        lock(&self.faults).block_update_failures = n;
    }

    /// Make the next `n` handle updates or deletes fail with a backend error
    pub fn inject_handle_write_failures(&self, n: usize) {
        lock(&self.faults).handle_write_failures = n;
    }

    /// Make the next block create lose a race: the block is stored as if
    /// another writer created it, and the caller gets `AlreadyExists`
    pub fn inject_block_create_race(&self) {
        lock(&self.faults).block_create_race = true;
    }

    /// Number of block creates, updates and deletes attempted
    pub fn block_writes(&self) -> usize {
        lock(&self.faults).block_writes
    }

    fn next_version(&self) -> String {
        let mut v = lock(&self.version);
        *v += 1;
        v.to_string()
    }

    fn take_handle_write_failure(&self) -> Result<(), StoreError> {
        let mut faults = lock(&self.faults);
        if faults.handle_write_failures > 0 {
            faults.handle_write_failures -= 1;
            return Err(StoreError::Backend("injected handle write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IpamStore for MockStore {
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError> {
        lock(&self.pools)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("IPPool {}", name)))
    }

    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError> {
        Ok(lock(&self.pools).values().cloned().collect())
    }

    async fn get_block(&self, name: &str) -> Result<IPAMBlock, StoreError> {
        lock(&self.blocks)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("IPAMBlock {}", name)))
    }

    async fn list_blocks(&self, pool: &str) -> Result<Vec<IPAMBlock>, StoreError> {
        Ok(lock(&self.blocks)
            .values()
            .filter(|b| b.labels().get(POOL_NAME_LABEL).map(String::as_str) == Some(pool))
            .cloned()
            .collect())
    }

    async fn create_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError> {
        let name = block.name_any();
        let race = {
            let mut faults = lock(&self.faults);
            faults.block_writes += 1;
            std::mem::take(&mut faults.block_create_race)
        };

        let mut blocks = lock(&self.blocks);
        if race {
            let mut winner = block.clone();
            winner.meta_mut().resource_version = Some(self.next_version());
            blocks.insert(name.clone(), winner);
        }
        if blocks.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("IPAMBlock {}", name)));
        }
        let mut created = block.clone();
        created.meta_mut().resource_version = Some(self.next_version());
        blocks.insert(name, created.clone());
        Ok(created)
    }

    async fn update_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError> {
        let name = block.name_any();
        {
            let mut faults = lock(&self.faults);
            faults.block_writes += 1;
            if faults.block_update_conflicts > 0 {
                faults.block_update_conflicts -= 1;
                return Err(StoreError::Conflict(format!("IPAMBlock {} (injected)", name)));
            }
            if faults.block_update_failures > 0 {
                faults.block_update_failures -= 1;
                return Err(StoreError::Backend(format!("IPAMBlock {} (injected)", name)));
            }
        }

        let mut blocks = lock(&self.blocks);
        let stored = blocks
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(format!("IPAMBlock {}", name)))?;
        check_version(block, stored, &format!("IPAMBlock {}", name))?;
        let mut updated = block.clone();
        updated.meta_mut().resource_version = Some(self.next_version());
        blocks.insert(name, updated.clone());
        Ok(updated)
    }

    async fn delete_block(&self, block: &IPAMBlock) -> Result<(), StoreError> {
        let name = block.name_any();
        lock(&self.faults).block_writes += 1;

        let mut blocks = lock(&self.blocks);
        let stored = blocks
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(format!("IPAMBlock {}", name)))?;
        check_version(block, stored, &format!("IPAMBlock {}", name))?;
        blocks.remove(&name);
        Ok(())
    }

    async fn get_handle(&self, name: &str) -> Result<IPAMHandle, StoreError> {
        lock(&self.handles)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("IPAMHandle {}", name)))
    }

    async fn create_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError> {
        let name = handle.name_any();
        let mut handles = lock(&self.handles);
        if handles.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!("IPAMHandle {}", name)));
        }
        let mut created = handle.clone();
        created.meta_mut().resource_version = Some(self.next_version());
        handles.insert(name, created.clone());
        Ok(created)
    }

    async fn update_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError> {
        self.take_handle_write_failure()?;
        let name = handle.name_any();
        let mut handles = lock(&self.handles);
        let stored = handles
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(format!("IPAMHandle {}", name)))?;
        check_version(handle, stored, &format!("IPAMHandle {}", name))?;
        let mut updated = handle.clone();
        updated.meta_mut().resource_version = Some(self.next_version());
        handles.insert(name, updated.clone());
        Ok(updated)
    }

    async fn delete_handle(&self, handle: &IPAMHandle) -> Result<(), StoreError> {
        self.take_handle_write_failure()?;
        let name = handle.name_any();
        let mut handles = lock(&self.handles);
        let stored = handles
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(format!("IPAMHandle {}", name)))?;
        check_version(handle, stored, &format!("IPAMHandle {}", name))?;
        handles.remove(&name);
        Ok(())
    }
}
