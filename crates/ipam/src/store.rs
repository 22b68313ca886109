//! Backing store abstraction
//!
//! The engine only needs single-record optimistic concurrency: every record
//! carries a resource version, and a write against a stale version fails with
//! [`StoreError::Conflict`] instead of overwriting. There are no
//! multi-record transactions.
//!
//! [`KubeStore`](crate::KubeStore) implements this trait against the
//! Kubernetes API; tests use [`MockStore`](crate::MockStore).

use crate::error::StoreError;
use crds::{IPAMBlock, IPAMHandle, IPPool};

/// Record storage consumed by the IPAM engine.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait IpamStore: Send + Sync {
    // Pools are read-only to the engine
    async fn get_pool(&self, name: &str) -> Result<IPPool, StoreError>;
    async fn list_pools(&self) -> Result<Vec<IPPool>, StoreError>;

    // Blocks
    async fn get_block(&self, name: &str) -> Result<IPAMBlock, StoreError>;
    /// Blocks labelled as belonging to `pool`
    async fn list_blocks(&self, pool: &str) -> Result<Vec<IPAMBlock>, StoreError>;
    /// Fails with `AlreadyExists` when the name is taken
    async fn create_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError>;
    /// Fails with `Conflict` when `block` was read at a stale version
    async fn update_block(&self, block: &IPAMBlock) -> Result<IPAMBlock, StoreError>;
    /// Deletes `block` if it is still at the version it was read at
    async fn delete_block(&self, block: &IPAMBlock) -> Result<(), StoreError>;

    // Handles
    async fn get_handle(&self, name: &str) -> Result<IPAMHandle, StoreError>;
    async fn create_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError>;
    async fn update_handle(&self, handle: &IPAMHandle) -> Result<IPAMHandle, StoreError>;
    async fn delete_handle(&self, handle: &IPAMHandle) -> Result<(), StoreError>;
}
