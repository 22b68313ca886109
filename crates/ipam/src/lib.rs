//! DCops IPAM Engine
//!
//! Hands out individual addresses from `IPPool`s, tracks which consumer
//! (handle) holds each one, and releases a consumer's addresses in bulk.
//!
//! State lives in three record kinds in a backing store that only offers
//! per-record optimistic concurrency:
//! - **Blocks** (`IPAMBlock`): fixed-size subdivisions of a pool, each an
//!   independently writable slot table
//! - **Handles** (`IPAMHandle`): per-consumer address counts keyed by block
//! - **Pools** (`IPPool`): read-only configuration
//!
//! Every mutation is a bounded read-modify-write loop; a version conflict is
//! the only expected race signal and always triggers a fresh read.
//!
//! # Example
//!
//! ```no_run
//! use ipam::{Ipam, KubeStore};
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ipam = Ipam::new(KubeStore::try_default().await?);
//!
//! let assigned = ipam.auto_assign("default-pool", "kube-system.coredns-0", &BTreeMap::new()).await?;
//! println!("{} via {:?}", assigned.address, assigned.gateway);
//!
//! ipam.release_by_handle("kube-system.coredns-0").await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod block;
pub mod cidr;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod kube_store;
pub mod pool;
pub mod releaser;
pub mod store;
pub mod utilization;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use allocator::AssignedAddress;
pub use block::{Block, RESERVED_HANDLE_ID, block_name};
pub use cidr::{BlockCidrs, PoolKind};
pub use config::IpamConfig;
pub use engine::Ipam;
pub use error::{IpamError, StoreError};
pub use handle::{Handle, handle_name};
pub use kube_store::KubeStore;
pub use pool::Pool;
pub use store::IpamStore;
pub use utilization::PoolUtilization;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockStore;
