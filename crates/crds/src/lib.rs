//! DCops IPAM CRD Definitions
//!
//! Kubernetes Custom Resource Definitions backing the IPAM engine:
//! - `IPPool`: administratively defined address pools (read-only to the engine)
//! - `IPAMBlock`: fixed-size, independently writable subdivisions of a pool
//! - `IPAMHandle`: per-consumer reference counts used for bulk release

pub mod ip_pool;
pub mod ipam_block;
pub mod ipam_handle;

pub use ip_pool::*;
pub use ipam_block::*;
pub use ipam_handle::*;

/// Label placed on every `IPAMBlock`, naming the `IPPool` it subdivides
pub const POOL_NAME_LABEL: &str = "ipam.dcops.microscaler.io/pool";
