//! IPAM engine entry point

use crate::block::Block;
use crate::config::IpamConfig;
use crate::error::{IpamError, StoreError};
use crate::handle::{Handle, handle_name};
use crate::store::IpamStore;
use std::net::IpAddr;
use tracing::debug;

/// Allocation engine over an [`IpamStore`].
///
/// Holds no mutable state of its own: every operation is a bounded
/// read-modify-write loop against the store, so any number of `Ipam`
/// instances, in any number of processes, may share one store.
#[derive(Debug, Clone)]
pub struct Ipam<S> {
    pub(crate) store: S,
    pub(crate) config: IpamConfig,
}

impl<S: IpamStore> Ipam<S> {
    /// Engine with the default configuration
    pub fn new(store: S) -> Self {
        Self::with_config(store, IpamConfig::default())
    }

    pub fn with_config(store: S, config: IpamConfig) -> Self {
        Self { store, config }
    }

    /// Every address currently owned by `handle_id`, in block-name order.
    /// An unknown handle owns nothing.
    pub async fn ips_by_handle(&self, handle_id: &str) -> Result<Vec<IpAddr>, IpamError> {
        let handle = match self.store.get_handle(&handle_name(handle_id)).await {
            Ok(resource) => Handle::from_resource(resource),
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ips = Vec::new();
        for block_name in handle.blocks().keys() {
            match self.store.get_block(block_name).await {
                Ok(resource) => ips.extend(Block::from_resource(resource)?.ips_by_handle(handle_id)),
                Err(StoreError::NotFound(_)) => {
                    debug!("Handle {} references missing block {}", handle_id, block_name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(ips)
    }
}
