//! Bulk release by handle

use crate::block::Block;
use crate::engine::Ipam;
use crate::error::{IpamError, StoreError};
use crate::handle::{Handle, handle_name};
use crate::store::IpamStore;
use tracing::{debug, error, info, warn};

impl<S: IpamStore> Ipam<S> {
    /// Release every address held by `handle_id`.
    ///
    /// Idempotent: an unknown handle is already released. Blocks left empty
    /// are deleted, and so is the handle once its ledger is empty.
    pub async fn release_by_handle(&self, handle_id: &str) -> Result<(), IpamError> {
        let handle = match self.store.get_handle(&handle_name(handle_id)).await {
            Ok(resource) => Handle::from_resource(resource),
            Err(StoreError::NotFound(_)) => {
                debug!("Handle {} not found, nothing to release", handle_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        for block_name in handle.blocks().keys() {
            self.release_from_block(handle_id, block_name).await?;
        }
        info!("Released handle {} ({} address(es) recorded)", handle_id, handle.total());
        Ok(())
    }

    async fn release_from_block(&self, handle_id: &str, block_name: &str) -> Result<(), IpamError> {
        for attempt in 1..=self.config.max_retries {
            let mut block = match self.store.get_block(block_name).await {
                Ok(resource) => Block::from_resource(resource)?,
                Err(StoreError::NotFound(_)) => {
                    debug!("Block {} already gone, nothing to release for handle {}", block_name, handle_id);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if block.is_deleted() {
                if block.is_empty() {
                    self.finish_block_delete(&block).await;
                }
                return Ok(());
            }

            let released = block.release_by_handle(handle_id);
            if released == 0 {
                debug!("Block {} holds nothing for handle {}", block_name, handle_id);
                return Ok(());
            }

            if block.is_empty() {
                block.mark_deleted();
                let tombstone = match self.store.update_block(block.resource()).await {
                    Ok(tombstone) => tombstone,
                    Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => {
                        debug!("Block {} changed before tombstoning (attempt {}), retrying", block_name, attempt);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                self.finish_block_delete(&Block::from_resource(tombstone)?).await;
            } else {
                match self.store.update_block(block.resource()).await {
                    Ok(_) => {}
                    Err(StoreError::Conflict(_) | StoreError::NotFound(_)) => {
                        debug!("Block {} changed before release (attempt {}), retrying", block_name, attempt);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            debug!("Released {} address(es) of handle {} in block {}", released, handle_id, block_name);
            let released = u32::try_from(released).unwrap_or(u32::MAX);
            if let Err(e) = self.decrement_handle(handle_id, block_name, released).await {
                error!(
                    "Addresses of handle {} in block {} are free but the handle was not updated: {}",
                    handle_id, block_name, e
                );
            }
            return Ok(());
        }

        Err(IpamError::MaxRetries(format!(
            "releasing handle {} from block {}",
            handle_id, block_name
        )))
    }

    /// Delete a tombstoned block. A failure leaves the tombstone for the next
    /// reader to clean up.
    async fn finish_block_delete(&self, block: &Block) {
        match self.store.delete_block(block.resource()).await {
            Ok(()) | Err(StoreError::NotFound(_)) => info!("Deleted empty block {}", block.name()),
            Err(e) => warn!("Block {} tombstoned but not deleted yet: {}", block.name(), e),
        }
    }
}
