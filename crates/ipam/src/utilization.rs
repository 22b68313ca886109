//! Pool utilization reporting

use crate::block::Block;
use crate::engine::Ipam;
use crate::error::{IpamError, StoreError};
use crate::pool::Pool;
use crate::store::IpamStore;
use chrono::Utc;
use crds::{IPPool, IPPoolStatus};
use kube::ResourceExt;
use tracing::{debug, warn};

/// Address counts for one pool.
///
/// `unallocated == capacity - allocated - reserved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUtilization {
    pub name: String,
    pub capacity: u128,
    pub allocated: u128,
    pub reserved: u128,
    pub unallocated: u128,
}

impl PoolUtilization {
    /// Status block for the pool resource. Counters saturate at `u64::MAX`.
    pub fn to_status(&self) -> IPPoolStatus {
        let clamp = |n: u128| u64::try_from(n).unwrap_or(u64::MAX);
        IPPoolStatus {
            capacity: clamp(self.capacity),
            allocated: clamp(self.allocated),
            reserved: clamp(self.reserved),
            unallocated: clamp(self.unallocated),
            synced: true,
            last_synced: Some(Utc::now()),
        }
    }
}

impl<S: IpamStore> Ipam<S> {
    /// Utilization of the named pools, or of every pool when `pool_names`
    /// is empty.
    ///
    /// A named pool that does not exist fails the whole report; when listing
    /// every pool, pools whose spec cannot be parsed are skipped.
    ///
    /// `reserved` counts the pool's reserved range and gateway whether or not
    /// any block exists yet, so a pool with no blocks reports
    /// `unallocated == capacity - reserved`, not `capacity`.
    pub async fn get_utilization(&self, pool_names: &[&str]) -> Result<Vec<PoolUtilization>, IpamError> {
        let list_all = pool_names.is_empty();
        let resources: Vec<IPPool> = if list_all {
            self.store.list_pools().await?
        } else {
            let mut resources = Vec::with_capacity(pool_names.len());
            for name in pool_names {
                match self.store.get_pool(name).await {
                    Ok(resource) => resources.push(resource),
                    Err(StoreError::NotFound(_)) => {
                        return Err(IpamError::NoQualifiedPool(format!("pool {} not found", name)));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            resources
        };

        let mut report = Vec::with_capacity(resources.len());
        for resource in &resources {
            let pool = match Pool::from_resource(resource) {
                Ok(pool) => pool,
                Err(e) if list_all => {
                    warn!("Skipping pool {} in utilization report: {}", resource.name_any(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.push(self.pool_utilization(&pool).await?);
        }
        Ok(report)
    }

    async fn pool_utilization(&self, pool: &Pool) -> Result<PoolUtilization, IpamError> {
        let mut allocated: u128 = 0;
        for resource in self.store.list_blocks(pool.name()).await? {
            allocated += Block::from_resource(resource)?.num_allocated() as u128;
        }

        let capacity = pool.capacity();
        let reserved = pool.num_reserved();
        let unallocated = capacity.saturating_sub(allocated).saturating_sub(reserved);
        debug!(
            "Pool {}: capacity {}, allocated {}, reserved {}, unallocated {}",
            pool.name(),
            capacity,
            allocated,
            reserved,
            unallocated
        );

        Ok(PoolUtilization {
            name: pool.name().to_string(),
            capacity,
            allocated,
            reserved,
            unallocated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_status_saturates() {
        let usage = PoolUtilization {
            name: "v6".to_string(),
            capacity: 1u128 << 64,
            allocated: 3,
            reserved: 1,
            unallocated: (1u128 << 64) - 4,
        };
        let status = usage.to_status();
        assert_eq!(status.capacity, u64::MAX);
        assert_eq!(status.allocated, 3);
        assert_eq!(status.unallocated, u64::MAX - 3);
        assert!(status.synced);
        assert!(status.last_synced.is_some());
    }
}
