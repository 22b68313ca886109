//! Address allocation
//!
//! `auto_assign` hands out one address from a pool:
//! 1. Fetch the pool and reject it if missing, disabled or of an unknown type
//! 2. Pick the first listed block with a free slot, or claim the first
//!    unclaimed block CIDR by creating it (losing a create race means using
//!    the winner's block). A new block whose every slot is reserved is
//!    passed over for the next CIDR
//! 3. Claim a slot in memory, record it on the handle, then write the block
//!    back; a version conflict re-reads the block and tries again
//!
//! Races that invalidate the chosen block restart the whole cycle from the
//! pool fetch. Exhaustion is reported immediately since retrying cannot
//! create capacity.

use crate::block::{Block, RESERVED_HANDLE_ID};
use crate::cidr::{PoolKind, contains_network, parse_network};
use crate::engine::Ipam;
use crate::error::{IpamError, StoreError};
use crate::pool::{Pool, link_address};
use crate::store::IpamStore;
use crds::{DnsConfig, Route};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use macaddr::MacAddr6;
use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

/// Result of a successful allocation
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedAddress {
    /// Assigned address with the pool's prefix length
    pub address: IpNetwork,
    /// Pool the address came from
    pub pool: String,
    /// Block record holding the allocation
    pub block: String,
    pub gateway: Option<IpAddr>,
    pub routes: Vec<Route>,
    pub dns: DnsConfig,
    /// Generated hardware address, IPv4 only
    pub link_address: Option<MacAddr6>,
}

impl AssignedAddress {
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }
}

impl<S: IpamStore> Ipam<S> {
    /// Assign one address from `pool_name` to `handle_id`.
    ///
    /// `attrs` are stored alongside the allocation in the block. The handle
    /// id [`RESERVED_HANDLE_ID`] is rejected with `InvalidHandle`.
    pub async fn auto_assign(
        &self,
        pool_name: &str,
        handle_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<AssignedAddress, IpamError> {
        if handle_id == RESERVED_HANDLE_ID {
            return Err(IpamError::InvalidHandle(format!(
                "{} is reserved for pool infrastructure addresses",
                handle_id
            )));
        }

        let max = self.config.max_retries;
        let mut last_error = None;

        for attempt in 1..=max {
            let pool = self.qualified_pool(pool_name).await?;
            let kind = pool.kind()?;

            match self.claim_address(&pool, kind, handle_id, attrs).await {
                Ok((ip, block)) => {
                    info!("Assigned {} from pool {} (block {}) to handle {}", ip, pool_name, block, handle_id);
                    return describe(&pool, ip, block);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Assigning from pool {} for handle {} raced (attempt {}/{}): {}",
                        pool_name, handle_id, attempt, max, e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(IpamError::MaxRetries(match last_error {
            Some(e) => format!("assigning from pool {} for handle {}: {}", pool_name, handle_id, e),
            None => format!("assigning from pool {} for handle {}", pool_name, handle_id),
        }))
    }

    async fn qualified_pool(&self, name: &str) -> Result<Pool, IpamError> {
        let resource = match self.store.get_pool(name).await {
            Ok(resource) => resource,
            Err(StoreError::NotFound(_)) => {
                return Err(IpamError::NoQualifiedPool(format!("pool {} not found", name)));
            }
            Err(e) => return Err(e.into()),
        };

        let pool = Pool::from_resource(&resource)?;
        if pool.is_disabled() {
            return Err(IpamError::NoQualifiedPool(format!("pool {} is disabled", name)));
        }
        Ok(pool)
    }

    async fn claim_address(
        &self,
        pool: &Pool,
        kind: PoolKind,
        handle_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<(IpAddr, String), IpamError> {
        let block = self.find_or_claim_block(pool, kind).await?;
        self.assign_from_existing_block(block, handle_id, attrs).await
    }

    /// First listed block with room, else a newly claimed one.
    async fn find_or_claim_block(&self, pool: &Pool, kind: PoolKind) -> Result<Block, IpamError> {
        let mut claimed = HashSet::new();
        for resource in self.store.list_blocks(pool.name()).await? {
            let name = resource.name_any();
            let stored_cidr = parse_network(&resource.spec.cidr);
            let block = match Block::from_resource(resource) {
                Ok(block) => block,
                Err(e) => {
                    warn!("Skipping unreadable block {} of pool {}: {}", name, pool.name(), e);
                    claimed.extend(stored_cidr);
                    continue;
                }
            };
            if !contains_network(pool.cidr(), block.cidr()) {
                warn!("Block {} ({}) is labelled for pool {} but lies outside it", block.name(), block.cidr(), pool.name());
                continue;
            }
            if block.is_deleted() && block.is_empty() {
                // Finish a release that tombstoned the block but never deleted it
                match self.store.delete_block(block.resource()).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {
                        debug!("Removed tombstoned block {}", block.name());
                        continue;
                    }
                    Err(e) => debug!("Tombstoned block {} not removed yet: {}", block.name(), e),
                }
            }
            claimed.insert(*block.cidr());
            if !block.is_deleted() && block.num_free() > 0 {
                debug!("Using block {} with {} free address(es)", block.name(), block.num_free());
                return Ok(block);
            }
        }

        for cidr in kind.block_cidrs(pool.cidr()).filter(|c| !claimed.contains(c)) {
            let block = self.claim_block(pool, cidr).await?;
            if block.num_free() > 0 {
                return Ok(block);
            }
            debug!("Block {} holds only reserved addresses, trying the next CIDR", block.name());
        }
        Err(IpamError::NoFreeBlocks(pool.name().to_string()))
    }

    /// Create the block for `cidr`, or adopt the record of whoever created
    /// it first.
    async fn claim_block(&self, pool: &Pool, cidr: IpNetwork) -> Result<Block, IpamError> {
        let candidate = Block::new(pool, cidr);
        let name = candidate.name();
        match self.store.create_block(candidate.resource()).await {
            Ok(created) => {
                info!("Claimed block {} ({}) for pool {}", name, cidr, pool.name());
                return Block::from_resource(created);
            }
            Err(StoreError::AlreadyExists(_)) => {
                info!("Block {} was claimed concurrently, using the existing record", name);
            }
            Err(e) => return Err(e.into()),
        }

        let block = match self.store.get_block(&name).await {
            Ok(existing) => Block::from_resource(existing)?,
            Err(StoreError::NotFound(_)) => {
                return Err(IpamError::BlockContention(format!(
                    "block {} disappeared after a create race",
                    name
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if block.is_deleted() {
            return Err(IpamError::BlockContention(format!("block {} is being deleted", name)));
        }
        if block.num_free() == 0 {
            return Err(IpamError::InsufficientFreeAddresses(name));
        }
        Ok(block)
    }

    /// Claim one slot of `block` for `handle_id`, re-reading the block on
    /// version conflicts.
    async fn assign_from_existing_block(
        &self,
        mut block: Block,
        handle_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Result<(IpAddr, String), IpamError> {
        let name = block.name();

        for attempt in 1..=self.config.max_retries {
            let Some(ip) = block.auto_assign(1, handle_id, attrs).into_iter().next() else {
                return Err(IpamError::BlockContention(format!("block {} has no free addresses", name)));
            };

            // The handle is written first so that a stored slot always has a
            // handle entry pointing at its block.
            self.increment_handle(handle_id, &name).await?;

            let err = match self.store.update_block(block.resource()).await {
                Ok(_) => return Ok((ip, name)),
                Err(e) => e,
            };

            if let Err(e) = self.decrement_handle(handle_id, &name, 1).await {
                error!(
                    "Failed to roll back handle {} after block {} write failed; handle may over-count: {}",
                    handle_id, name, e
                );
            }

            match err {
                StoreError::Conflict(_) => {
                    debug!("Block {} changed under us (attempt {}), re-reading", name, attempt);
                    block = match self.store.get_block(&name).await {
                        Ok(fresh) => Block::from_resource(fresh)?,
                        Err(StoreError::NotFound(_)) => {
                            return Err(IpamError::BlockContention(format!("block {} was deleted", name)));
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if block.is_deleted() {
                        return Err(IpamError::BlockContention(format!("block {} is being deleted", name)));
                    }
                }
                StoreError::NotFound(_) => {
                    return Err(IpamError::BlockContention(format!("block {} was deleted", name)));
                }
                e => return Err(e.into()),
            }
        }

        Err(IpamError::MaxRetries(format!("writing block {} for handle {}", name, handle_id)))
    }
}

/// Attach pool-level network configuration to an assigned address.
fn describe(pool: &Pool, ip: IpAddr, block: String) -> Result<AssignedAddress, IpamError> {
    let address = IpNetwork::new(ip, pool.cidr().prefix())
        .map_err(|e| IpamError::InvalidPool(format!("pool {}: {}", pool.name(), e)))?;
    Ok(AssignedAddress {
        address,
        pool: pool.name().to_string(),
        block,
        gateway: pool.gateway(),
        routes: pool.routes().to_vec(),
        dns: pool.dns().clone(),
        link_address: link_address(ip),
    })
}
