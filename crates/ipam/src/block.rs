//! Allocation block
//!
//! A [`Block`] wraps an `IPAMBlock` record with the per-slot operations the
//! allocator and releaser need. Every slot is either empty or indexes an
//! entry of the attribute table; a slot whose entry is owned by
//! [`RESERVED_HANDLE_ID`] is reserved rather than allocated, so
//! `allocated + free + reserved == capacity` always holds.

use crate::cidr;
use crate::error::IpamError;
use crate::pool::Pool;
use crds::{AllocationAttribute, IPAMBlock, IPAMBlockSpec, POOL_NAME_LABEL};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Sentinel owner of reserved slots
pub const RESERVED_HANDLE_ID: &str = "ipam-reserved";

/// Deterministic record name for the block `cidr` of pool `pool_id`.
///
/// Two allocators claiming the same CIDR produce the same name, so the
/// store's create-time uniqueness check settles the race.
pub fn block_name(pool_id: u32, cidr: &IpNetwork) -> String {
    let slug: String = cidr
        .to_string()
        .chars()
        .map(|c| match c {
            '.' | ':' | '/' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    format!("{}-{}", pool_id, slug)
}

#[derive(Debug, Clone)]
pub struct Block {
    resource: IPAMBlock,
    cidr: IpNetwork,
}

impl Block {
    /// Build a new, unsaved block for `cidr`, with the pool's reserved
    /// addresses already populated.
    pub fn new(pool: &Pool, cidr: IpNetwork) -> Self {
        let capacity = block_capacity(&cidr);
        let base = cidr::ip_to_u128(cidr.network());

        let mut allocations = vec![None; capacity];
        let mut attributes = Vec::new();
        for (ordinal, slot) in allocations.iter_mut().enumerate() {
            let addr = cidr::u128_to_ip(base + ordinal as u128, cidr.is_ipv4());
            if pool.is_reserved(addr) {
                if attributes.is_empty() {
                    attributes.push(AllocationAttribute {
                        handle_id: Some(RESERVED_HANDLE_ID.to_string()),
                        secondary: BTreeMap::new(),
                    });
                }
                *slot = Some(0);
            }
        }

        let name = block_name(pool.id(), &cidr);
        let mut resource = IPAMBlock::new(
            &name,
            IPAMBlockSpec {
                pool_id: pool.id(),
                cidr: cidr.to_string(),
                allocations,
                attributes,
                deleted: false,
            },
        );
        resource
            .labels_mut()
            .insert(POOL_NAME_LABEL.to_string(), pool.name().to_string());

        Self { resource, cidr }
    }

    /// Wrap a stored record, checking the slot table is consistent.
    pub fn from_resource(resource: IPAMBlock) -> Result<Self, IpamError> {
        let name = resource.name_any();
        let spec = &resource.spec;

        let cidr = cidr::parse_network(&spec.cidr).ok_or_else(|| {
            IpamError::CorruptRecord(format!("block {} has invalid CIDR '{}'", name, spec.cidr))
        })?;
        if spec.allocations.len() != block_capacity(&cidr) {
            return Err(IpamError::CorruptRecord(format!(
                "block {} has {} slots, expected {}",
                name,
                spec.allocations.len(),
                block_capacity(&cidr)
            )));
        }
        let attributes = spec.attributes.len();
        if let Some(bad) = spec
            .allocations
            .iter()
            .flatten()
            .find(|idx| **idx as usize >= attributes)
        {
            return Err(IpamError::CorruptRecord(format!(
                "block {} slot references missing attribute {}",
                name, bad
            )));
        }

        Ok(Self { resource, cidr })
    }

    pub fn name(&self) -> String {
        self.resource.name_any()
    }

    pub fn cidr(&self) -> &IpNetwork {
        &self.cidr
    }

    pub fn resource(&self) -> &IPAMBlock {
        &self.resource
    }

    pub fn into_resource(self) -> IPAMBlock {
        self.resource
    }

    pub fn capacity(&self) -> usize {
        self.resource.spec.allocations.len()
    }

    pub fn num_free(&self) -> usize {
        self.resource.spec.allocations.iter().filter(|s| s.is_none()).count()
    }

    pub fn num_reserved(&self) -> usize {
        self.slot_owners().filter(|owner| *owner == Some(RESERVED_HANDLE_ID)).count()
    }

    pub fn num_allocated(&self) -> usize {
        self.capacity() - self.num_free() - self.num_reserved()
    }

    /// True when no slot is set at all. A block holding reserved addresses
    /// is never empty.
    pub fn is_empty(&self) -> bool {
        self.num_free() == self.capacity()
    }

    /// Claim up to `count` free slots, lowest address first, for `handle_id`.
    ///
    /// Returns the assigned addresses, possibly fewer than `count`.
    pub fn auto_assign(
        &mut self,
        count: usize,
        handle_id: &str,
        attrs: &BTreeMap<String, String>,
    ) -> Vec<IpAddr> {
        let base = cidr::ip_to_u128(self.cidr.network());
        let ipv4 = self.cidr.is_ipv4();
        let spec = &mut self.resource.spec;

        let mut assigned = Vec::with_capacity(count);
        for ordinal in 0..spec.allocations.len() {
            if assigned.len() == count {
                break;
            }
            if spec.allocations[ordinal].is_some() {
                continue;
            }
            let index = spec.attributes.len() as u32;
            spec.attributes.push(AllocationAttribute {
                handle_id: Some(handle_id.to_string()),
                secondary: attrs.clone(),
            });
            spec.allocations[ordinal] = Some(index);
            assigned.push(cidr::u128_to_ip(base + ordinal as u128, ipv4));
        }
        assigned
    }

    /// Clear every slot owned by `handle_id`. Attribute entries are left in
    /// place. Reserved slots are never released.
    pub fn release_by_handle(&mut self, handle_id: &str) -> usize {
        if handle_id == RESERVED_HANDLE_ID {
            return 0;
        }
        let spec = &mut self.resource.spec;
        let mut released = 0;
        for slot in spec.allocations.iter_mut() {
            let owned = slot.is_some_and(|idx| {
                spec.attributes[idx as usize].handle_id.as_deref() == Some(handle_id)
            });
            if owned {
                *slot = None;
                released += 1;
            }
        }
        released
    }

    /// Addresses currently owned by `handle_id`
    pub fn ips_by_handle(&self, handle_id: &str) -> Vec<IpAddr> {
        let base = cidr::ip_to_u128(self.cidr.network());
        self.slot_owners()
            .enumerate()
            .filter(|(_, owner)| *owner == Some(handle_id))
            .map(|(ordinal, _)| cidr::u128_to_ip(base + ordinal as u128, self.cidr.is_ipv4()))
            .collect()
    }

    pub fn mark_deleted(&mut self) {
        self.resource.spec.deleted = true;
    }

    pub fn is_deleted(&self) -> bool {
        self.resource.spec.deleted
    }

    fn slot_owners(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        let spec = &self.resource.spec;
        spec.allocations.iter().map(move |slot| {
            slot.and_then(|idx| spec.attributes.get(idx as usize))
                .and_then(|attr| attr.handle_id.as_deref())
        })
    }
}

fn block_capacity(cidr: &IpNetwork) -> usize {
    usize::try_from(cidr::prefix_capacity(cidr::address_width(cidr), cidr.prefix()))
        .unwrap_or(usize::MAX)
}
