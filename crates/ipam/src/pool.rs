//! Engine view of an `IPPool`
//!
//! [`Pool`] is the parsed, validated form of the pool spec: CIDRs and
//! addresses are real network types and the pool type is resolved to a
//! [`PoolKind`] on demand.

use crate::cidr::{self, PoolKind};
use crate::error::IpamError;
use crds::{DnsConfig, IPPool, PoolType, Route};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use macaddr::MacAddr6;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Block prefix for IPv4 local pools that do not set `blockSize`
pub const DEFAULT_BLOCK_SIZE_V4: u8 = 26;

/// Block prefix for IPv6 local pools that do not set `blockSize`
pub const DEFAULT_BLOCK_SIZE_V6: u8 = 122;

/// Largest block is 2^16 slots; the slot array lives in a single record.
pub const MAX_BLOCK_HOST_BITS: u8 = 16;

/// Stable numeric pool id used in block names
pub fn pool_id(name: &str) -> u32 {
    let digest = Sha256::digest(name.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Generated hardware address for an assigned address.
///
/// IPv4 addresses map to `0a:58:` followed by their four octets; IPv6
/// addresses get none.
pub fn link_address(ip: IpAddr) -> Option<MacAddr6> {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            Some(MacAddr6::new(0x0a, 0x58, a, b, c, d))
        }
        IpAddr::V6(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct Pool {
    name: String,
    id: u32,
    cidr: IpNetwork,
    pool_type: PoolType,
    block_size: Option<u8>,
    disabled: bool,
    /// Inclusive reserved range, clamped to the pool
    reserved: Option<(u128, u128)>,
    gateway: Option<IpAddr>,
    routes: Vec<Route>,
    dns: DnsConfig,
}

impl Pool {
    /// Parse a pool resource. Fails with `InvalidPool` on malformed addresses.
    pub fn from_resource(resource: &IPPool) -> Result<Self, IpamError> {
        let name = resource.name_any();
        let spec = &resource.spec;

        let cidr = cidr::parse_network(&spec.cidr).ok_or_else(|| {
            IpamError::InvalidPool(format!("pool {} has invalid CIDR '{}'", name, spec.cidr))
        })?;

        let parse_addr = |field: &str, raw: &str| -> Result<IpAddr, IpamError> {
            let ip: IpAddr = raw.trim().parse().map_err(|_| {
                IpamError::InvalidPool(format!("pool {} has invalid {} '{}'", name, field, raw))
            })?;
            if ip.is_ipv4() != cidr.is_ipv4() {
                return Err(IpamError::InvalidPool(format!(
                    "pool {} {} {} does not match the pool address family",
                    name, field, ip
                )));
            }
            Ok(ip)
        };

        let reserved = match &spec.reserved {
            Some(range) => {
                let start = cidr::ip_to_u128(parse_addr("reserved start", &range.start)?);
                let end = cidr::ip_to_u128(parse_addr("reserved end", &range.end)?);
                if start > end {
                    return Err(IpamError::InvalidPool(format!(
                        "pool {} reserved range {}-{} is reversed",
                        name, range.start, range.end
                    )));
                }
                let first = cidr::ip_to_u128(cidr.network());
                let last = first + (cidr::prefix_capacity(cidr::address_width(&cidr), cidr.prefix()) - 1);
                let (lo, hi) = (start.max(first), end.min(last));
                (lo <= hi).then_some((lo, hi))
            }
            None => None,
        };

        let gateway = spec
            .gateway
            .as_deref()
            .map(|gw| parse_addr("gateway", gw))
            .transpose()?;

        Ok(Self {
            id: pool_id(&name),
            name,
            cidr,
            pool_type: spec.pool_type.clone(),
            block_size: spec.block_size,
            disabled: spec.disabled,
            reserved,
            gateway,
            routes: spec.routes.clone(),
            dns: spec.dns.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cidr(&self) -> &IpNetwork {
        &self.cidr
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn gateway(&self) -> Option<IpAddr> {
        self.gateway
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn dns(&self) -> &DnsConfig {
        &self.dns
    }

    /// Resolve the pool type and block size into a [`PoolKind`].
    pub fn kind(&self) -> Result<PoolKind, IpamError> {
        let width = cidr::address_width(&self.cidr);
        let kind = match self.pool_type {
            PoolType::Local => {
                let default = if self.cidr.is_ipv4() {
                    DEFAULT_BLOCK_SIZE_V4
                } else {
                    DEFAULT_BLOCK_SIZE_V6
                };
                let block_prefix = match self.block_size {
                    Some(size) if size < self.cidr.prefix() || size > width => {
                        return Err(IpamError::InvalidPool(format!(
                            "pool {} block size /{} must be between /{} and /{}",
                            self.name,
                            size,
                            self.cidr.prefix(),
                            width
                        )));
                    }
                    Some(size) => size,
                    None => default.max(self.cidr.prefix()),
                };
                PoolKind::Local { block_prefix }
            }
            PoolType::Vlan => PoolKind::Vlan,
            PoolType::Unknown => {
                return Err(IpamError::UnknownPoolType(format!(
                    "pool {} has type {}",
                    self.name, self.pool_type
                )));
            }
        };

        let host_bits = width - kind.block_prefix(&self.cidr);
        if host_bits > MAX_BLOCK_HOST_BITS {
            return Err(IpamError::InvalidPool(format!(
                "pool {} blocks would hold 2^{} addresses (max 2^{})",
                self.name, host_bits, MAX_BLOCK_HOST_BITS
            )));
        }
        Ok(kind)
    }

    /// Total addresses in the pool
    pub fn capacity(&self) -> u128 {
        cidr::prefix_capacity(cidr::address_width(&self.cidr), self.cidr.prefix())
    }

    /// Whether `ip` is kept back from normal allocation
    pub fn is_reserved(&self, ip: IpAddr) -> bool {
        if self.gateway == Some(ip) {
            return true;
        }
        let value = cidr::ip_to_u128(ip);
        self.reserved
            .is_some_and(|(lo, hi)| (lo..=hi).contains(&value))
    }

    /// Addresses in the pool kept back by the reserved range and the gateway
    pub fn num_reserved(&self) -> u128 {
        let range = self.reserved.map_or(0, |(lo, hi)| hi - lo + 1);
        let gateway_outside_range = self.gateway.is_some_and(|gw| {
            let value = cidr::ip_to_u128(gw);
            self.cidr.contains(gw) && !self.reserved.is_some_and(|(lo, hi)| (lo..=hi).contains(&value))
        });
        range.saturating_add(u128::from(gateway_outside_range))
    }
}
