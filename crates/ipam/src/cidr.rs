//! Block CIDR generation
//!
//! A pool is tiled by equally sized block CIDRs. [`BlockCidrs`] enumerates
//! them lazily in ascending address order; the allocator walks it only when
//! no existing block has room.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address width in bits for the family of `net`
pub fn address_width(net: &IpNetwork) -> u8 {
    if net.is_ipv4() { 32 } else { 128 }
}

pub fn ip_to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// Inverse of [`ip_to_u128`]; IPv4 values are truncated to 32 bits.
pub fn u128_to_ip(value: u128, ipv4: bool) -> IpAddr {
    if ipv4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

/// Number of addresses covered by a prefix of `prefix` bits in a `width`-bit family.
/// Saturates at `u128::MAX` for a `::/0` network.
pub fn prefix_capacity(width: u8, prefix: u8) -> u128 {
    1u128
        .checked_shl(u32::from(width.saturating_sub(prefix)))
        .unwrap_or(u128::MAX)
}

/// Parse a CIDR and clear any host bits
pub fn parse_network(cidr: &str) -> Option<IpNetwork> {
    let net: IpNetwork = cidr.trim().parse().ok()?;
    IpNetwork::new(net.network(), net.prefix()).ok()
}

/// Whether `inner` lies entirely within `outer`
pub fn contains_network(outer: &IpNetwork, inner: &IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && inner.prefix() >= outer.prefix()
        && outer.contains(inner.network())
}

/// How a pool is carved into blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// Tiled by blocks with the given prefix length
    Local { block_prefix: u8 },
    /// A single block covering the whole pool
    Vlan,
}

impl PoolKind {
    /// Prefix length of the blocks this kind produces for `pool`
    pub fn block_prefix(&self, pool: &IpNetwork) -> u8 {
        match self {
            PoolKind::Local { block_prefix } => *block_prefix,
            PoolKind::Vlan => pool.prefix(),
        }
    }

    /// Candidate block CIDRs covering `pool`
    pub fn block_cidrs(&self, pool: &IpNetwork) -> BlockCidrs {
        BlockCidrs::new(*pool, self.block_prefix(pool))
    }
}

/// Lazy, finite sequence of block CIDRs tiling a pool.
///
/// Call [`PoolKind::block_cidrs`] again to restart from the lowest block.
#[derive(Debug, Clone)]
pub struct BlockCidrs {
    base: u128,
    ipv4: bool,
    block_prefix: u8,
    step_bits: u32,
    next: u128,
    count: u128,
}

impl BlockCidrs {
    /// Enumerate blocks of `block_prefix` inside `pool`.
    /// Yields nothing when `block_prefix` is outside `[pool prefix, address width]`.
    pub fn new(pool: IpNetwork, block_prefix: u8) -> Self {
        let width = address_width(&pool);
        let count = if block_prefix < pool.prefix() || block_prefix > width {
            0
        } else {
            prefix_capacity(block_prefix, pool.prefix())
        };
        Self {
            base: ip_to_u128(pool.network()),
            ipv4: pool.is_ipv4(),
            block_prefix,
            step_bits: u32::from(width - block_prefix.min(width)),
            next: 0,
            count,
        }
    }
}

impl Iterator for BlockCidrs {
    type Item = IpNetwork;

    fn next(&mut self) -> Option<IpNetwork> {
        if self.next >= self.count {
            return None;
        }
        let offset = self.next.checked_shl(self.step_bits)?;
        self.next += 1;
        let addr = u128_to_ip(self.base.wrapping_add(offset), self.ipv4);
        IpNetwork::new(addr, self.block_prefix).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        parse_network(s).unwrap()
    }

    #[test]
    fn test_local_pool_tiles_in_ascending_order() {
        let kind = PoolKind::Local { block_prefix: 26 };
        let blocks: Vec<String> = kind
            .block_cidrs(&net("10.0.0.0/24"))
            .map(|b| b.to_string())
            .collect();

        assert_eq!(
            blocks,
            vec!["10.0.0.0/26", "10.0.0.64/26", "10.0.0.128/26", "10.0.0.192/26"]
        );
    }

    #[test]
    fn test_vlan_pool_yields_single_block() {
        let pool = net("192.168.10.0/24");
        let blocks: Vec<IpNetwork> = PoolKind::Vlan.block_cidrs(&pool).collect();
        assert_eq!(blocks, vec![pool]);
    }

    #[test]
    fn test_block_size_equal_to_pool_yields_pool() {
        let pool = net("10.1.0.0/25");
        let blocks: Vec<IpNetwork> = PoolKind::Local { block_prefix: 25 }.block_cidrs(&pool).collect();
        assert_eq!(blocks, vec![pool]);
    }

    #[test]
    fn test_every_candidate_is_distinct_and_contained() {
        let pool = net("fd00:10::/116");
        let blocks: Vec<IpNetwork> = PoolKind::Local { block_prefix: 122 }.block_cidrs(&pool).collect();

        assert_eq!(blocks.len(), 64);
        assert_eq!(blocks[1].to_string(), "fd00:10::40/122");
        for (i, block) in blocks.iter().enumerate() {
            assert!(contains_network(&pool, block));
            assert!(!blocks[i + 1..].contains(block));
        }
    }

    #[test]
    fn test_invalid_block_prefix_yields_nothing() {
        let pool = net("10.0.0.0/24");
        assert_eq!(BlockCidrs::new(pool, 16).count(), 0);
        assert_eq!(BlockCidrs::new(pool, 33).count(), 0);
    }

    #[test]
    fn test_parse_network_clears_host_bits() {
        assert_eq!(net("10.0.0.77/24").to_string(), "10.0.0.0/24");
        assert!(parse_network("not-a-cidr").is_none());
    }

    #[test]
    fn test_prefix_capacity() {
        assert_eq!(prefix_capacity(32, 24), 256);
        assert_eq!(prefix_capacity(128, 120), 256);
        assert_eq!(prefix_capacity(128, 0), u128::MAX);
    }
}
