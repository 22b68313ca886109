//! IPPool CRD
//!
//! Defines an address pool: a CIDR plus the allocation policy the IPAM engine
//! applies to it. Pools are owned by an external controller; the engine only
//! reads the spec and computes the status counters.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "IPPool",
    status = "IPPoolStatus",
    printcolumn = r#"{"name":"CIDR", "type":"string", "jsonPath":".spec.cidr"}"#,
    printcolumn = r#"{"name":"TYPE", "type":"string", "jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"DISABLED", "type":"boolean", "jsonPath":".spec.disabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolSpec {
    /// Pool CIDR (e.g., "10.10.0.0/16")
    pub cidr: String,

    /// Pool type, selects how the pool is subdivided into blocks
    #[serde(default, rename = "type")]
    pub pool_type: PoolType,

    /// Prefix length of each block. Ignored for VLAN pools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u8>,

    /// Disabled pools are never used as allocation sources
    #[serde(default)]
    pub disabled: bool,

    /// Addresses kept back for infrastructure use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<ReservedRange>,

    /// Default gateway handed out with every address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Extra routes handed out with every address
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,

    /// DNS configuration handed out with every address
    #[serde(default)]
    pub dns: DnsConfig,
}

/// How a pool is carved into blocks
///
/// Unrecognized values deserialize as `Unknown` so that a pool written by a
/// newer controller can still be read (and rejected) by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PoolType {
    /// Subdivided into blocks of `blockSize`
    #[default]
    Local,

    /// Single flat subnet, never subdivided
    Vlan,

    /// Any other value
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PoolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Vlan => write!(f, "vlan"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Inclusive address range
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservedRange {
    /// First reserved address
    pub start: String,

    /// Last reserved address
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Destination CIDR
    pub dst: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Observed pool utilization, computed by the IPAM engine and persisted by
/// the pool controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolStatus {
    /// Total addresses in the pool
    pub capacity: u64,

    /// Addresses currently held by a handle
    pub allocated: u64,

    /// Addresses kept back by the reserved range and gateway
    pub reserved: u64,

    /// Addresses still available for allocation
    pub unallocated: u64,

    /// Whether the counters reflect the current block state
    #[serde(default)]
    pub synced: bool,

    /// Last time the counters were computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_spec_deserializes_camel_case() {
        let spec: IPPoolSpec = serde_json::from_value(serde_json::json!({
            "cidr": "10.0.0.0/24",
            "type": "vlan",
            "blockSize": 26,
            "reserved": { "start": "10.0.0.1", "end": "10.0.0.9" },
            "dns": { "nameservers": ["10.0.0.53"] }
        }))
        .unwrap();

        assert_eq!(spec.pool_type, PoolType::Vlan);
        assert_eq!(spec.block_size, Some(26));
        assert!(!spec.disabled);
        assert_eq!(spec.reserved.unwrap().end, "10.0.0.9");
        assert_eq!(spec.dns.nameservers, vec!["10.0.0.53".to_string()]);
    }

    #[test]
    fn test_unrecognized_pool_type_is_unknown() {
        let spec: IPPoolSpec = serde_json::from_value(serde_json::json!({
            "cidr": "10.0.0.0/24",
            "type": "calico"
        }))
        .unwrap();

        assert_eq!(spec.pool_type, PoolType::Unknown);
    }

    #[test]
    fn test_pool_type_defaults_to_local() {
        let spec: IPPoolSpec =
            serde_json::from_value(serde_json::json!({ "cidr": "fd00::/64" })).unwrap();
        assert_eq!(spec.pool_type, PoolType::Local);
        assert_eq!(spec.pool_type.to_string(), "local");
    }
}
