//! IPAMBlock CRD
//!
//! Allocation state for one fixed-size subdivision of an `IPPool`.
//! Blocks are created and deleted by the IPAM engine only.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "IPAMBlock",
    printcolumn = r#"{"name":"CIDR", "type":"string", "jsonPath":".spec.cidr"}"#,
    printcolumn = r#"{"name":"DELETED", "type":"boolean", "jsonPath":".spec.deleted"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPAMBlockSpec {
    /// Numeric id of the owning pool
    pub pool_id: u32,

    /// Block CIDR. Never changes after creation.
    pub cidr: String,

    /// One slot per address in the block; a set slot indexes `attributes`
    #[serde(default)]
    pub allocations: Vec<Option<u32>>,

    /// Per-allocation metadata referenced from `allocations`
    #[serde(default)]
    pub attributes: Vec<AllocationAttribute>,

    /// Tombstone set just before the block is deleted
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationAttribute {
    /// Handle that owns the allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<String>,

    /// Free-form caller attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secondary: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_spec_round_trips_empty_slots() {
        let spec = IPAMBlockSpec {
            pool_id: 7,
            cidr: "10.0.0.0/30".to_string(),
            allocations: vec![Some(0), None, None, None],
            attributes: vec![AllocationAttribute {
                handle_id: Some("pod-a".to_string()),
                secondary: BTreeMap::new(),
            }],
            deleted: false,
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["poolId"], 7);
        assert_eq!(value["allocations"], serde_json::json!([0, null, null, null]));
        assert_eq!(value["attributes"][0]["handleId"], "pod-a");

        let back: IPAMBlockSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }
}
