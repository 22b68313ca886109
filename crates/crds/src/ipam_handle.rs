//! IPAMHandle CRD
//!
//! Reference-count ledger for one consumer's allocations, keyed by block
//! name, so that a consumer's addresses can be released without scanning
//! every block.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "IPAMHandle",
    printcolumn = r#"{"name":"HANDLE", "type":"string", "jsonPath":".spec.handleId"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPAMHandleSpec {
    /// Caller-supplied handle id (the record name may be a sanitized form)
    pub handle_id: String,

    /// Addresses held per block name
    #[serde(default)]
    pub blocks: BTreeMap<String, u32>,
}
