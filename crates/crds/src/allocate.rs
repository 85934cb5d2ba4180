//! Allocation ownership records
//!
//! Every occupied address in an IPPool maps to an [`AllocateInfo`] describing
//! who holds it. The record is a tagged union on the wire (`type` field); the
//! extra fields are meaningful only for their own variant: `cid` identifies
//! the sandbox of a pod allocation, `owner` the stateful workload behind a
//! pinned allocation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Who an address is handed out to.
///
/// Serialized form matches the stored records of earlier releases:
/// `{"type":"pod","id":"ns/name","cid":"..."}` and so on. `cid` and `owner`
/// default to empty when absent so records written before those fields
/// existed still deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type")]
pub enum AllocateInfo {
    /// Address held by a pod; `id` is `podNs/podName`, `cid` the sandbox
    /// identity issued by the CNI caller.
    #[serde(rename = "pod")]
    Pod {
        id: String,
        #[serde(default)]
        cid: String,
    },

    /// Address registered by the CNI with an opaque caller identity.
    #[serde(rename = "cniused")]
    CniUsed { id: String },

    /// Address pinned for a stateful workload member; `owner` is
    /// `ownerNs/ownerName` of the workload, `id` the member pod.
    #[serde(rename = "statefulset")]
    StatefulSet {
        id: String,
        #[serde(default)]
        owner: String,
    },
}

impl AllocateInfo {
    pub fn id(&self) -> &str {
        match self {
            AllocateInfo::Pod { id, .. }
            | AllocateInfo::CniUsed { id }
            | AllocateInfo::StatefulSet { id, .. } => id,
        }
    }

    /// Equal-by-identity: same variant, same `id`, same `owner`. The sandbox
    /// (`cid`) is ignored so a pod restarted under a new sandbox still owns
    /// its address.
    pub fn same_identity(&self, other: &AllocateInfo) -> bool {
        match (self, other) {
            (AllocateInfo::Pod { id: a, .. }, AllocateInfo::Pod { id: b, .. }) => a == b,
            (AllocateInfo::CniUsed { id: a }, AllocateInfo::CniUsed { id: b }) => a == b,
            (
                AllocateInfo::StatefulSet { id: a, owner: ao },
                AllocateInfo::StatefulSet { id: b, owner: bo },
            ) => a == b && ao == bo,
            _ => false,
        }
    }

    /// Equal-by-identity-and-sandbox: identity plus, for pods, the sandbox.
    /// Release paths use this so a replacement sandbox for the same pod does
    /// not tear down the address the new sandbox just received.
    pub fn same_identity_and_sandbox(&self, other: &AllocateInfo) -> bool {
        match (self, other) {
            (AllocateInfo::Pod { id: a, cid: ac }, AllocateInfo::Pod { id: b, cid: bc }) => {
                a == b && ac == bc
            }
            _ => self.same_identity(other),
        }
    }
}

/// Requested allocation kind carried by the engine's request envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AllocateType {
    Pod,
    CniUsed,
    StatefulSet,
}

impl std::fmt::Display for AllocateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AllocateType::Pod => "pod",
            AllocateType::CniUsed => "cniused",
            AllocateType::StatefulSet => "statefulset",
        };
        f.write_str(name)
    }
}

/// Builds the `namespace/name` key used for allocation ids and owner fields.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Splits a `namespace/name` key back into its parts.
pub fn split_object_key(key: &str) -> Option<(&str, &str)> {
    let (namespace, name) = key.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some((namespace, name))
}
