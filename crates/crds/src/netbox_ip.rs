//! NetBoxIP CRD
//!
//! The cluster-stored desired-state object (C3): one instance represents
//! exactly one address that a workload reconciler wants mirrored into the
//! remote NetBox registry. The IPAM reconciler (C5) is the only writer of
//! `finalizers`; workload reconcilers (C4) own everything else.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Finalizer sentinel applied by the IPAM reconciler on first sight of a
/// `NetBoxIP` and cleared only after the remote record has been removed.
pub const IP_FINALIZER: &str = "netbox-ip-controller/ip";

/// Label carrying the originating workload's name, set by workload
/// reconcilers so operators can find a `NetBoxIP` by its owner.
pub const WORKLOAD_NAME_LABEL: &str = "netbox-ip-controller/name";

/// One desired IPAM record, addressed by a single IPv4 or IPv6 value.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "netbox.digitalocean.com",
    version = "v1beta1",
    kind = "NetBoxIP",
    plural = "netboxips",
    namespaced,
    printcolumn = r#"{"name":"Address","type":"string","jsonPath":".spec.address"}"#,
    printcolumn = r#"{"name":"DNSName","type":"string","jsonPath":".spec.dnsName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetBoxIPSpec {
    /// Bare IPv4 or IPv6 address (never a CIDR).
    pub address: String,

    /// DNS name, `^(L\.)*L$` where `L = [A-Za-z0-9][A-Za-z0-9-]{0,62}`.
    #[schemars(length(max = 253))]
    pub dns_name: String,

    /// Ordered, already-sorted-by-name tag set.
    #[serde(default)]
    pub tags: Vec<IPTag>,

    /// Free text, `description: "namespace: <ns>, <key>: <value>, ..."`.
    #[serde(default)]
    #[schemars(length(max = 200))]
    pub description: String,
}

/// One `{name, slug}` pair as carried on a `NetBoxIP`, distinct from the
/// richer remote `Tag` model in `ipam_client` which also carries an `id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct IPTag {
    #[schemars(length(max = 100))]
    pub name: String,

    #[schemars(regex(pattern = r"^[-A-Za-z0-9_]+$"))]
    #[schemars(length(max = 100))]
    pub slug: String,
}

impl IPTag {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
        }
    }
}

impl NetBoxIPSpec {
    /// Structural-equality change detector used by `upsertDesiredIP`
    /// (C6). Tags are expected to already be sorted by the caller, same
    /// as the remote `changed()` comparator in `ipam_client`.
    #[must_use]
    pub fn differs_from(&self, other: &NetBoxIPSpec) -> bool {
        self != other
    }
}
