//! `StorageBackendContent` — controller-managed realization of a Claim (spec.md §3).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{NamespacedRef, Parameters, Pool};

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, CustomResource)]
#[kube(
    group = "storage.example.io",
    version = "v1",
    kind = "StorageBackendContent",
    shortname = "sbco",
    namespaced,
    status = "StorageBackendContentStatus",
    printcolumn = r#"{"name":"Vendor", "type":"string", "jsonPath":".status.vendorName"}"#,
    printcolumn = r#"{"name":"Online", "type":"boolean", "jsonPath":".status.online"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageBackendContentSpec {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<NamespacedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamespacedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_threads: Option<String>,
    #[serde(default)]
    pub use_cert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret_ref: Option<NamespacedRef>,
    #[serde(default)]
    pub parameters: Parameters,
    /// Back-reference to the owning Claim, `<namespace>/<name>` (spec.md §3).
    pub backend_claim: NamespacedRef,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageBackendContentStatus {
    /// Provider-assigned backend id, populated once `AddStorageBackend` succeeds.
    #[serde(default)]
    pub content_name: String,
    #[serde(default)]
    pub vendor_name: String,
    #[serde(default)]
    pub provider_version: String,
    #[serde(default)]
    pub sn: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
    #[serde(default)]
    pub specification: BTreeMap<String, String>,
    #[serde(default)]
    pub pools: Vec<Pool>,
    /// Mirrors `spec.{secretRef,maxClientThreads,useCert,certSecretRef}` as
    /// of the last successful `updateOnProvider` call, so the sidecar can
    /// detect drift without re-issuing an RPC on every tick (spec.md §4.6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamespacedRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_threads: Option<String>,
    #[serde(default)]
    pub use_cert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret_ref: Option<NamespacedRef>,
}

impl StorageBackendContentStatus {
    /// Whether the driver-reported stats differ from what's currently stored,
    /// gating the `getStats` overwrite to avoid spurious status writes
    /// (spec.md §4.6).
    pub fn stats_differ(&self, other: &StorageBackendContentStatus) -> bool {
        self.vendor_name != other.vendor_name
            || self.provider_version != other.provider_version
            || self.online != other.online
            || self.sn != other.sn
            || self.capacity != other.capacity
            || self.capabilities != other.capabilities
            || self.specification != other.specification
            || self.pools != other.pools
    }

    /// Whether `spec`'s mutable provider-credential fields have drifted from
    /// the last values this status mirrored (spec.md §4.6 `updateOnProvider`
    /// trigger).
    pub fn credentials_differ(&self, spec: &StorageBackendContentSpec) -> bool {
        self.secret_ref != spec.secret_ref
            || self.max_client_threads != spec.max_client_threads
            || self.use_cert != spec.use_cert
            || self.cert_secret_ref != spec.cert_secret_ref
    }

    pub fn mirror_credentials(&mut self, spec: &StorageBackendContentSpec) {
        self.secret_ref = spec.secret_ref.clone();
        self.max_client_threads = spec.max_client_threads.clone();
        self.use_cert = spec.use_cert;
        self.cert_secret_ref = spec.cert_secret_ref.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StorageBackendContentSpec {
        StorageBackendContentSpec {
            provider: "vendor-a".to_string(),
            config_map_ref: None,
            secret_ref: Some(NamespacedRef::new("ns", "s1")),
            max_client_threads: Some("8".to_string()),
            use_cert: false,
            cert_secret_ref: None,
            parameters: Parameters::new(),
            backend_claim: NamespacedRef::new("ns", "claim-a"),
        }
    }

    #[test]
    fn stats_differ_is_false_for_identical_status() {
        let a = StorageBackendContentStatus {
            vendor_name: "acme".to_string(),
            online: true,
            ..Default::default()
        };
        assert!(!a.stats_differ(&a.clone()));
    }

    #[test]
    fn stats_differ_detects_online_flip() {
        let a = StorageBackendContentStatus { online: true, ..Default::default() };
        let b = StorageBackendContentStatus { online: false, ..Default::default() };
        assert!(a.stats_differ(&b));
    }

    #[test]
    fn credentials_differ_detects_secret_rotation() {
        let status = StorageBackendContentStatus::default();
        assert!(status.credentials_differ(&spec()));

        let mut mirrored = status;
        mirrored.mirror_credentials(&spec());
        assert!(!mirrored.credentials_differ(&spec()));

        let mut rotated = spec();
        rotated.secret_ref = Some(NamespacedRef::new("ns", "s2"));
        assert!(mirrored.credentials_differ(&rotated));
    }
}
