//! `StorageBackendClaim` — user-declared request for a storage backend (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{BackendClaimPhase, NamespacedRef, Parameters};

/// User-facing declaration of a storage backend registration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, CustomResource)]
#[kube(
    group = "storage.example.io",
    version = "v1",
    kind = "StorageBackendClaim",
    shortname = "sbc",
    namespaced,
    status = "StorageBackendClaimStatus",
    printcolumn = r#"{"name":"Bound Content", "type":"string", "jsonPath":".status.boundContentName"}"#,
    printcolumn = r#"{"name":"Storage Type", "type":"string", "jsonPath":".status.storageType"}"#,
    printcolumn = r#"{"name":"Protocol", "type":"string", "jsonPath":".status.protocol"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageBackendClaimSpec {
    /// Names the provider driver that should register this backend.
    pub provider: String,
    /// `<namespace>/<name>` reference to a ConfigMap holding non-secret provider config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<NamespacedRef>,
    /// `<namespace>/<name>` reference to a Secret holding provider credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<NamespacedRef>,
    /// Optional string-encoded integer; max client threads against the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_client_threads: Option<String>,
    /// Whether to use a TLS client certificate against the provider.
    #[serde(default)]
    pub use_cert: bool,
    /// `<namespace>/<name>` reference to a Secret holding the TLS client cert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_secret_ref: Option<NamespacedRef>,
    /// Free-form provider parameters.
    #[serde(default)]
    pub parameters: Parameters,
}

impl StorageBackendClaimSpec {
    /// Fields that remain mutable once the Claim is Bound (spec.md §3).
    pub fn mutable_fields_differ(&self, other: &StorageBackendClaimSpec) -> bool {
        self.secret_ref != other.secret_ref
            || self.max_client_threads != other.max_client_threads
            || self.use_cert != other.use_cert
            || self.cert_secret_ref != other.cert_secret_ref
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageBackendClaimStatus {
    #[serde(default)]
    pub phase: BackendClaimPhase,
    #[serde(default)]
    pub bound_content_name: String,
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
    pub storage_backend_id: String,
    #[serde(default)]
    pub storage_type: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub metro_backend: bool,
}

impl StorageBackendClaimStatus {
    pub fn mirror_mutable_fields(&mut self, spec: &StorageBackendClaimSpec) {
        self.secret_ref = spec.secret_ref.clone();
        self.max_client_threads = spec.max_client_threads.clone();
        self.use_cert = spec.use_cert;
        self.cert_secret_ref = spec.cert_secret_ref.clone();
    }
}

/// Deterministic Content name derived from the Claim's UID (spec.md §3).
pub fn content_name_for_claim(claim_uid: &str) -> String {
    format!("content-{claim_uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StorageBackendClaimSpec {
        StorageBackendClaimSpec {
            provider: "vendor-a".to_string(),
            config_map_ref: Some(NamespacedRef::new("ns", "cm1")),
            secret_ref: Some(NamespacedRef::new("ns", "s1")),
            max_client_threads: Some("4".to_string()),
            use_cert: false,
            cert_secret_ref: None,
            parameters: Parameters::new(),
        }
    }

    #[test]
    fn content_name_is_deterministic() {
        assert_eq!(content_name_for_claim("abc-123"), "content-abc-123");
        assert_eq!(content_name_for_claim("abc-123"), content_name_for_claim("abc-123"));
    }

    #[test]
    fn mutable_fields_differ_ignores_provider_and_parameters() {
        let mut other = spec();
        other.provider = "vendor-b".to_string();
        assert!(!spec().mutable_fields_differ(&other));
    }

    #[test]
    fn mutable_fields_differ_detects_secret_rotation() {
        let mut other = spec();
        other.secret_ref = Some(NamespacedRef::new("ns", "s2"));
        assert!(spec().mutable_fields_differ(&other));
    }

    #[test]
    fn mirror_mutable_fields_copies_from_spec() {
        let mut status = StorageBackendClaimStatus::default();
        status.mirror_mutable_fields(&spec());
        assert_eq!(status.secret_ref, spec().secret_ref);
        assert_eq!(status.max_client_threads, spec().max_client_threads);
    }
}
