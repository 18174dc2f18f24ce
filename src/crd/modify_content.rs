//! `VolumeModifyContent` — one per affected persistent volume (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ModifyPhase, Parameters};

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, CustomResource)]
#[kube(
    group = "storage.example.io",
    version = "v1",
    kind = "VolumeModifyContent",
    shortname = "vmco",
    namespaced,
    status = "VolumeModifyContentStatus",
    printcolumn = r#"{"name":"Claim", "type":"string", "jsonPath":".spec.volumeModifyClaimName"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeModifyContentSpec {
    pub volume_modify_claim_name: String,
    /// Opaque provider volume id (CSI `volumeHandle`).
    pub volume_handle: String,
    /// Copied verbatim from the Claim at creation time.
    pub parameters: Parameters,
    /// Snapshot of the storage class's parameters at creation time.
    pub storage_class_parameters: Parameters,
    /// `<namespace>/<name>` of the bound PersistentVolumeClaim this targets.
    pub source_volume: String,
}

impl VolumeModifyContentSpec {
    /// Whether `other` is safe to treat as a continuation of a reconcile that
    /// started against `self` (spec.md §4.8 `canRetry`). Spec is frozen after
    /// creation, so any field drift means the object was recreated or
    /// clobbered out from under us.
    pub fn can_retry_against(&self, fresh: &VolumeModifyContentSpec) -> bool {
        self.volume_handle == fresh.volume_handle
            && self.volume_modify_claim_name == fresh.volume_modify_claim_name
            && self.source_volume == fresh.source_volume
            && self.parameters == fresh.parameters
            && self.storage_class_parameters == fresh.storage_class_parameters
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeModifyContentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ModifyPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Deterministic, idempotent Content name (spec.md §3).
pub fn content_name(claim_name: &str, bound_pvc_uid: &str) -> String {
    format!("{claim_name}-{bound_pvc_uid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VolumeModifyContentSpec {
        VolumeModifyContentSpec {
            volume_modify_claim_name: "claim-a".to_string(),
            volume_handle: "vol-1".to_string(),
            parameters: Parameters::from([("hyperMetro".to_string(), "true".to_string())]),
            storage_class_parameters: Parameters::new(),
            source_volume: "ns/pvc-a".to_string(),
        }
    }

    #[test]
    fn content_name_is_deterministic_and_idempotent() {
        let a = content_name("claim-a", "uid-1");
        let b = content_name("claim-a", "uid-1");
        assert_eq!(a, b);
        assert_eq!(a, "claim-a-uid-1");
    }

    #[test]
    fn can_retry_against_identical_spec() {
        assert!(spec().can_retry_against(&spec()));
    }

    #[test]
    fn cannot_retry_when_volume_handle_changed() {
        let mut fresh = spec();
        fresh.volume_handle = "vol-2".to_string();
        assert!(!spec().can_retry_against(&fresh));
    }

    #[test]
    fn cannot_retry_when_parameters_changed() {
        let mut fresh = spec();
        fresh.parameters.insert("metroPairSyncSpeed".to_string(), "3".to_string());
        assert!(!spec().can_retry_against(&fresh));
    }
}
