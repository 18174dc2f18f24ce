//! `VolumeModifyClaim` — bulk "modify every PV bound to storage class X" request (spec.md §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ModifyContentRef, ModifyPhase, Parameters};

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModifySource {
    /// Always `"StorageClass"` today; kept as a string so the API rejects
    /// unknown kinds with a clear validation error rather than a parse error.
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, CustomResource)]
#[kube(
    group = "storage.example.io",
    version = "v1",
    kind = "VolumeModifyClaim",
    shortname = "vmc",
    namespaced,
    status = "VolumeModifyClaimStatus",
    printcolumn = r#"{"name":"Source", "type":"string", "jsonPath":".spec.source.name"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeModifyClaimSpec {
    pub source: ModifySource,
    pub parameters: Parameters,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeModifyClaimStatus {
    /// `""` means unset; spec.md §3 treats the empty string as a distinct,
    /// pre-`Pending` state rather than folding it into `ModifyPhase`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ModifyPhase>,
    #[serde(default)]
    pub ready: String,
    #[serde(default)]
    pub contents: Vec<ModifyContentRef>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl VolumeModifyClaimStatus {
    pub fn ready_string(done: usize, total: usize) -> String {
        format!("{done}/{total}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_string_formats_done_over_total() {
        assert_eq!(VolumeModifyClaimStatus::ready_string(0, 0), "0/0");
        assert_eq!(VolumeModifyClaimStatus::ready_string(2, 3), "2/3");
    }
}
