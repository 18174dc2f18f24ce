//! Shared value types used across the four CRDs.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A `<namespace>/<name>` reference into another API object, or into an
/// external key-value store (ConfigMap/Secret). Kept as a newtype rather
/// than a bare `String` so the "bare name vs `namespace/name`" ambiguity
/// spec.md's open question calls out can't silently leak between the two
/// conventions it's used for.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NamespacedRef(pub String);

impl NamespacedRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}/{name}"))
    }

    pub fn parse(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NamespacedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-form parameter map carried by claims/contents.
pub type Parameters = BTreeMap<String, String>;

/// Phase of a `StorageBackendClaim` (spec.md §3).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum BackendClaimPhase {
    #[default]
    Pending,
    Bound,
    Unavailable,
}

/// Phase of a `VolumeModifyClaim`/`VolumeModifyContent` (spec.md §3, §4.7, §4.8).
///
/// The Claim's phase additionally allows the empty string as "unset"; we model
/// that as `Option<ModifyPhase>` at the call sites rather than growing a
/// redundant variant here.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ModifyPhase {
    Pending,
    Creating,
    Completed,
    Rollback,
    Deleting,
}

impl std::fmt::Display for ModifyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModifyPhase::Pending => write!(f, "Pending"),
            ModifyPhase::Creating => write!(f, "Creating"),
            ModifyPhase::Completed => write!(f, "Completed"),
            ModifyPhase::Rollback => write!(f, "Rollback"),
            ModifyPhase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// `reclaimPolicy` annotation on a `VolumeModifyContent` (spec.md §3).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Rollback,
}

impl ReclaimPolicy {
    pub const ANNOTATION_KEY: &'static str = "storage.example.io/reclaim-policy";

    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("rollback") => ReclaimPolicy::Rollback,
            _ => ReclaimPolicy::Delete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReclaimPolicy::Delete => "delete",
            ReclaimPolicy::Rollback => "rollback",
        }
    }
}

/// One pool reported by the provider driver's `GetStorageBackendStats` RPC
/// (spec.md §3 `StorageBackendContent.status.pools`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    pub capacities: BTreeMap<String, String>,
}

/// Entry recorded by a `VolumeModifyClaim` for each fanned-out Content
/// (spec.md §3 `status.contents`).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ModifyContentRef {
    pub modify_content_name: String,
    pub source_volume: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ModifyPhase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_ref_round_trips_through_parse() {
        let r = NamespacedRef::new("ns1", "name1");
        assert_eq!(r.to_string(), "ns1/name1");
        assert_eq!(r.parse(), Some(("ns1", "name1")));
    }

    #[test]
    fn namespaced_ref_parse_rejects_bare_name() {
        let r = NamespacedRef("bare-name".to_string());
        assert_eq!(r.parse(), None);
    }

    #[test]
    fn namespaced_ref_default_is_empty() {
        assert!(NamespacedRef::default().is_empty());
    }

    #[test]
    fn reclaim_policy_defaults_to_delete_on_unknown_annotation() {
        assert_eq!(ReclaimPolicy::from_annotation(None), ReclaimPolicy::Delete);
        assert_eq!(ReclaimPolicy::from_annotation(Some("bogus")), ReclaimPolicy::Delete);
        assert_eq!(ReclaimPolicy::from_annotation(Some("rollback")), ReclaimPolicy::Rollback);
    }

    #[test]
    fn backend_claim_phase_defaults_to_pending() {
        assert_eq!(BackendClaimPhase::default(), BackendClaimPhase::Pending);
    }
}
