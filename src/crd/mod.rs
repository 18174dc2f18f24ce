//! Custom Resource Definitions for the storage control plane (spec.md §3).

mod backend_claim;
mod backend_content;
mod common;
mod modify_claim;
mod modify_content;
pub mod params;

pub use backend_claim::{
    content_name_for_claim, StorageBackendClaim, StorageBackendClaimSpec,
    StorageBackendClaimStatus,
};
pub use backend_content::{
    StorageBackendContent, StorageBackendContentSpec, StorageBackendContentStatus,
};
pub use common::{
    BackendClaimPhase, ModifyContentRef, ModifyPhase, NamespacedRef, Parameters, Pool,
    ReclaimPolicy,
};
pub use modify_claim::{
    ModifySource, VolumeModifyClaim, VolumeModifyClaimSpec, VolumeModifyClaimStatus,
};
pub use modify_content::{
    content_name as modify_content_name, VolumeModifyContent, VolumeModifyContentSpec,
    VolumeModifyContentStatus,
};
