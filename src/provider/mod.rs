//! C8 — Provider Driver Interface: an abstract gRPC client to the storage
//! vendor (spec.md §6). The REST client behind the concrete driver and its
//! URL/error-code table are treated as an opaque dependency (spec.md §1);
//! only this gRPC-facing contract is implemented here.

pub mod grpc;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::crd::Parameters;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct ObjectMetaRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, Default)]
pub struct AddStorageBackendOutcome {
    pub provider_name: String,
    pub backend_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct BackendStats {
    pub vendor_name: String,
    pub provider_version: String,
    pub online: bool,
    pub sn: String,
    pub capacity: BTreeMap<String, String>,
    pub capabilities: BTreeMap<String, bool>,
    pub specification: BTreeMap<String, String>,
    pub pools: Vec<crate::crd::Pool>,
}

/// The five RPCs spec.md §6 tables, as an object-safe trait so reconcilers
/// can be tested against a fake implementation.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    async fn add_storage_backend(
        &self,
        claim_key: &str,
        config_map: Option<&ObjectMetaRef>,
        secret: Option<&ObjectMetaRef>,
        parameters: &Parameters,
    ) -> Result<AddStorageBackendOutcome>;

    /// Idempotent; a not-found response from the provider counts as success
    /// (spec.md §6).
    async fn remove_storage_backend(&self, claim_key: &str) -> Result<()>;

    async fn update_storage_backend(
        &self,
        backend_id: &str,
        secret: Option<&ObjectMetaRef>,
        max_client_threads: Option<&str>,
        use_cert: bool,
        cert_secret: Option<&ObjectMetaRef>,
    ) -> Result<()>;

    async fn get_storage_backend_stats(
        &self,
        content_name: &str,
        claim_key: &str,
    ) -> Result<BackendStats>;

    /// Idempotent on `(volume_id, mutable_parameters)` (spec.md §6).
    async fn modify_volume(
        &self,
        volume_id: &str,
        storage_class_parameters: &Parameters,
        mutable_parameters: &Parameters,
    ) -> Result<()>;
}
