//! C6 — Backend Reconciler: `StorageBackendClaim` <-> `StorageBackendContent`
//! (spec.md §4.5, §4.6).
//!
//! Split into a Claim half, a Content half, and a per-provider sidecar loop
//! that actually talks to the driver. All three share one `ObjectCache` pair
//! and one `Recorder`; each half owns its own `WorkQueue`.

pub mod claim;
pub mod content;
pub mod sidecar;

use std::sync::Arc;

use kube::{Api, Client};

use crate::crd::{StorageBackendClaim, StorageBackendContent};
use crate::provider::ProviderDriver;
use crate::runtime::cache::ObjectCache;
use crate::runtime::events::Recorder;

/// Shared, cloneable state threaded through every Backend reconcile call.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub claims: ObjectCache<StorageBackendClaim>,
    pub contents: ObjectCache<StorageBackendContent>,
    pub recorder: Recorder,
    pub driver: Arc<dyn ProviderDriver>,
    pub provider_name: String,
}

impl Context {
    pub fn claim_api(&self, namespace: &str) -> Api<StorageBackendClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn content_api(&self, namespace: &str) -> Api<StorageBackendContent> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Split a `<namespace>/<name>` work queue key.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}
