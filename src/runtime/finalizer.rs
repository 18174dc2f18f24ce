//! C3 — Finalizer Manager: add/remove/contains primitives on an object's
//! finalizer list, with reload-and-retry on `ResourceExpired` (spec.md §4.2).
//!
//! Generalizes the single-finalizer `kube::runtime::finalizer()` helper
//! (which drives one Apply/Cleanup state machine end to end) into the
//! multi-site primitive API the spec requires: claim/content binding,
//! ConfigMap retention, Secret retention, and per-phase modify protection
//! each get their own finalizer constant through the same manager.

use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::{Error, Result};

/// Namespaces the four use-sites from spec.md §4.2.
pub mod names {
    pub const BACKEND_CLAIM_CONTENT_BINDING: &str = "storage.example.io/backend-content-binding";
    pub const BACKEND_CONTENT_CLAIM_BINDING: &str = "storage.example.io/backend-claim-binding";
    pub const CONFIGMAP_RETENTION: &str = "storage.example.io/configmap-in-use";
    pub const SECRET_RETENTION: &str = "storage.example.io/secret-in-use";
    pub const MODIFY_CLAIM_PROTECTION: &str = "storage.example.io/modify-claim-protection";
    pub const MODIFY_CONTENT_PROTECTION: &str = "storage.example.io/modify-content-protection";
}

pub fn contains<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add `finalizer` to `name`'s finalizer list if absent. Retries once on a
/// `ResourceExpired` ("object has been modified") conflict by reloading and
/// recomputing the patch (spec.md §4.2).
pub async fn add<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    mutate(api, name, |finalizers| {
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
        }
    })
    .await
}

/// Remove `finalizer` from `name`'s finalizer list if present.
pub async fn remove<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    mutate(api, name, |finalizers| {
        finalizers.retain(|f| f != finalizer);
    })
    .await
}

async fn mutate<K>(api: &Api<K>, name: &str, edit: impl Fn(&mut Vec<String>)) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let current = api.get(name).await?;
        let mut finalizers = current.finalizers().to_vec();
        let before = finalizers.clone();
        edit(&mut finalizers);
        if finalizers == before {
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": current.resource_version(),
                "finalizers": finalizers,
            }
        });

        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 && attempt < MAX_ATTEMPTS => {
                tracing::debug!(name, attempt, "resource expired while patching finalizers, retrying");
                continue;
            }
            Err(e) => return Err(Error::Kube(e)),
        }
    }
}
