//! Backend provider sidecar: the state machine that drives each
//! `StorageBackendContent` against the provider driver (spec.md §4.6).
//!
//! ```text
//! nil-status -> initContentStatus -> (not ready?)  -> createOnProvider -> getStats
//!                                  -> (creds changed?) -> updateOnProvider
//!                                  -> (steady)       -> getStats (periodic refresh)
//! ```
//! Deletion is driven separately by [`super::content::reconcile`] via
//! [`delete_on_provider`].

use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};

use crate::crd::{StorageBackendContent, StorageBackendContentStatus};
use crate::error::{Error, Result};
use crate::provider::ObjectMetaRef;

use super::Context;

fn object_meta_ref(r: &Option<crate::crd::NamespacedRef>) -> Option<ObjectMetaRef> {
    r.as_ref().and_then(|r| r.parse()).map(|(ns, name)| ObjectMetaRef {
        namespace: ns.to_string(),
        name: name.to_string(),
    })
}

/// Advance one `StorageBackendContent` one step (spec.md §4.6).
pub async fn reconcile(ctx: &Context, content: &StorageBackendContent) -> Result<()> {
    let namespace = content.namespace().unwrap_or_default();
    let mut status = content.status.clone().unwrap_or_default();

    if status.content_name.is_empty() {
        match create_on_provider(ctx, content).await {
            Ok(outcome) => {
                status.content_name = outcome.backend_id;
                status.mirror_credentials(&content.spec);
                patch_status(ctx, content, &status).await?;
            }
            Err(err) if err.is_authentication_failure() => {
                status.online = false;
                patch_status(ctx, content, &status).await?;
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        return get_stats(ctx, content, &mut status, &namespace).await;
    }

    if status.credentials_differ(&content.spec) {
        update_on_provider(ctx, content).await?;
        status.mirror_credentials(&content.spec);
        patch_status(ctx, content, &status).await?;
    }

    get_stats(ctx, content, &mut status, &namespace).await
}

async fn create_on_provider(
    ctx: &Context,
    content: &StorageBackendContent,
) -> Result<crate::provider::AddStorageBackendOutcome> {
    let claim_key = content.spec.backend_claim.to_string();
    ctx.driver
        .add_storage_backend(
            &claim_key,
            object_meta_ref(&content.spec.config_map_ref).as_ref(),
            object_meta_ref(&content.spec.secret_ref).as_ref(),
            &content.spec.parameters,
        )
        .await
}

async fn update_on_provider(ctx: &Context, content: &StorageBackendContent) -> Result<()> {
    ctx.driver
        .update_storage_backend(
            &content.status.as_ref().map(|s| s.content_name.clone()).unwrap_or_default(),
            object_meta_ref(&content.spec.secret_ref).as_ref(),
            content.spec.max_client_threads.as_deref(),
            content.spec.use_cert,
            object_meta_ref(&content.spec.cert_secret_ref).as_ref(),
        )
        .await
}

/// Refresh `status.{vendorName,providerVersion,online,sn,capabilities,
/// specification,pools}` from the driver, only writing when they actually
/// differ (spec.md §4.6 `getStats`).
async fn get_stats(
    ctx: &Context,
    content: &StorageBackendContent,
    status: &mut StorageBackendContentStatus,
    namespace: &str,
) -> Result<()> {
    let claim_key = content.spec.backend_claim.to_string();
    let stats = match ctx
        .driver
        .get_storage_backend_stats(&status.content_name, &claim_key)
        .await
    {
        Ok(stats) => stats,
        Err(err) if err.is_authentication_failure() => {
            let mut next = status.clone();
            next.online = false;
            if status.stats_differ(&next) {
                patch_status_in(ctx, namespace, &content.name_any(), &next).await?;
            }
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let mut next = status.clone();
    next.vendor_name = stats.vendor_name;
    next.provider_version = stats.provider_version;
    next.online = stats.online;
    next.sn = stats.sn;
    next.capacity = stats.capacity;
    next.capabilities = stats.capabilities;
    next.specification = stats.specification;
    next.pools = stats.pools;

    if status.stats_differ(&next) {
        patch_status_in(ctx, namespace, &content.name_any(), &next).await?;
    }
    Ok(())
}

/// Deprovision on the driver before the Content's finalizer is dropped
/// (spec.md §4.6 `deleteOnProvider`). Idempotent: a not-found response is
/// success.
pub async fn delete_on_provider(ctx: &Context, content: &StorageBackendContent) -> Result<()> {
    if content.status.as_ref().map(|s| s.content_name.is_empty()).unwrap_or(true) {
        return Ok(());
    }
    let claim_key = content.spec.backend_claim.to_string();
    ctx.driver.remove_storage_backend(&claim_key).await
}

async fn patch_status(
    ctx: &Context,
    content: &StorageBackendContent,
    status: &StorageBackendContentStatus,
) -> Result<()> {
    let namespace = content.namespace().unwrap_or_default();
    patch_status_in(ctx, &namespace, &content.name_any(), status).await
}

async fn patch_status_in(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &StorageBackendContentStatus,
) -> Result<()> {
    let api: Api<StorageBackendContent> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply("storage-control-plane"), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}
