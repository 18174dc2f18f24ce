//! Backend Reconciler — Claim Half (spec.md §4.5).

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};

use crate::crd::{
    content_name_for_claim, BackendClaimPhase, NamespacedRef, StorageBackendClaim,
    StorageBackendClaimSpec, StorageBackendClaimStatus, StorageBackendContent,
    StorageBackendContentSpec,
};
use crate::error::{Error, Result};
use crate::runtime::events::EventType;
use crate::runtime::finalizer;

use super::{split_key, Context};

/// Entry point invoked by the Claim work queue's workers.
pub async fn reconcile(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key).ok_or(Error::UnnamespacedObject)?;

    let claim = match ctx.claims.get(namespace, name) {
        Some(claim) => claim,
        None => return Ok(()), // already gone
    };

    if claim.meta().deletion_timestamp.is_some() {
        return delete_claim(ctx, &claim).await;
    }

    match reconcile_live(ctx, &claim).await {
        Ok(()) => Ok(()),
        Err(err) if !err.is_retriable() => {
            ctx.recorder
                .emit(&*claim, EventType::Warning, "CreatingFailed", err.to_string())
                .await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn reconcile_live(ctx: &Context, claim: &StorageBackendClaim) -> Result<()> {
    let api = ctx.claim_api(&claim.namespace().unwrap_or_default());

    // 1. SetClaimStatusPending
    let mut status = match &claim.status {
        Some(status) => status.clone(),
        None => {
            let initial = StorageBackendClaimStatus {
                phase: BackendClaimPhase::Pending,
                ..Default::default()
            };
            patch_status(&api, claim, &initial).await?;
            initial
        }
    };

    // 2. RemoveConfigmapFinalizer / RemoveSecretFinalizer
    release_stale_refs(ctx, claim, &status).await?;

    // 4/5. AddClaimFinalizers / CreateContent
    if status.bound_content_name.is_empty() {
        create_content(ctx, claim, &mut status).await?;
    } else {
        finalizer::add(
            &api,
            &claim.name_any(),
            finalizer::names::BACKEND_CLAIM_CONTENT_BINDING,
        )
        .await?;
    }

    // 6. UpdateClaimStatus
    update_claim_status_from_content(ctx, claim, &mut status).await?;

    // 7. UpdateClaim
    mirror_mutable_fields(ctx, claim, &mut status).await?;

    Ok(())
}

async fn patch_status(
    api: &Api<StorageBackendClaim>,
    claim: &StorageBackendClaim,
    status: &StorageBackendClaimStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &claim.name_any(),
        &PatchParams::apply("storage-control-plane"),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Drop the ConfigMap/Secret retention finalizer left over from a ref that
/// the Claim no longer points at, provided no peer Claim still uses it
/// (spec.md §4.5 step 2).
async fn release_stale_refs(
    ctx: &Context,
    claim: &StorageBackendClaim,
    status: &StorageBackendClaimStatus,
) -> Result<()> {
    let peers = ctx.claims.list();

    if let Some(old) = &status.config_map_ref {
        let still_used = peers
            .iter()
            .any(|peer| peer.uid() != claim.uid() && peer.spec.config_map_ref.as_ref() == Some(old));
        if claim.spec.config_map_ref.as_ref() != Some(old) && !still_used {
            release_configmap_finalizer(ctx, old).await?;
        }
    }
    if let Some(old) = &status.secret_ref {
        let still_used = peers
            .iter()
            .any(|peer| peer.uid() != claim.uid() && peer.spec.secret_ref.as_ref() == Some(old));
        if claim.spec.secret_ref.as_ref() != Some(old) && !still_used {
            release_secret_finalizer(ctx, old).await?;
        }
    }
    Ok(())
}

/// Drop the ConfigMap/Secret retention finalizers the Claim is currently
/// holding, provided no peer Claim still uses them (spec.md §4.5 step 2).
/// Unlike `release_stale_refs`, this runs unconditionally on the delete path
/// — `claim.spec` still equals `status` when a bound Claim is deleted, so
/// the "ref changed" guard there would never fire and the finalizer would
/// leak onto the ConfigMap/Secret forever.
async fn release_refs_on_delete(
    ctx: &Context,
    claim: &StorageBackendClaim,
    status: &StorageBackendClaimStatus,
) -> Result<()> {
    let peers = ctx.claims.list();

    if let Some(cm_ref) = &status.config_map_ref {
        let still_used = peers
            .iter()
            .any(|peer| peer.uid() != claim.uid() && peer.spec.config_map_ref.as_ref() == Some(cm_ref));
        if !still_used {
            release_configmap_finalizer(ctx, cm_ref).await?;
        }
    }
    if let Some(secret_ref) = &status.secret_ref {
        let still_used = peers
            .iter()
            .any(|peer| peer.uid() != claim.uid() && peer.spec.secret_ref.as_ref() == Some(secret_ref));
        if !still_used {
            release_secret_finalizer(ctx, secret_ref).await?;
        }
    }
    Ok(())
}

async fn release_configmap_finalizer(ctx: &Context, target: &NamespacedRef) -> Result<()> {
    let Some((ns, name)) = target.parse() else { return Ok(()) };
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
    match finalizer::remove(&api, name, finalizer::names::CONFIGMAP_RETENTION).await {
        Ok(()) => Ok(()),
        Err(Error::Kube(kube::Error::Api(e))) if e.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

async fn release_secret_finalizer(ctx: &Context, target: &NamespacedRef) -> Result<()> {
    let Some((ns, name)) = target.parse() else { return Ok(()) };
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    match finalizer::remove(&api, name, finalizer::names::SECRET_RETENTION).await {
        Ok(()) => Ok(()),
        Err(Error::Kube(kube::Error::Api(e))) if e.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

/// Validate the referenced ConfigMap/Secret exist, pin them with the
/// retention finalizer, then create the paired Content (spec.md §4.5 step 5).
async fn create_content(
    ctx: &Context,
    claim: &StorageBackendClaim,
    status: &mut StorageBackendClaimStatus,
) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();

    if let Some(cm_ref) = &claim.spec.config_map_ref {
        let Some((ns, name)) = cm_ref.parse() else {
            return Err(Error::Validation(format!("malformed configMapRef '{cm_ref}'")));
        };
        let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
        if api.get(name).await.is_err() {
            ctx.recorder
                .emit(
                    claim,
                    EventType::Warning,
                    "ErrorCheckConfigmap",
                    format!("configmap {cm_ref} not found"),
                )
                .await?;
            return Err(Error::ConfigMapNotFound(cm_ref.to_string()));
        }
        finalizer::add(&api, name, finalizer::names::CONFIGMAP_RETENTION).await?;
    }

    if let Some(secret_ref) = &claim.spec.secret_ref {
        let Some((ns, name)) = secret_ref.parse() else {
            return Err(Error::Validation(format!("malformed secretRef '{secret_ref}'")));
        };
        let api: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
        if api.get(name).await.is_err() {
            return Err(Error::SecretNotFound(secret_ref.to_string()));
        }
        finalizer::add(&api, name, finalizer::names::SECRET_RETENTION).await?;
    }

    ctx.recorder
        .emit(
            claim,
            EventType::Normal,
            "CreatingStorageBackend",
            "creating StorageBackendContent",
        )
        .await?;

    let content_name = content_name_for_claim(&claim.uid().unwrap_or_default());
    let content_api = ctx.content_api(&namespace);

    let desired = StorageBackendContent {
        metadata: kube::api::ObjectMeta {
            name: Some(content_name.clone()),
            namespace: Some(namespace.clone()),
            ..Default::default()
        },
        spec: StorageBackendContentSpec {
            provider: claim.spec.provider.clone(),
            config_map_ref: claim.spec.config_map_ref.clone(),
            secret_ref: claim.spec.secret_ref.clone(),
            max_client_threads: claim.spec.max_client_threads.clone(),
            use_cert: claim.spec.use_cert,
            cert_secret_ref: claim.spec.cert_secret_ref.clone(),
            parameters: claim.spec.parameters.clone(),
            backend_claim: NamespacedRef::new(&namespace, &claim.name_any()),
        },
        status: None,
    };

    match content_api
        .create(&kube::api::PostParams::default(), &desired)
        .await
    {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(err) => return Err(Error::Kube(err)),
    }

    let claim_api = ctx.claim_api(&namespace);
    finalizer::add(
        &claim_api,
        &claim.name_any(),
        finalizer::names::BACKEND_CLAIM_CONTENT_BINDING,
    )
    .await?;

    status.bound_content_name = content_name.clone();
    status.mirror_mutable_fields(&claim.spec);
    patch_status(&claim_api, claim, status).await?;

    ctx.recorder
        .emit(
            claim,
            EventType::Normal,
            "CreatedContent",
            format!("created StorageBackendContent {content_name}"),
        )
        .await?;

    Ok(())
}

/// Once the paired Content reports `contentName`/`vendorName`, copy
/// storage-type metadata from the ConfigMap and flip the Claim to `Bound`
/// (spec.md §4.5 step 6).
async fn update_claim_status_from_content(
    ctx: &Context,
    claim: &StorageBackendClaim,
    status: &mut StorageBackendClaimStatus,
) -> Result<()> {
    if status.bound_content_name.is_empty() {
        return Ok(());
    }
    let namespace = claim.namespace().unwrap_or_default();
    let Some(content) = ctx.contents.get(&namespace, &status.bound_content_name) else {
        return Ok(());
    };
    let Some(content_status) = &content.status else {
        return Ok(());
    };
    if content_status.content_name.is_empty() || content_status.vendor_name.is_empty() {
        return Ok(());
    }
    if matches!(status.phase, BackendClaimPhase::Bound) {
        return Ok(());
    }

    let mut storage_type = String::new();
    if let Some(cm_ref) = &claim.spec.config_map_ref {
        if let Some((ns, name)) = cm_ref.parse() {
            let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), ns);
            if let Ok(cm) = api.get(name).await {
                if let Some(data) = &cm.data {
                    storage_type = data.get("storageType").cloned().unwrap_or_default();
                    status.protocol = data.get("protocol").cloned().unwrap_or_default();
                    status.metro_backend = data
                        .get("hyperMetro")
                        .map(|v| v == "true")
                        .unwrap_or(false);
                }
            }
        }
    }
    status.storage_type = storage_type;
    status.storage_backend_id = content_status.content_name.clone();
    status.phase = BackendClaimPhase::Bound;

    let api = ctx.claim_api(&namespace);
    patch_status(&api, claim, status).await?;
    ctx.recorder
        .emit(claim, EventType::Normal, "UpdateStatus", "claim bound")
        .await?;
    Ok(())
}

/// When the Claim's mutable fields (secret/threads/cert) differ from what
/// status last mirrored, push the change into the Content spec
/// (spec.md §4.5 step 7).
async fn mirror_mutable_fields(
    ctx: &Context,
    claim: &StorageBackendClaim,
    status: &mut StorageBackendClaimStatus,
) -> Result<()> {
    if !matches!(status.phase, BackendClaimPhase::Bound) || status.bound_content_name.is_empty() {
        return Ok(());
    }
    let mirrored = StorageBackendClaimSpec {
        provider: claim.spec.provider.clone(),
        config_map_ref: status.config_map_ref.clone(),
        secret_ref: status.secret_ref.clone(),
        max_client_threads: status.max_client_threads.clone(),
        use_cert: status.use_cert,
        cert_secret_ref: status.cert_secret_ref.clone(),
        parameters: claim.spec.parameters.clone(),
    };
    if !claim.spec.mutable_fields_differ(&mirrored) {
        return Ok(());
    }

    let namespace = claim.namespace().unwrap_or_default();
    let content_api = ctx.content_api(&namespace);
    let patch = serde_json::json!({
        "spec": {
            "secretRef": claim.spec.secret_ref,
            "maxClientThreads": claim.spec.max_client_threads,
            "useCert": claim.spec.use_cert,
            "certSecretRef": claim.spec.cert_secret_ref,
        }
    });
    content_api
        .patch(
            &status.bound_content_name,
            &PatchParams::apply("storage-control-plane"),
            &Patch::Merge(&patch),
        )
        .await?;

    status.mirror_mutable_fields(&claim.spec);
    let claim_api = ctx.claim_api(&namespace);
    patch_status(&claim_api, claim, status).await?;
    Ok(())
}

/// Delete the bound Content, then drop the Claim's own finalizer once the
/// Content is gone from both the informer and our internal cache
/// (spec.md §4.5 step 3).
async fn delete_claim(ctx: &Context, claim: &StorageBackendClaim) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let status = claim.status.clone().unwrap_or_default();

    if !status.bound_content_name.is_empty() {
        let content_api = ctx.content_api(&namespace);
        match content_api
            .delete(&status.bound_content_name, &kube::api::DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::Kube(e)),
        }
        if ctx.contents.get(&namespace, &status.bound_content_name).is_some() {
            // still visible in the informer cache; wait for the delete to land.
            return Ok(());
        }
    }

    let api = ctx.claim_api(&namespace);
    finalizer::remove(
        &api,
        &claim.name_any(),
        finalizer::names::BACKEND_CLAIM_CONTENT_BINDING,
    )
    .await?;

    release_refs_on_delete(ctx, claim, &status).await?;
    Ok(())
}
