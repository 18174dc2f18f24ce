//! Volume-Modify Reconciler — Content Half (spec.md §4.8).
//!
//! One `VolumeModifyContent` per affected `PersistentVolume`. The happy
//! path issues a single `ModifyVolume` RPC; the delete path either drops
//! the finalizer outright or, when annotated `reclaimPolicy=rollback`,
//! issues a reversed RPC first (spec.md §3 "Annotation `reclaimPolicy`").

use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};

use crate::crd::{self, ModifyPhase, ReclaimPolicy, VolumeModifyContent, VolumeModifyContentStatus};
use crate::error::{Error, Result};
use crate::runtime::events::EventType;
use crate::runtime::finalizer;

use super::{split_key, Context, UPDATE_RETRY_DELAY, UPDATE_RETRY_TIMES};

/// Entry point invoked by the Content work queue's workers.
pub async fn reconcile(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key).ok_or(Error::UnnamespacedObject)?;

    let content = match ctx.contents.get(namespace, name) {
        Some(content) => content,
        None => return Ok(()),
    };

    if content.meta().deletion_timestamp.is_some() {
        return delete_content(ctx, &content).await;
    }

    match reconcile_live(ctx, &content).await {
        Ok(()) => Ok(()),
        Err(err) if !err.is_retriable() => {
            ctx.recorder
                .emit(&*content, EventType::Warning, "CreatingFailed", err.to_string())
                .await?;
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn reconcile_live(ctx: &Context, content: &VolumeModifyContent) -> Result<()> {
    let namespace = content.namespace().unwrap_or_default();
    let api = ctx.content_api(&namespace);

    // 1. setContentPending
    let mut status = match &content.status {
        Some(status) => status.clone(),
        None => {
            let initial = VolumeModifyContentStatus {
                phase: Some(ModifyPhase::Pending),
                ..Default::default()
            };
            patch_status(&api, content, &initial).await?;
            initial
        }
    };

    // 2. preCreateContent
    crd::params::validate(&content.spec.parameters)?;

    // 3. setContentFinalizers
    finalizer::add(
        &api,
        &content.name_any(),
        finalizer::names::MODIFY_CONTENT_PROTECTION,
    )
    .await?;

    // 4. createContentStatus
    if matches!(status.phase, Some(ModifyPhase::Pending) | None) {
        status.phase = Some(ModifyPhase::Creating);
        status.started_at = Some(chrono::Utc::now().to_rfc3339());
        patch_status(&api, content, &status).await?;
    }

    // 5. callVolumeModify
    if matches!(status.phase, Some(ModifyPhase::Creating)) {
        call_volume_modify(ctx, content, &mut status).await?;
    }

    Ok(())
}

/// Invoke the provider RPC, then retry the status write up to
/// `UPDATE_RETRY_TIMES`; a non-transient failure (Content modified or
/// deleted out from under us) escalates to an on-provider rollback
/// (spec.md §4.8, §7 "Post-commit write failure").
async fn call_volume_modify(
    ctx: &Context,
    content: &VolumeModifyContent,
    status: &mut VolumeModifyContentStatus,
) -> Result<()> {
    ctx.driver
        .modify_volume(
            &content.spec.volume_handle,
            &content.spec.storage_class_parameters,
            &content.spec.parameters,
        )
        .await?;

    status.phase = Some(ModifyPhase::Completed);
    status.completed_at = Some(chrono::Utc::now().to_rfc3339());

    let namespace = content.namespace().unwrap_or_default();
    match write_status_with_retry(ctx, &namespace, content, status).await {
        Ok(()) => {
            ctx.recorder
                .emit(content, EventType::Normal, "ModifyVolumeCompleted", "ModifyVolume succeeded")
                .await?;
            Ok(())
        }
        Err(Error::ConcurrentModification) => {
            tracing::warn!(
                content = %content.name_any(),
                "status write failed after ModifyVolume committed, rolling back on provider"
            );
            let rollback_params = crd::params::rollback_parameters(&content.spec.parameters);
            ctx.driver
                .modify_volume(
                    &content.spec.volume_handle,
                    &content.spec.storage_class_parameters,
                    &rollback_params,
                )
                .await?;
            ctx.recorder
                .emit(
                    content,
                    EventType::Warning,
                    "ModifyVolumeStatusWriteFailed",
                    "ModifyVolume committed but status could not be recorded; rolled back on provider",
                )
                .await?;
            Err(Error::ConcurrentModification)
        }
        Err(err) => Err(err),
    }
}

/// Retry the status patch up to `UPDATE_RETRY_TIMES`, aborting early if a
/// fresh read shows the spec was mutated under us (spec.md §4.8 `canRetry`).
async fn write_status_with_retry(
    ctx: &Context,
    namespace: &str,
    content: &VolumeModifyContent,
    status: &VolumeModifyContentStatus,
) -> Result<()> {
    let api = ctx.content_api(namespace);
    for attempt in 0..UPDATE_RETRY_TIMES {
        match patch_status(&api, content, status).await {
            Ok(()) => return Ok(()),
            Err(Error::Kube(kube::Error::Api(e))) if e.code == 404 => {
                return Err(Error::ConcurrentModification);
            }
            Err(Error::Kube(kube::Error::Api(e))) if e.code == 409 => {
                let fresh = api.get(&content.name_any()).await?;
                if !content.spec.can_retry_against(&fresh.spec) {
                    return Err(Error::ConcurrentModification);
                }
                tracing::debug!(attempt, "status write conflict, retrying");
            }
            Err(err) => return Err(err),
        }
        tokio::time::sleep(UPDATE_RETRY_DELAY).await;
    }
    Err(Error::ConcurrentModification)
}

/// Drop the finalizer outright, or — when annotated `reclaimPolicy=rollback`
/// and the RPC had already committed — issue the reversed `ModifyVolume`
/// first (spec.md §4.8 delete pipeline).
async fn delete_content(ctx: &Context, content: &VolumeModifyContent) -> Result<()> {
    let namespace = content.namespace().unwrap_or_default();
    let policy = ReclaimPolicy::from_annotation(
        content.annotations().get(ReclaimPolicy::ANNOTATION_KEY).map(String::as_str),
    );
    let phase = content.status.as_ref().and_then(|s| s.phase);

    let needs_rollback = matches!(policy, ReclaimPolicy::Rollback)
        && matches!(phase, Some(ModifyPhase::Completed) | Some(ModifyPhase::Rollback));

    if needs_rollback {
        let api = ctx.content_api(&namespace);
        let mut status = content.status.clone().unwrap_or_default();
        status.phase = Some(ModifyPhase::Rollback);
        // Best-effort: the object is being deleted regardless of whether
        // this write lands.
        let _ = patch_status(&api, content, &status).await;

        let rollback_params = crd::params::rollback_parameters(&content.spec.parameters);
        ctx.driver
            .modify_volume(
                &content.spec.volume_handle,
                &content.spec.storage_class_parameters,
                &rollback_params,
            )
            .await?;
    }

    let api = ctx.content_api(&namespace);
    finalizer::remove(
        &api,
        &content.name_any(),
        finalizer::names::MODIFY_CONTENT_PROTECTION,
    )
    .await?;
    Ok(())
}

async fn patch_status(
    api: &Api<VolumeModifyContent>,
    content: &VolumeModifyContent,
    status: &VolumeModifyContentStatus,
) -> Result<()> {
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &content.name_any(),
        &PatchParams::apply("storage-control-plane"),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
