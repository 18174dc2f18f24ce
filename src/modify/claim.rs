//! Volume-Modify Reconciler — Claim Half (spec.md §4.7).

use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};

use crate::crd::{
    self, ModifyContentRef, ModifyPhase, Parameters, ReclaimPolicy, VolumeModifyClaim,
    VolumeModifyClaimStatus, VolumeModifyContent, VolumeModifyContentSpec,
};
use crate::error::{Error, Result};
use crate::runtime::events::EventType;
use crate::runtime::finalizer;

use super::{classswap, split_key, Context, RECONCILE_CLAIM_STATUS_DELAY};

/// Entry point invoked by the Claim work queue's workers.
pub async fn reconcile(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key).ok_or(Error::UnnamespacedObject)?;

    let claim = match ctx.claims.get(namespace, name) {
        Some(claim) => claim,
        None => return Ok(()),
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

async fn reconcile_live(ctx: &Context, claim: &VolumeModifyClaim) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let api = ctx.claim_api(&namespace);

    // 1. setClaimPending
    let mut status = match &claim.status {
        Some(status) if status.phase.is_some() => status.clone(),
        _ => {
            let initial = VolumeModifyClaimStatus {
                phase: Some(ModifyPhase::Pending),
                ready: VolumeModifyClaimStatus::ready_string(0, 0),
                ..Default::default()
            };
            patch_status(&api, claim, &initial).await?;
            initial
        }
    };

    // 2. preCreateClaim
    if matches!(status.phase, Some(ModifyPhase::Pending)) {
        pre_create_claim(ctx, claim).await?;
    }

    // 3. setClaimFinalizers
    finalizer::add(
        &api,
        &claim.name_any(),
        finalizer::names::MODIFY_CLAIM_PROTECTION,
    )
    .await?;

    // 4. setClaimCreating
    if matches!(status.phase, Some(ModifyPhase::Pending)) {
        status.phase = Some(ModifyPhase::Creating);
        status.started_at = Some(chrono::Utc::now().to_rfc3339());
        patch_status(&api, claim, &status).await?;
    }

    // 5. createClaimStatus (fan-out)
    if matches!(status.phase, Some(ModifyPhase::Creating)) && status.contents.is_empty() {
        create_claim_status(ctx, claim, &mut status).await?;
    }

    // 6. waitClaimCompleted
    if matches!(status.phase, Some(ModifyPhase::Creating)) && !status.contents.is_empty() {
        wait_claim_completed(ctx, claim, &mut status).await?;
    }

    Ok(())
}

/// Validate `spec.source` and `spec.parameters` (spec.md §4.7 step 2).
async fn pre_create_claim(ctx: &Context, claim: &VolumeModifyClaim) -> Result<()> {
    if claim.spec.source.kind != "StorageClass" {
        return Err(Error::Validation(format!(
            "unsupported source.kind '{}': only StorageClass is supported",
            claim.spec.source.kind
        )));
    }
    crd::params::validate_storage_class_name(&claim.spec.source.name)?;

    let sc = ctx
        .storage_class_api()
        .get(&claim.spec.source.name)
        .await
        .map_err(|_| Error::StorageClassNotFound(claim.spec.source.name.clone()))?;

    let provisioner = sc.provisioner.clone();
    if provisioner != ctx.provisioner {
        return Err(Error::ProvisionerMismatch {
            expected: ctx.provisioner.clone(),
            found: provisioner,
        });
    }

    crd::params::validate(&claim.spec.parameters)?;
    Ok(())
}

/// List bound `PersistentVolume`s matching `spec.source.name`, create one
/// `VolumeModifyContent` per volume, and record them on the Claim's status
/// (spec.md §4.7 step 5).
async fn create_claim_status(
    ctx: &Context,
    claim: &VolumeModifyClaim,
    status: &mut VolumeModifyClaimStatus,
) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let claim_name = claim.name_any();

    let storage_class = ctx.storage_class_api().get(&claim.spec.source.name).await?;
    let storage_class_parameters: Parameters = storage_class.parameters.clone().unwrap_or_default();

    let matching_volumes: Vec<_> = ctx
        .volumes
        .list()
        .into_iter()
        .filter(|pv| {
            pv.spec
                .as_ref()
                .and_then(|s| s.storage_class_name.as_deref())
                == Some(claim.spec.source.name.as_str())
        })
        .filter(|pv| {
            pv.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                == Some("Bound")
        })
        .collect();

    let mut contents = Vec::new();
    for pv in &matching_volumes {
        let Some(spec) = &pv.spec else { continue };
        let Some(csi) = &spec.csi else { continue };
        if csi.volume_handle.is_empty() {
            continue;
        }
        let Some(claim_ref) = &spec.claim_ref else { continue };
        let (Some(pvc_namespace), Some(pvc_name), Some(pvc_uid)) =
            (&claim_ref.namespace, &claim_ref.name, &claim_ref.uid)
        else {
            continue;
        };

        let content_name = crd::modify_content_name(&claim_name, pvc_uid);
        let source_volume = format!("{pvc_namespace}/{pvc_name}");

        let desired = VolumeModifyContent {
            metadata: kube::api::ObjectMeta {
                name: Some(content_name.clone()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            spec: VolumeModifyContentSpec {
                volume_modify_claim_name: claim_name.clone(),
                volume_handle: csi.volume_handle.clone(),
                parameters: claim.spec.parameters.clone(),
                storage_class_parameters: storage_class_parameters.clone(),
                source_volume: source_volume.clone(),
            },
            status: None,
        };

        match ctx
            .content_api(&namespace)
            .create(&kube::api::PostParams::default(), &desired)
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(err) => return Err(Error::Kube(err)),
        }

        contents.push(ModifyContentRef {
            modify_content_name: content_name,
            source_volume,
            phase: None,
        });
    }

    status.contents = contents;
    status.parameters = claim.spec.parameters.clone();
    status.ready = VolumeModifyClaimStatus::ready_string(0, status.contents.len());

    let api = ctx.claim_api(&namespace);
    patch_status(&api, claim, status).await?;

    ctx.recorder
        .emit(
            claim,
            EventType::Normal,
            "FanOutStarted",
            format!("created {} VolumeModifyContent object(s)", status.contents.len()),
        )
        .await?;

    // Contents may already be steady by the time this patch lands; make sure
    // waitClaimCompleted runs at least once more.
    ctx.claim_queue.add_after(format!("{namespace}/{claim_name}"), RECONCILE_CLAIM_STATUS_DELAY);
    Ok(())
}

/// Refresh each Content's phase from cache; once all are `Completed`, run
/// the class-swap protocol and complete the Claim. Otherwise update the
/// `ready` counter and reschedule (spec.md §4.7 step 6).
async fn wait_claim_completed(
    ctx: &Context,
    claim: &VolumeModifyClaim,
    status: &mut VolumeModifyClaimStatus,
) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let mut completed = 0usize;
    let mut any_changed = false;

    for entry in status.contents.iter_mut() {
        let phase = ctx
            .contents
            .get(&namespace, &entry.modify_content_name)
            .and_then(|c| c.status.clone())
            .and_then(|s| s.phase);
        if phase != entry.phase {
            entry.phase = phase;
            any_changed = true;
        }
        if matches!(entry.phase, Some(ModifyPhase::Completed)) {
            completed += 1;
        }
    }

    let total = status.contents.len();
    status.ready = VolumeModifyClaimStatus::ready_string(completed, total);

    if completed == total && total > 0 {
        classswap::run(ctx, claim, &claim.spec.source.name, &status.parameters).await?;
        status.phase = Some(ModifyPhase::Completed);
        status.completed_at = Some(chrono::Utc::now().to_rfc3339());
        let api = ctx.claim_api(&namespace);
        patch_status(&api, claim, status).await?;
        ctx.recorder
            .emit(claim, EventType::Normal, "ModifyVolumeCompleted", "all volumes modified")
            .await?;
        return Ok(());
    }

    if any_changed {
        let api = ctx.claim_api(&namespace);
        patch_status(&api, claim, status).await?;
    }

    ctx.claim_queue.add_after(
        format!("{namespace}/{}", claim.name_any()),
        RECONCILE_CLAIM_STATUS_DELAY,
    );
    Ok(())
}

/// Delete pipeline (spec.md §4.7 delete): rollback if still `Creating`,
/// otherwise a plain delete; poll until no Contents remain, then drop the
/// Claim's own finalizer.
async fn delete_claim(ctx: &Context, claim: &VolumeModifyClaim) -> Result<()> {
    let namespace = claim.namespace().unwrap_or_default();
    let status = claim.status.clone().unwrap_or_default();
    let rolling_back = matches!(status.phase, Some(ModifyPhase::Creating));

    let target_phase = if rolling_back {
        ModifyPhase::Rollback
    } else {
        ModifyPhase::Deleting
    };

    if status.phase != Some(target_phase) {
        let mut next = status.clone();
        next.phase = Some(target_phase);
        let api = ctx.claim_api(&namespace);
        patch_status(&api, claim, &next).await?;
    }

    let content_api = ctx.content_api(&namespace);
    let mut any_remaining = false;
    for entry in &status.contents {
        let Some(content) = ctx.contents.get(&namespace, &entry.modify_content_name) else {
            continue;
        };
        any_remaining = true;
        if content.meta().deletion_timestamp.is_some() {
            continue;
        }
        if rolling_back {
            annotate_reclaim_policy(&content_api, &entry.modify_content_name, "rollback").await?;
        }
        match content_api
            .delete(&entry.modify_content_name, &kube::api::DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Error::Kube(e)),
        }
    }

    if any_remaining {
        return Ok(());
    }

    let api = ctx.claim_api(&namespace);
    finalizer::remove(
        &api,
        &claim.name_any(),
        finalizer::names::MODIFY_CLAIM_PROTECTION,
    )
    .await?;
    Ok(())
}

async fn annotate_reclaim_policy(
    api: &Api<VolumeModifyContent>,
    name: &str,
    policy: &str,
) -> Result<()> {
    let patch = serde_json::json!({
        "metadata": {
            "annotations": { ReclaimPolicy::ANNOTATION_KEY: policy }
        }
    });
    match api
        .patch(name, &PatchParams::apply("storage-control-plane"), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

async fn patch_status(
    api: &Api<VolumeModifyClaim>,
    claim: &VolumeModifyClaim,
    status: &VolumeModifyClaimStatus,
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
