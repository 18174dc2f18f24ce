//! Class-Swap Protocol (spec.md §4.9).
//!
//! Triggered once every fanned-out `VolumeModifyContent` reaches
//! `Completed`. Storage-class parameters are immutable in the orchestrator,
//! so absorbing the modified parameters requires a destructive
//! delete-and-recreate, bracketed by a backup so a crash mid-swap can't
//! leave the cluster without a matching storage class.

use std::collections::BTreeMap;

use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::ResourceExt;
use serde_json::{json, Map};

use crate::crd::{Parameters, VolumeModifyClaim};
use crate::error::{Error, Result};
use crate::runtime::events::EventType;
use crate::runtime::task_flow::{Step, TaskFlow};

use super::Context;

/// Deterministic backup name (spec.md §4.9 step 2): recovering from a crash
/// mid-swap means finding this name again, so it must never depend on
/// anything but the two inputs already on hand at resume time.
pub fn backup_name(orig_name: &str, claim_name: &str) -> String {
    format!("{orig_name}-{claim_name}")
}

fn parameters_superset(have: &Option<BTreeMap<String, String>>, want: &Parameters) -> bool {
    let have = have.clone().unwrap_or_default();
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

fn strip_for_recreate(sc: &StorageClass) -> StorageClass {
    let mut sc = sc.clone();
    sc.metadata = ObjectMeta {
        name: sc.metadata.name,
        ..Default::default()
    };
    sc
}

/// Run the class-swap protocol on behalf of `claim`. A no-op if
/// `orig_name`'s current parameters already contain every key/value in
/// `claim.status.parameters`. Events are recorded against `claim` since the
/// `StorageClass` itself carries no event stream of its own in practice.
pub async fn run(
    ctx: &Context,
    claim: &VolumeModifyClaim,
    orig_name: &str,
    desired_parameters: &Parameters,
) -> Result<()> {
    // Two VolumeModifyClaims can legally target the same storage class
    // (spec.md §6 "a single ConfigMap is used as a coarse cross-controller
    // advisory lock ... e.g. a shared storage class"); serialize the swap
    // itself so a second claim can't delete the original out from under the
    // first claim's in-flight backup/recreate sequence.
    ctx.lock.acquire(orig_name).await?;
    let result = run_locked(ctx, claim, orig_name, desired_parameters).await;
    if let Err(err) = ctx.lock.release(orig_name).await {
        tracing::warn!(storage_class = %orig_name, error = %err, "failed to release class-swap advisory lock");
    }
    result
}

async fn run_locked(
    ctx: &Context,
    claim: &VolumeModifyClaim,
    orig_name: &str,
    desired_parameters: &Parameters,
) -> Result<()> {
    let api = ctx.storage_class_api();
    let claim_name = claim.name_any();
    let backup = backup_name(orig_name, &claim_name);

    // Step 1 (load current storage class, spec.md §4.9): if the original is
    // missing we may be resuming a crashed swap (steps 2-4 already ran) —
    // fall back to the backup as the source of truth.
    let current = match api.get(orig_name).await {
        Ok(sc) => sc,
        Err(kube::Error::Api(e)) if e.code == 404 => match api.get(&backup).await {
            Ok(sc) => sc,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::StorageClassNotFound(orig_name.to_string()))
            }
            Err(e) => return Err(Error::Kube(e)),
        },
        Err(e) => return Err(Error::Kube(e)),
    };

    if parameters_superset(&current.parameters, desired_parameters) {
        return Ok(());
    }

    let merged_parameters = {
        let mut merged = current.parameters.clone().unwrap_or_default();
        merged.extend(desired_parameters.clone());
        merged
    };

    let flow = build_flow(orig_name, &backup, &current, merged_parameters);

    let mut params = Map::new();
    params.insert("origName".into(), json!(orig_name));
    let result = flow.run(ctx, params).await?;

    if result.get("backupCleanupFailed").is_some() {
        ctx.recorder
            .emit(
                claim,
                EventType::Warning,
                "ClassSwapBackupCleanupFailed",
                format!("backup storage class {backup} could not be deleted after the swap"),
            )
            .await?;
    }

    ctx.recorder
        .emit(
            claim,
            EventType::Normal,
            "ClassSwapCompleted",
            format!("storage class {orig_name} parameters merged"),
        )
        .await?;
    Ok(())
}

/// Context shared by every step closure: the two fixed names plus, for the
/// final best-effort cleanup, the claim to attribute a warning event to on
/// failure.
struct SwapPlan {
    backup_sc: StorageClass,
    fresh_sc: StorageClass,
    orig_name: String,
    backup_name: String,
}

fn build_flow(
    orig_name: &str,
    backup_name: &str,
    current: &StorageClass,
    merged_parameters: BTreeMap<String, String>,
) -> TaskFlow<Context> {
    let mut backup_sc = strip_for_recreate(current);
    backup_sc.metadata.name = Some(backup_name.to_string());

    let mut fresh_sc = strip_for_recreate(current);
    fresh_sc.metadata.name = Some(orig_name.to_string());
    fresh_sc.parameters = Some(merged_parameters);

    let plan = SwapPlan {
        backup_sc,
        fresh_sc,
        orig_name: orig_name.to_string(),
        backup_name: backup_name.to_string(),
    };

    let backup_sc_for_step = plan.backup_sc.clone();
    let step_create_backup = Step::new("createBackupStorageClass", move |ctx: &Context, _result| {
        let api = ctx.storage_class_api();
        let sc = backup_sc_for_step.clone();
        Box::pin(async move {
            match api.create(&PostParams::default(), &sc).await {
                Ok(_) => Ok(None),
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(None),
                Err(e) => Err(Error::Kube(e)),
            }
        })
    });

    let orig_name_for_delete = plan.orig_name.clone();
    let step_delete_original = Step::new("deleteOriginalStorageClass", move |ctx: &Context, _result| {
        let api = ctx.storage_class_api();
        let name = orig_name_for_delete.clone();
        Box::pin(async move {
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => Ok(None),
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
                Err(e) => Err(Error::Kube(e)),
            }
        })
    });

    let fresh_sc_for_step = plan.fresh_sc.clone();
    let step_create_fresh = Step::new("createMergedStorageClass", move |ctx: &Context, _result| {
        let api = ctx.storage_class_api();
        let sc = fresh_sc_for_step.clone();
        Box::pin(async move {
            match api.create(&PostParams::default(), &sc).await {
                Ok(_) => Ok(None),
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(None),
                Err(e) => Err(Error::Kube(e)),
            }
        })
    });

    let backup_name_for_step = plan.backup_name.clone();
    let step_delete_backup = Step::new("deleteBackupStorageClass", move |ctx: &Context, _result| {
        let api = ctx.storage_class_api();
        let name = backup_name_for_step.clone();
        Box::pin(async move {
            // Log-only (spec.md §9 open question, resolved in DESIGN.md: the
            // primary storage class is already correct by this point, so
            // this never fails the overall swap — it only surfaces a
            // warning event back to the caller).
            if let Err(err) = api.delete(&name, &DeleteParams::default()).await {
                if !matches!(&err, kube::Error::Api(e) if e.code == 404) {
                    tracing::warn!(backup = %name, error = %err, "failed to delete backup storage class");
                    return Ok(Some(json!({ "backupCleanupFailed": true })));
                }
            }
            Ok(None)
        })
    });

    TaskFlow::new(vec![
        step_create_backup,
        step_delete_original,
        step_create_fresh,
        step_delete_backup,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Parameters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn backup_name_is_deterministic() {
        assert_eq!(backup_name("sc1", "claim-a"), "sc1-claim-a");
        assert_eq!(backup_name("sc1", "claim-a"), backup_name("sc1", "claim-a"));
    }

    #[test]
    fn superset_check_passes_when_already_merged() {
        let have = Some(BTreeMap::from([("hyperMetro".to_string(), "true".to_string())]));
        assert!(parameters_superset(&have, &params(&[("hyperMetro", "true")])));
    }

    #[test]
    fn superset_check_fails_when_missing_key() {
        let have = Some(BTreeMap::new());
        assert!(!parameters_superset(&have, &params(&[("hyperMetro", "true")])));
    }
}
