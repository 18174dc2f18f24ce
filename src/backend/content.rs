//! Backend Reconciler — Content Half (spec.md §4.6).
//!
//! Owns the claim-binding finalizer; the provider-facing state machine
//! (init/create/update/delete against the driver) lives in [`super::sidecar`]
//! and is invoked from the same per-content reconcile call.

use kube::{Resource, ResourceExt};

use crate::error::{Error, Result};
use crate::runtime::finalizer;

use super::{sidecar, split_key, Context};

/// Entry point invoked by the Content work queue's workers.
pub async fn reconcile(ctx: &Context, key: &str) -> Result<()> {
    let (namespace, name) = split_key(key).ok_or(Error::UnnamespacedObject)?;

    let content = match ctx.contents.get(namespace, name) {
        Some(content) => content,
        None => return Ok(()),
    };

    // A sidecar only drives contents naming its own provider (spec.md §4.6
    // "The sidecar filters by `spec.provider`").
    if content.spec.provider != ctx.provider_name {
        return Ok(());
    }

    if content.meta().deletion_timestamp.is_some() {
        sidecar::delete_on_provider(ctx, &content).await?;
        let api = ctx.content_api(namespace);
        finalizer::remove(
            &api,
            &content.name_any(),
            finalizer::names::BACKEND_CONTENT_CLAIM_BINDING,
        )
        .await?;
        return Ok(());
    }

    let api = ctx.content_api(namespace);
    finalizer::add(
        &api,
        &content.name_any(),
        finalizer::names::BACKEND_CONTENT_CLAIM_BINDING,
    )
    .await?;

    sidecar::reconcile(ctx, &content).await
}
