//! Cross-controller advisory lock backed by a single ConfigMap (`rt-lock-cm`,
//! spec.md §6). Used where the Backend and Volume-Modify controllers must
//! not race on the same singleton resource (e.g. a shared storage class).
//! Keyed boolean entries, acquired via read-modify-write with 1s polling and
//! a 10 minute timeout.

use std::time::Duration;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};

use crate::error::{Error, Result};

pub const LOCK_CONFIGMAP_NAME: &str = "rt-lock-cm";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct AdvisoryLock {
    api: Api<ConfigMap>,
}

impl AdvisoryLock {
    pub fn new(client: kube::Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    async fn ensure_configmap(&self) -> Result<ConfigMap> {
        match self.api.get(LOCK_CONFIGMAP_NAME).await {
            Ok(cm) => Ok(cm),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let cm = ConfigMap {
                    metadata: kube::api::ObjectMeta {
                        name: Some(LOCK_CONFIGMAP_NAME.to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                match self.api.create(&PostParams::default(), &cm).await {
                    Ok(created) => Ok(created),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        Ok(self.api.get(LOCK_CONFIGMAP_NAME).await?)
                    }
                    Err(e) => Err(Error::Kube(e)),
                }
            }
            Err(e) => Err(Error::Kube(e)),
        }
    }

    /// Acquire `key`, polling every second up to a 10 minute timeout.
    pub async fn acquire(&self, key: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + ACQUIRE_TIMEOUT;
        loop {
            let cm = self.ensure_configmap().await?;
            let held = cm
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| v == "true")
                .unwrap_or(false);

            if !held {
                let patch = serde_json::json!({
                    "metadata": { "resourceVersion": cm.resource_version() },
                    "data": { key: "true" },
                });
                match self
                    .api
                    .patch(
                        LOCK_CONFIGMAP_NAME,
                        &PatchParams::default(),
                        &Patch::Merge(&patch),
                    )
                    .await
                {
                    Ok(_) => return Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        // someone else raced us; fall through to poll again
                    }
                    Err(e) => return Err(Error::Kube(e)),
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(Error::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Release `key`.
    pub async fn release(&self, key: &str) -> Result<()> {
        let patch = serde_json::json!({ "data": { key: "false" } });
        self.api
            .patch(
                LOCK_CONFIGMAP_NAME,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}
