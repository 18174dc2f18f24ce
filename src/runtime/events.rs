//! Kubernetes `Event` emission for reconciler state-machine transitions
//! (spec.md §4.5 "Observable side effects", SPEC_FULL.md §6).

use k8s_openapi::api::core::v1::{Event as KubeEvent, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta, Time};
use kube::api::PostParams;
use kube::{Api, Client, Resource, ResourceExt};

use crate::error::Result;

#[derive(Clone, Copy, Debug)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Emits `Event` objects referencing a reconciled resource, matching the
/// named events spec.md calls out: `CreatingStorageBackend`,
/// `CreatedContent`, `UpdateStatus`, `ErrorCheckConfigmap`, `CreatingFailed`,
/// `ClassSwapBackupCleanupFailed`.
#[derive(Clone)]
pub struct Recorder {
    client: Client,
    reporting_component: &'static str,
}

impl Recorder {
    pub fn new(client: Client, reporting_component: &'static str) -> Self {
        Self {
            client,
            reporting_component,
        }
    }

    pub async fn emit<K: Resource<DynamicType = ()>>(
        &self,
        obj: &K,
        event_type: EventType,
        reason: &str,
        message: impl Into<String>,
    ) -> Result<()> {
        let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<KubeEvent> = Api::namespaced(self.client.clone(), &namespace);
        let now = chrono::Utc::now();

        let event = KubeEvent {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", obj.name_any())),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(K::api_version(&()).to_string()),
                kind: Some(K::kind(&()).to_string()),
                name: Some(obj.name_any()),
                namespace: Some(namespace),
                uid: obj.uid(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            type_: Some(event_type.as_str().to_string()),
            source: Some(EventSource {
                component: Some(self.reporting_component.to_string()),
                ..Default::default()
            }),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            event_time: Some(MicroTime(now)),
            count: Some(1),
            ..Default::default()
        };

        api.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}
