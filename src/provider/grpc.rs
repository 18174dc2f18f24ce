//! Tonic-backed implementation of [`ProviderDriver`](super::ProviderDriver)
//! over a Unix-domain-socket channel to the sidecar's driver process
//! (spec.md §6 "Environment").

use std::collections::BTreeMap;

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Request;
use tower::service_fn;

use crate::crd::{Parameters, Pool};
use crate::error::Result;

use super::{AddStorageBackendOutcome, BackendStats, ObjectMetaRef, ProviderDriver};

pub mod pb {
    tonic::include_proto!("storage.provider.v1");
}

use pb::storage_provider_driver_client::StorageProviderDriverClient;

pub struct GrpcProviderDriver {
    client: StorageProviderDriverClient<Channel>,
}

impl GrpcProviderDriver {
    /// Connect to the driver's Unix-domain socket at `socket_path`.
    pub async fn connect(socket_path: String) -> Result<Self> {
        // Dummy URI: the real channel is a UDS, routed through `connect_with_connector`.
        let channel = Endpoint::try_from("http://[::]:50051")
            .expect("static endpoint is valid")
            .connect_with_connector(service_fn(move |_: Uri| {
                let socket_path = socket_path.clone();
                async move {
                    Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(
                        tokio::net::UnixStream::connect(socket_path).await?,
                    ))
                }
            }))
            .await
            .map_err(|e| crate::error::Error::Config(format!("failed to connect to driver: {e}")))?;

        Ok(Self {
            client: StorageProviderDriverClient::new(channel),
        })
    }
}

fn to_pb_meta(meta: Option<&ObjectMetaRef>) -> (String, String) {
    meta.map(|m| (m.namespace.clone(), m.name.clone()))
        .unwrap_or_default()
}

#[async_trait]
impl ProviderDriver for GrpcProviderDriver {
    async fn add_storage_backend(
        &self,
        claim_key: &str,
        config_map: Option<&ObjectMetaRef>,
        secret: Option<&ObjectMetaRef>,
        parameters: &Parameters,
    ) -> Result<AddStorageBackendOutcome> {
        let (cm_ns, cm_name) = to_pb_meta(config_map);
        let (s_ns, s_name) = to_pb_meta(secret);
        let req = Request::new(pb::AddStorageBackendRequest {
            claim_key: claim_key.to_string(),
            configmap_meta: Some(pb::ObjectMeta {
                config_map_namespace: cm_ns,
                config_map_name: cm_name,
                secret_namespace: String::new(),
                secret_name: String::new(),
            }),
            secret_meta: Some(pb::ObjectMeta {
                config_map_namespace: String::new(),
                config_map_name: String::new(),
                secret_namespace: s_ns,
                secret_name: s_name,
            }),
            parameters: parameters.clone().into_iter().collect(),
        });
        let resp = self.client.clone().add_storage_backend(req).await?.into_inner();
        Ok(AddStorageBackendOutcome {
            provider_name: resp.provider_name,
            backend_id: resp.backend_id,
        })
    }

    async fn remove_storage_backend(&self, claim_key: &str) -> Result<()> {
        let req = Request::new(pb::RemoveStorageBackendRequest {
            claim_key: claim_key.to_string(),
        });
        match self.client.clone().remove_storage_backend(req).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(()),
            Err(status) => Err(status.into()),
        }
    }

    async fn update_storage_backend(
        &self,
        backend_id: &str,
        secret: Option<&ObjectMetaRef>,
        max_client_threads: Option<&str>,
        use_cert: bool,
        cert_secret: Option<&ObjectMetaRef>,
    ) -> Result<()> {
        let (s_ns, s_name) = to_pb_meta(secret);
        let (cs_ns, cs_name) = to_pb_meta(cert_secret);
        let req = Request::new(pb::UpdateStorageBackendRequest {
            backend_id: backend_id.to_string(),
            secret_namespace: s_ns,
            secret_name: s_name,
            max_client_threads: max_client_threads.unwrap_or_default().to_string(),
            use_cert,
            cert_secret_namespace: cs_ns,
            cert_secret_name: cs_name,
        });
        self.client.clone().update_storage_backend(req).await?;
        Ok(())
    }

    async fn get_storage_backend_stats(
        &self,
        content_name: &str,
        claim_key: &str,
    ) -> Result<BackendStats> {
        let req = Request::new(pb::GetStorageBackendStatsRequest {
            content_name: content_name.to_string(),
            claim_key: claim_key.to_string(),
        });
        let resp = self
            .client
            .clone()
            .get_storage_backend_stats(req)
            .await?
            .into_inner();

        Ok(BackendStats {
            vendor_name: resp.vendor_name,
            provider_version: resp.provider_version,
            online: resp.online,
            sn: resp.sn,
            capacity: resp.capacity.into_iter().collect::<BTreeMap<_, _>>(),
            capabilities: resp.capabilities.into_iter().collect::<BTreeMap<_, _>>(),
            specification: resp.specification.into_iter().collect::<BTreeMap<_, _>>(),
            pools: resp
                .pools
                .into_iter()
                .map(|p| Pool {
                    name: p.name,
                    capacities: p.capacities.into_iter().collect(),
                })
                .collect(),
        })
    }

    async fn modify_volume(
        &self,
        volume_id: &str,
        storage_class_parameters: &Parameters,
        mutable_parameters: &Parameters,
    ) -> Result<()> {
        let req = Request::new(pb::ModifyVolumeRequest {
            volume_id: volume_id.to_string(),
            storage_class_parameters: storage_class_parameters.clone().into_iter().collect(),
            mutable_parameters: mutable_parameters.clone().into_iter().collect(),
        });
        self.client.clone().modify_volume(req).await?;
        Ok(())
    }
}
