//! `volume-modify-controller` — reconciles `VolumeModifyClaim`/`VolumeModifyContent`
//! and runs the class-swap protocol (spec.md §4.7, §4.8, §4.9).

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use kube_runtime::watcher;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

use storage_control_plane::config::{Config, LogFormat};
use storage_control_plane::crd::{VolumeModifyClaim, VolumeModifyContent};
use storage_control_plane::error::Result;
use storage_control_plane::modify::{self, claim, content};
use storage_control_plane::provider::grpc::GrpcProviderDriver;
use storage_control_plane::runtime::bridge;
use storage_control_plane::runtime::cache::CacheWriter;
use storage_control_plane::runtime::events::Recorder;
use storage_control_plane::runtime::leader::{run_with_leader_election, LeaderElectionConfig};
use storage_control_plane::runtime::lock::AdvisoryLock;
use storage_control_plane::runtime::queue::{spawn_workers, WorkQueue};
use storage_control_plane::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    if config.print_crd {
        print!("{}", serde_yaml::to_string(&VolumeModifyClaim::crd()).unwrap());
        println!("---");
        print!("{}", serde_yaml::to_string(&VolumeModifyContent::crd()).unwrap());
        return Ok(());
    }

    init_logging(config.log_format);

    let client = Client::try_default().await?;
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    #[cfg(feature = "healthz")]
    {
        let health_client = client.clone();
        let health_shutdown = shutdown.clone();
        let healthz_addr: std::net::SocketAddr = config
            .healthz_addr
            .parse()
            .expect("--healthz-addr must be a valid socket address");
        tokio::spawn(async move {
            if let Err(err) = storage_control_plane::healthz::run(healthz_addr, health_client, health_shutdown).await {
                tracing::error!(error = %err, "health server exited");
            }
        });
    }

    let election_config = LeaderElectionConfig::from_env(config.lease_name.clone(), config.namespace.clone());
    let election_shutdown = shutdown.clone();

    run_with_leader_election(client.clone(), election_config, election_shutdown, move || {
        let client = client.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        async move {
            if let Err(err) = run_controller(client, config, shutdown).await {
                tracing::error!(error = %err, "controller setup failed");
            }
        }
    })
    .await;

    telemetry::shutdown_telemetry();
    Ok(())
}

async fn run_controller(client: Client, config: Config, shutdown: CancellationToken) -> Result<()> {
    let claim_writer: CacheWriter<VolumeModifyClaim> = CacheWriter::new();
    let content_writer: CacheWriter<VolumeModifyContent> = CacheWriter::new();
    let volume_writer: CacheWriter<PersistentVolume> = CacheWriter::new();

    let claim_queue = WorkQueue::new("modify-claim", config.retry_interval_start, config.retry_interval_max, shutdown.clone());
    let content_queue = WorkQueue::new("modify-content", config.retry_interval_start, config.retry_interval_max, shutdown.clone());

    let driver = GrpcProviderDriver::connect(config.driver_endpoint.clone()).await?;
    let recorder = Recorder::new(client.clone(), "storage-control-plane");
    let lock = Arc::new(AdvisoryLock::new(client.clone(), &config.namespace));

    let ctx = modify::Context {
        client: client.clone(),
        claims: claim_writer.reader(),
        contents: content_writer.reader(),
        volumes: volume_writer.reader(),
        recorder,
        claim_queue: claim_queue.clone(),
        driver: Arc::new(driver),
        provisioner: config.provider.clone(),
        lock,
    };

    let claim_api: Api<VolumeModifyClaim> = Api::namespaced(client.clone(), &config.namespace);
    let content_api: Api<VolumeModifyContent> = Api::namespaced(client.clone(), &config.namespace);
    let volume_api: Api<PersistentVolume> = Api::all(client.clone());

    let claim_stream = watcher::watcher(claim_api, watcher::Config::default());
    let content_stream = watcher::watcher(content_api, watcher::Config::default());
    let volume_stream = watcher::watcher(volume_api, watcher::Config::default());

    tokio::spawn(bridge::run(claim_stream, claim_writer, claim_queue.clone()));

    // A Content's status change must make the Claim reconcile again without
    // a synchronous call between the two halves (spec.md §5 "Cross-object
    // ordering"): enqueue the owning Claim's key alongside the Content's own.
    let claim_queue_for_peer = claim_queue.clone();
    tokio::spawn(bridge::run_with_peer_enqueue(
        content_stream,
        content_writer,
        content_queue.clone(),
        claim_queue_for_peer,
        |content: &VolumeModifyContent| {
            let namespace = content.namespace().unwrap_or_default();
            if content.spec.volume_modify_claim_name.is_empty() {
                None
            } else {
                Some(format!("{namespace}/{}", content.spec.volume_modify_claim_name))
            }
        },
    ));

    // PersistentVolumes only feed the cache the fan-out step reads from;
    // they never drive a reconcile loop of their own.
    let pv_sink_queue = WorkQueue::new("modify-pv-sink", config.retry_interval_start, config.retry_interval_max, shutdown.clone());
    tokio::spawn(bridge::run(volume_stream, volume_writer, pv_sink_queue));

    let claim_ctx = ctx.clone();
    let claim_handles = spawn_workers(claim_queue, config.workers, "modify-claim", move |key: String| {
        let ctx = claim_ctx.clone();
        async move { claim::reconcile(&ctx, &key).await }
    });

    let content_ctx = ctx.clone();
    let content_handles = spawn_workers(content_queue, config.workers, "modify-content", move |key: String| {
        let ctx = content_ctx.clone();
        async move { content::reconcile(&ctx, &key).await }
    });

    shutdown.cancelled().await;
    for handle in claim_handles.into_iter().chain(content_handles) {
        handle.abort();
    }
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}

fn init_logging(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let otel_layer = telemetry::init_telemetry::<tracing_subscriber::Registry>();

    let registry = tracing_subscriber::registry().with(env_filter).with(otel_layer);

    match format {
        LogFormat::Json => {
            registry.with(tracing_subscriber::fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
    }
}
