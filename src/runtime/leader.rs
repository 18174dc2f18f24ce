//! C5 — Leader Election: a lease-backed mutual-exclusion so only one
//! replica reconciles (spec.md §4.4).
//!
//! Wraps `kube_leader_election::LeaseLock` (already a dependency of the
//! teacher's `main.rs`) in an acquire-or-renew polling loop, following the
//! pattern used by the other storage-operator examples in the pack: poll on
//! an interval well inside the lease TTL, start the controller task on
//! acquisition, abort it on loss. On loss of leadership the process signals
//! itself rather than merely stopping the controller task, so a wedged
//! renew loop can never leave two replicas believing they're leader
//! (spec.md §4.4, §7 "Leadership loss — terminal for the process").

use std::future::Future;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use tokio_util::sync::CancellationToken;

pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub namespace: String,
    pub holder_id: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaderElectionConfig {
    pub fn from_env(lease_name: String, namespace: String) -> Self {
        let holder_id = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "unknown-host".to_string())
            });
        Self {
            lease_name,
            namespace,
            holder_id,
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }
}

/// Run `on_started_leading` for as long as this replica holds the lease;
/// abort it the moment the lease is lost. Blocks until `shutdown` is
/// cancelled.
pub async fn run_with_leader_election<F, Fut>(
    client: Client,
    config: LeaderElectionConfig,
    shutdown: CancellationToken,
    on_started_leading: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let lock = LeaseLock::new(
        client,
        &config.namespace,
        LeaseLockParams {
            holder_id: config.holder_id.clone(),
            lease_name: config.lease_name.clone(),
            lease_ttl: config.lease_duration,
        },
    );

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(config.retry_period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                return;
            }
            _ = tick.tick() => {}
        }

        match lock.try_acquire_or_renew().await {
            Ok(LeaseLockResult::Acquired(_)) => {
                if controller_task.is_none() {
                    tracing::info!(holder = %config.holder_id, "acquired leadership");
                    controller_task = Some(tokio::spawn(on_started_leading()));
                }
            }
            Ok(_) => {
                if let Some(task) = controller_task.take() {
                    tracing::warn!("lost leadership, stopping reconciler and self-terminating");
                    task.abort();
                    terminate_self();
                    return;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "leader election renew/acquire failed");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    terminate_self();
                    return;
                }
            }
        }
    }
}

/// Send `SIGINT` to our own process (spec.md §4.4): preferred over a plain
/// `exit()` because it runs through the normal shutdown signal handler,
/// giving in-flight reconciles a chance to finish within
/// `provisionTimeout` before the process actually dies.
fn terminate_self() {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    if let Err(err) = signal::kill(Pid::this(), Signal::SIGINT) {
        tracing::error!(error = %err, "failed to signal self on leadership loss, exiting hard");
        std::process::exit(1);
    }
}
