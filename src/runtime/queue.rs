//! C2 — Work Queue: a deduplicating, rate-limited queue of object keys
//! (spec.md §4.1, §5). Modeled on client-go's `workqueue.RateLimitingInterface`
//! shape: `add` dedups while an item is pending, `done` acks, `add_rate_limited`
//! nacks and reschedules with exponential backoff.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use dashmap::{DashMap, DashSet};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Inner<K> {
    dirty: Mutex<VecDeque<K>>,
    queued: DashSet<K>,
    processing: DashSet<K>,
    requeue_on_done: DashSet<K>,
    backoffs: DashMap<K, ExponentialBackoff>,
    last_resource_version: DashMap<String, String>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
    name: &'static str,
}

/// A per-kind work queue. Cloning shares the underlying state (cheap, `Arc`-backed).
#[derive(Clone)]
pub struct WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K>>,
    shutdown: CancellationToken,
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// `name` identifies this queue in the `work_queue_depth` metric
    /// (spec.md §5 scheduling model) — e.g. `"backend-claim"`.
    pub fn new(name: &'static str, base_delay: Duration, max_delay: Duration, shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                dirty: Mutex::new(VecDeque::new()),
                queued: DashSet::new(),
                processing: DashSet::new(),
                requeue_on_done: DashSet::new(),
                backoffs: DashMap::new(),
                last_resource_version: DashMap::new(),
                notify: Notify::new(),
                base_delay,
                max_delay,
                name,
            }),
            shutdown,
        }
    }

    #[cfg(feature = "metrics")]
    fn record_depth(&self) {
        crate::metrics::set_queue_depth(self.inner.name, self.inner.queued.len());
    }

    #[cfg(not(feature = "metrics"))]
    fn record_depth(&self) {}

    fn new_backoff(&self) -> ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(self.inner.base_delay)
            .with_max_interval(self.inner.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Enqueue `key`, or leave it alone if already pending. If `key` is
    /// currently being processed by a worker, it's marked for reprocessing
    /// once that worker calls `done`.
    pub fn add(&self, key: K) {
        if self.inner.processing.contains(&key) {
            self.inner.requeue_on_done.insert(key);
            return;
        }
        if !self.inner.queued.insert(key.clone()) {
            // already pending
            return;
        }
        self.inner.dirty.lock().unwrap().push_back(key);
        self.inner.notify.notify_one();
        self.record_depth();
    }

    /// Skip re-enqueueing a periodic-resync update event when the
    /// `resourceVersion` hasn't changed (spec.md §4.1).
    pub fn should_enqueue_on_update(&self, key: &str, resource_version: &str) -> bool {
        let changed = self
            .inner
            .last_resource_version
            .get(key)
            .map(|v| v.value() != resource_version)
            .unwrap_or(true);
        if changed {
            self.inner
                .last_resource_version
                .insert(key.to_string(), resource_version.to_string());
        }
        changed
    }

    /// Block until a key is available, marking it as "processing" (per-key
    /// serialization guarantee: a key is never returned twice concurrently).
    pub async fn get(&self) -> Option<K> {
        loop {
            if let Some(key) = self.inner.dirty.lock().unwrap().pop_front() {
                self.inner.queued.remove(&key);
                self.inner.processing.insert(key.clone());
                self.record_depth();
                return Some(key);
            }
            tokio::select! {
                _ = self.inner.notify.notified() => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    /// Ack: processing of `key` succeeded. Resets its backoff and, if `add`
    /// was called again while it was in flight, requeues it.
    pub fn done(&self, key: &K) {
        self.inner.processing.remove(key);
        self.inner.backoffs.remove(key);
        if self.inner.requeue_on_done.remove(key).is_some() {
            self.add(key.clone());
        }
    }

    /// Nack: reschedule `key` after the next exponential-backoff interval.
    pub fn add_rate_limited(&self, key: K) {
        self.inner.processing.remove(&key);
        let mut backoff = self
            .inner
            .backoffs
            .entry(key.clone())
            .or_insert_with(|| self.new_backoff())
            .clone();
        let delay = backoff.next_backoff().unwrap_or(self.inner.max_delay);
        self.inner.backoffs.insert(key.clone(), backoff);

        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => this.add(key),
                _ = this.shutdown.cancelled() => {}
            }
        });
    }

    /// Forget any accumulated backoff for `key` without acking it (used when
    /// a rollback completes and the key should be treated as fresh again).
    pub fn forget(&self, key: &K) {
        self.inner.backoffs.remove(key);
    }

    /// Re-enqueue `key` after a fixed `delay`, independent of the
    /// exponential-backoff schedule (spec.md §4.7 `waitClaimCompleted`'s
    /// `reconcileClaimStatusDelay` periodic poll).
    pub fn add_after(&self, key: K, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => this.add(key),
                _ = this.shutdown.cancelled() => {}
            }
        });
    }

    pub fn len(&self) -> usize {
        self.inner.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn `concurrency` workers pulling from `queue`, invoking `handler(key)`
/// for each; a transient error requeues with backoff, success acks
/// (spec.md §5 "Scheduling model"). `controller` labels the `reconcile_total`
/// metric; reconcile functions already fold non-retriable ("terminal")
/// failures into `Ok(())` after recording an event (spec.md §7), so the
/// `Ok`/`Err` split seen here is exactly `ok`/`retry`.
pub fn spawn_workers<K, F, Fut>(
    queue: WorkQueue<K>,
    concurrency: usize,
    controller: &'static str,
    handler: F,
) -> Vec<tokio::task::JoinHandle<()>>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Display + 'static,
    F: Fn(K) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = crate::error::Result<()>> + Send,
{
    (0..concurrency)
        .map(|worker_id| {
            let queue = queue.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    match handler(key.clone()).await {
                        Ok(()) => {
                            queue.done(&key);
                            #[cfg(feature = "metrics")]
                            crate::metrics::record_reconcile(controller, "ok");
                        }
                        Err(err) => {
                            tracing::warn!(worker_id, %key, error = %err, "reconcile failed, requeuing");
                            queue.add_rate_limited(key);
                            #[cfg(feature = "metrics")]
                            crate::metrics::record_reconcile(controller, "retry");
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<String> {
        WorkQueue::new(
            "test",
            Duration::from_millis(1),
            Duration::from_millis(50),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn dedups_while_pending() {
        let q = queue();
        q.add("a".to_string());
        q.add("a".to_string());
        assert_eq!(q.len(), 1);
        let got = q.get().await.unwrap();
        assert_eq!(got, "a");
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn requeues_when_added_during_processing() {
        let q = queue();
        q.add("a".to_string());
        let got = q.get().await.unwrap();
        // Add while "a" is being processed: must not jump the per-key
        // serialization guarantee, but must reprocess once done.
        q.add("a".to_string());
        q.done(&got);
        let got_again = q.get().await.unwrap();
        assert_eq!(got_again, "a");
    }

    #[tokio::test]
    async fn rate_limited_add_eventually_requeues() {
        let q = queue();
        q.add_rate_limited("a".to_string());
        let got = tokio::time::timeout(Duration::from_secs(1), q.get())
            .await
            .expect("requeue should happen within timeout");
        assert_eq!(got, Some("a".to_string()));
    }

    #[test]
    fn resource_version_dedup_skips_unchanged() {
        let q = queue();
        assert!(q.should_enqueue_on_update("ns/a", "100"));
        assert!(!q.should_enqueue_on_update("ns/a", "100"));
        assert!(q.should_enqueue_on_update("ns/a", "101"));
    }
}
