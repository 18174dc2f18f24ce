//! Wires a watch stream into an [`ObjectCache`] writer and a [`WorkQueue`]:
//! every add/update/delete updates the cache and enqueues the object's key,
//! skipping re-enqueue on no-op resyncs (spec.md §4.1).

use futures::StreamExt;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;

use super::cache::{object_key, CacheWriter};
use super::queue::WorkQueue;

/// Drive `stream` until it ends or `shutdown` fires, updating `cache` and
/// `queue` for every event. Intended to run as its own `tokio::spawn`ed task.
pub async fn run<K>(
    mut stream: impl futures::Stream<Item = watcher::Result<watcher::Event<K>>> + Unpin,
    cache: CacheWriter<K>,
    queue: WorkQueue<String>,
) where
    K: Resource + Clone + 'static,
{
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                cache.apply(&event);
                match &event {
                    watcher::Event::Applied(obj) => {
                        let key = object_key(obj);
                        let resource_version = obj.resource_version().unwrap_or_default();
                        if queue.should_enqueue_on_update(&key, &resource_version) {
                            queue.add(key);
                        }
                    }
                    watcher::Event::Deleted(obj) => {
                        queue.add(object_key(obj));
                    }
                    watcher::Event::Restarted(objs) => {
                        for obj in objs {
                            queue.add(object_key(obj));
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "watch stream error, kube-rs will retry internally");
            }
        }
    }
}

/// Like [`run`], but additionally enqueues a peer object's key whenever an
/// event's `peer_key` extractor yields one — the one allowed channel for
/// cross-reconciler communication (spec.md §5 "Cross-object ordering": "the
/// mutation is made visible to the peer by enqueuing its key, not by
/// synchronous call").
pub async fn run_with_peer_enqueue<K, F>(
    mut stream: impl futures::Stream<Item = watcher::Result<watcher::Event<K>>> + Unpin,
    cache: CacheWriter<K>,
    queue: WorkQueue<String>,
    peer_queue: WorkQueue<String>,
    peer_key: F,
) where
    K: Resource + Clone + 'static,
    F: Fn(&K) -> Option<String>,
{
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                cache.apply(&event);
                match &event {
                    watcher::Event::Applied(obj) => {
                        let key = object_key(obj);
                        let resource_version = obj.resource_version().unwrap_or_default();
                        if queue.should_enqueue_on_update(&key, &resource_version) {
                            queue.add(key);
                        }
                        if let Some(peer) = peer_key(obj) {
                            peer_queue.add(peer);
                        }
                    }
                    watcher::Event::Deleted(obj) => {
                        queue.add(object_key(obj));
                        if let Some(peer) = peer_key(obj) {
                            peer_queue.add(peer);
                        }
                    }
                    watcher::Event::Restarted(objs) => {
                        for obj in objs {
                            queue.add(object_key(obj));
                            if let Some(peer) = peer_key(obj) {
                                peer_queue.add(peer);
                            }
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "watch stream error, kube-rs will retry internally");
            }
        }
    }
}
