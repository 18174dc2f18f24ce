//! C1 — Object Cache: a read-only, in-memory mirror of API-server state,
//! populated by a single coalescing watch stream (spec.md §4.1).
//!
//! The watch/informer machinery itself is an explicit Non-goal (spec.md §1)
//! — we don't re-derive kube-rs's own watcher here, only the cache shape it
//! would otherwise hide from us. Modeled directly on
//! `kube_runtime::reflector::store::{Writer, Store}`: a `DashMap` keyed by
//! `<namespace>/<name>`, one writer fed by the watch stream, many cheap
//! `Clone`-able readers.

use std::sync::Arc;

use dashmap::DashMap;
use kube::{Resource, ResourceExt};
use kube_runtime::watcher;

fn key_of<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// The single writer for a cache of kind `K`. Owned by the task that
/// consumes the watch stream; never shared.
pub struct CacheWriter<K> {
    store: Arc<DashMap<String, Arc<K>>>,
}

impl<K: Resource + Clone + 'static> CacheWriter<K> {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
        }
    }

    pub fn reader(&self) -> ObjectCache<K> {
        ObjectCache {
            store: self.store.clone(),
        }
    }

    /// Apply one watch event, mirroring
    /// `kube_runtime::reflector::Writer::apply_watcher_event` (spec.md §4.1:
    /// add/update/delete each mutate the cache before the caller decides
    /// whether to enqueue).
    pub fn apply(&self, event: &watcher::Event<K>) {
        match event {
            watcher::Event::Applied(obj) => {
                self.store.insert(key_of(obj), Arc::new(obj.clone()));
            }
            watcher::Event::Deleted(obj) => {
                self.store.remove(&key_of(obj));
            }
            watcher::Event::Restarted(objs) => {
                let fresh: std::collections::HashSet<String> = objs.iter().map(key_of).collect();
                self.store.retain(|key, _| fresh.contains(key));
                for obj in objs {
                    self.store.insert(key_of(obj), Arc::new(obj.clone()));
                }
            }
        }
    }
}

/// Read-only handle onto a `CacheWriter`'s backing store.
#[derive(Clone)]
pub struct ObjectCache<K> {
    store: Arc<DashMap<String, Arc<K>>>,
}

impl<K: Clone> ObjectCache<K> {
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&format!("{namespace}/{name}")).map(|r| r.clone())
    }

    pub fn get_cluster_scoped(&self, name: &str) -> Option<Arc<K>> {
        self.store.get(&format!("/{name}")).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }
}

/// Format the conventional `<namespace>/<name>` key for any namespaced object.
pub fn object_key<K: Resource>(obj: &K) -> String {
    key_of(obj)
}
