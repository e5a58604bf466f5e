// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The broadcast server coordinator.
//!
//! [`Server`] ties together the surfaces and the fabric:
//! - HTTP + WebSocket surface (publish, read, unpublish, subscribe)
//! - storage adapters with one watcher channel per tier
//! - dispatcher workers turning change events into pool broadcasts
//! - the pool registry with its snapshot/patch cache
//!
//! # Example
//!
//! ```rust,no_run
//! use keycast::{Server, Config};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut server = Server::new(Config::default());
//! server.open_filter("room/*");
//! server.start().await.expect("start failed");
//! // ... serve until a signal arrives
//! server.wait_close().await;
//! # }
//! ```

mod dispatch;
mod lifecycle;
mod routes;
mod ws;

pub(crate) use dispatch::Tier;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::request::Parts;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::config::Config;
use crate::filters::{Apply, ApplyHook, FilterError, Filters};
use crate::key;
use crate::metrics;
use crate::storage::{Database, MemoryStorage, StorageError};
use crate::stream::{Cache, Conn, Pools, StreamError};

/// Request audit callback: approve or deny a request before it touches
/// storage or the stream fabric.
pub type Audit = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

/// Subscription monitor: returning an error aborts the subscription.
pub type OnSubscribe = Arc<dyn Fn(&str) -> Result<(), StreamError> + Send + Sync>;

/// Unsubscription monitor, best effort.
pub type OnUnsubscribe = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("server already active")]
    AlreadyActive,
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors of the write path, mapped to HTTP statuses by the surface.
#[derive(Error, Debug)]
pub(crate) enum WriteError {
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Shared state behind the surfaces, the dispatcher, and the lifecycle.
pub(crate) struct Core {
    pub(crate) config: Config,
    storage: RwLock<Arc<dyn Database>>,
    pub(crate) pools: Pools,
    pub(crate) filters: RwLock<Filters>,
    audit: RwLock<Audit>,
    on_subscribe: RwLock<OnSubscribe>,
    on_unsubscribe: RwLock<OnUnsubscribe>,
    active: AtomicBool,
    closing: AtomicBool,
    address: RwLock<Option<SocketAddr>>,
    pub(crate) shutdown: watch::Sender<bool>,
}

impl Core {
    fn new(config: Config) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            storage: RwLock::new(Arc::new(MemoryStorage::new())),
            pools: Pools::new(),
            filters: RwLock::new(Filters::default()),
            audit: RwLock::new(Arc::new(|_| true)),
            on_subscribe: RwLock::new(Arc::new(|_| Ok(()))),
            on_unsubscribe: RwLock::new(Arc::new(|_| {})),
            active: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            address: RwLock::new(None),
            shutdown,
        }
    }

    pub(crate) fn storage(&self) -> Arc<dyn Database> {
        self.storage.read().clone()
    }

    pub(crate) fn active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.closing.load(Ordering::Acquire)
    }

    pub(crate) fn audit_check(&self, parts: &Parts) -> bool {
        let audit = self.audit.read().clone();
        audit(parts)
    }

    pub(crate) fn subscribe_check(&self, key: &str) -> Result<(), StreamError> {
        let hook = self.on_subscribe.read().clone();
        hook(key)
    }

    /// Run the unsubscribe callback on a background task, best effort.
    pub(crate) fn notify_unsubscribe(&self, key: &str) {
        let hook = self.on_unsubscribe.read().clone();
        let key = key.to_string();
        tokio::spawn(async move { hook(&key) });
    }

    pub(crate) fn read_filter_check(
        &self,
        filter: &str,
        data: Vec<u8>,
    ) -> Result<Vec<u8>, FilterError> {
        self.filters
            .read()
            .read
            .check(filter, data, self.config.static_routes)
    }

    /// Raw value of `pattern` on the given tier: a JSON array for glob
    /// patterns, the stored bytes for literals, `{}` on absence.
    pub(crate) async fn raw_value(&self, pattern: &str, tier: Tier) -> Vec<u8> {
        let storage = self.storage();
        let result = match (tier, key::is_pattern(pattern)) {
            (Tier::Persistent, false) => storage.get(pattern).await,
            (Tier::Persistent, true) => storage.list(pattern).await,
            (Tier::Memory, false) => storage.mem_get(pattern).await,
            (Tier::Memory, true) => storage.mem_list(pattern).await,
        };
        match result {
            Ok(data) if !data.is_empty() => data,
            _ => b"{}".to_vec(),
        }
    }

    pub(crate) fn tier_of(&self, key: &str) -> Tier {
        if self.config.is_memory_key(key) {
            Tier::Memory
        } else {
            Tier::Persistent
        }
    }

    /// Cached, filtered value of `(key, filter)`. Falls back to storage on
    /// a cold pool and seeds the pool cache with the filtered bytes so the
    /// version sticks. The cache always holds post-filter bodies; it is
    /// the baseline the patch engine diffs against.
    pub(crate) async fn fetch(&self, key: &str, filter: &str) -> Result<Cache, FilterError> {
        if let Some(cache) = self.pools.cache(key, filter) {
            let data = self.read_filter_check(filter, cache.data)?;
            return Ok(Cache {
                data,
                version: cache.version,
            });
        }
        let raw = self.raw_value(key, self.tier_of(key)).await;
        let filtered = self.read_filter_check(filter, raw)?;
        Ok(self.pools.seed_cache(key, filter, filtered))
    }

    /// Apply the write filter and store `data` under `key` on its tier.
    /// The adapter announces the mutation on the tier's watcher.
    pub(crate) async fn publish(&self, key: &str, data: Vec<u8>) -> Result<(), WriteError> {
        let filtered = self
            .filters
            .read()
            .write
            .check(key, data, self.config.static_routes)?;
        match self.tier_of(key) {
            Tier::Persistent => self.storage().set(key, filtered).await?,
            Tier::Memory => self.storage().mem_set(key, filtered).await?,
        }
        Ok(())
    }

    /// Run the delete hook and remove `key` from its tier, then notify
    /// list-subscribers of the parent key.
    pub(crate) async fn unpublish(self: &Arc<Self>, key: &str) -> Result<(), WriteError> {
        self.filters
            .read()
            .delete
            .check(key, self.config.static_routes)?;
        let tier = self.tier_of(key);
        match tier {
            Tier::Persistent => self.storage().del(key).await?,
            Tier::Memory => self.storage().mem_del(key).await?,
        }

        let parent = key::parent(key);
        if !parent.is_empty() {
            let core = Arc::clone(self);
            let parent = parent.to_string();
            tokio::spawn(async move { core.broadcast(&parent, tier).await });
        }
        Ok(())
    }

    /// Fan a changed key out to every matching pool.
    pub(crate) async fn broadcast(&self, changed: &str, tier: Tier) {
        let indices = self.pools.matching(changed);
        metrics::record_broadcast(tier.as_str(), indices.len());
        for index in indices {
            self.broadcast_pool(index, tier).await;
        }
    }

    /// Read, filter, patch, and enqueue the frames for one pool.
    async fn broadcast_pool(&self, index: usize, tier: Tier) {
        let Some((pattern, filter)) = self.pools.target(index) else {
            return;
        };
        let raw = self.raw_value(&pattern, tier).await;
        let filtered = match self.read_filter_check(&filter, raw) {
            Ok(data) => data,
            Err(err) => {
                // static-mode refusal or a rejecting filter: skip this pool
                debug!(key = %pattern, error = %err, "broadcast suppressed");
                return;
            }
        };
        if let Some((outcome, version, fanout)) =
            self.pools.broadcast(index, filtered, self.config.force_patch)
        {
            debug!(
                key = %pattern,
                version,
                snapshot = outcome.snapshot,
                fanout,
                "pool broadcast"
            );
        }
    }

    /// Unregister a connection, fire the unsubscribe callback in the
    /// background, then close the transport. Idempotent.
    pub(crate) fn close_conn(&self, conn: &Arc<Conn>) {
        if self.pools.remove(conn) {
            self.notify_unsubscribe(conn.key());
            metrics::set_connections(self.pools.total_connections());
        }
        conn.close();
    }
}

/// The broadcast server.
///
/// Construct with [`Server::new`], register filters and callbacks, then
/// [`start`](Server::start). A `Server` is a handle over shared state;
/// tests create instances freely, there is no process-wide state.
pub struct Server {
    core: Arc<Core>,
}

impl Server {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            core: Arc::new(Core::new(config)),
        }
    }

    /// Swap the storage adapter. Only meaningful before [`start`](Self::start).
    pub fn set_storage(&self, storage: Arc<dyn Database>) {
        *self.core.storage.write() = storage;
    }

    /// The storage adapter in use.
    #[must_use]
    pub fn storage(&self) -> Arc<dyn Database> {
        self.core.storage()
    }

    /// Register a write filter for `path` (exact key or pattern).
    pub fn write_filter<F>(&self, path: &str, filter: F)
    where
        F: Fn(&str, Vec<u8>) -> Result<Vec<u8>, FilterError> + Send + Sync + 'static,
    {
        self.core.filters.write().write.add(path, Arc::new(filter) as Apply);
    }

    /// Register a read filter for `path`, applied before any value is sent.
    pub fn read_filter<F>(&self, path: &str, filter: F)
    where
        F: Fn(&str, Vec<u8>) -> Result<Vec<u8>, FilterError> + Send + Sync + 'static,
    {
        self.core.filters.write().read.add(path, Arc::new(filter) as Apply);
    }

    /// Register a delete hook for `path`.
    pub fn delete_filter<F>(&self, path: &str, hook: F)
    where
        F: Fn(&str) -> Result<(), FilterError> + Send + Sync + 'static,
    {
        self.core.filters.write().delete.add(path, Arc::new(hook) as ApplyHook);
    }

    /// Open a route with identity filters on all three tables. This is how
    /// keys are made reachable in static mode.
    pub fn open_filter(&self, path: &str) {
        self.write_filter(path, crate::filters::noop_filter);
        self.read_filter(path, crate::filters::noop_filter);
        self.delete_filter(path, crate::filters::noop_hook);
    }

    /// Install the request audit callback.
    pub fn audit<F>(&self, audit: F)
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        *self.core.audit.write() = Arc::new(audit);
    }

    /// Install the subscribe monitor.
    pub fn on_subscribe<F>(&self, hook: F)
    where
        F: Fn(&str) -> Result<(), StreamError> + Send + Sync + 'static,
    {
        *self.core.on_subscribe.write() = Arc::new(hook);
    }

    /// Install the unsubscribe monitor.
    pub fn on_unsubscribe<F>(&self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.core.on_unsubscribe.write() = Arc::new(hook);
    }

    /// True between a successful start and close.
    #[must_use]
    pub fn active(&self) -> bool {
        self.core.active()
    }

    /// The bound address, once started. With port 0 this is where the
    /// kernel actually put us.
    #[must_use]
    pub fn address(&self) -> Option<SocketAddr> {
        *self.core.address.read()
    }

    /// The pool registry, exposed for observability and tests.
    #[must_use]
    pub fn pools(&self) -> &Pools {
        &self.core.pools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_respects_write_filter() {
        let server = Server::new(Config::default());
        server.core.storage().start(Default::default()).await.unwrap();
        server.write_filter("secret", |key, _| {
            Err(FilterError::rejected(key, "read only"))
        });

        let err = server.core.publish("secret", b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, WriteError::Filter(_)));
        assert!(server.core.storage().get("secret").await.is_err());

        server.core.publish("open", b"{}".to_vec()).await.unwrap();
        assert_eq!(server.core.storage().get("open").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_fetch_absent_key_is_empty_object() {
        let server = Server::new(Config::default());
        server.core.storage().start(Default::default()).await.unwrap();

        let cache = server.core.fetch("ghost", "ghost").await.unwrap();
        assert_eq!(cache.data, b"{}");
        assert_eq!(cache.version, 1);
    }

    #[tokio::test]
    async fn test_fetch_static_mode_requires_filter() {
        let server = Server::new(Config {
            static_routes: true,
            ..Default::default()
        });
        server.core.storage().start(Default::default()).await.unwrap();

        assert!(server.core.fetch("k", "k").await.is_err());
        server.open_filter("k");
        assert!(server.core.fetch("k", "k").await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_reuses_pool_version() {
        let server = Server::new(Config::default());
        server.core.storage().start(Default::default()).await.unwrap();

        let first = server.core.fetch("k", "k").await.unwrap();
        let second = server.core.fetch("k", "k").await.unwrap();
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn test_fetch_seeds_filtered_bytes() {
        let server = Server::new(Config::default());
        server.core.storage().start(Default::default()).await.unwrap();
        server.read_filter("masked", |_, _| Ok(b"{\"masked\":true}".to_vec()));
        server
            .core
            .storage()
            .set("masked", b"{\"masked\":false}".to_vec())
            .await
            .unwrap();

        let cache = server.core.fetch("masked", "masked").await.unwrap();
        assert_eq!(cache.data, b"{\"masked\":true}");
        // the cache holds what subscribers saw, not the raw bytes
        let pooled = server.core.pools.cache("masked", "masked").unwrap();
        assert_eq!(pooled.data, b"{\"masked\":true}");
    }

    #[tokio::test]
    async fn test_memory_keys_route_to_mem_tier() {
        let server = Server::new(Config {
            in_memory_keys: vec!["scratch/*".into()],
            ..Default::default()
        });
        server.core.storage().start(Default::default()).await.unwrap();

        server.core.publish("scratch/1", b"{\"a\":1}".to_vec()).await.unwrap();
        assert!(server.core.storage().get("scratch/1").await.is_err());
        assert_eq!(
            server.core.storage().mem_get("scratch/1").await.unwrap(),
            b"{\"a\":1}"
        );
    }
}
