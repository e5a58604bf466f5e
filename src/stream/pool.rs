// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The pool registry: `(key-pattern, filter)` → subscriber pool with a
//! shared last-sent cache and a monotonic version.
//!
//! Frames are enqueued to connections while the registry lock is held, so
//! the order a connection sees frames in always matches the order its
//! pool's versions were allocated in. The enqueue itself never blocks (see
//! [`Conn::send`]), which keeps the critical section short.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::Conn;
use crate::key;
use crate::message;
use crate::patch::{self, PatchOutcome};

/// Last body broadcast to a pool, with its generation counter. Once set it
/// is only ever overwritten, never cleared, and the version never decreases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cache {
    pub data: Vec<u8>,
    pub version: i64,
}

/// Subscribers of one `(key-pattern, filter)` pair.
pub struct Pool {
    pub key: String,
    pub filter: String,
    cache: Option<Cache>,
    connections: Vec<Arc<Conn>>,
}

impl Pool {
    fn new(key: String, filter: String) -> Self {
        Self {
            key,
            filter,
            cache: None,
            connections: Vec::new(),
        }
    }

    /// Overwrite the cache, allocating the next version.
    fn set_cache(&mut self, data: Vec<u8>) -> i64 {
        let version = self.cache.as_ref().map_or(1, |c| c.version + 1);
        self.cache = Some(Cache { data, version });
        version
    }
}

/// The registry. One read-write lock serializes structural changes; readers
/// dominate since the registry mutates rarely compared with broadcasts.
///
/// Index 0 is a reserved pool with an empty key that no broadcast lookup
/// ever matches. Pools are never removed, so indices are stable.
pub struct Pools {
    pools: RwLock<Vec<Pool>>,
    conn_seq: AtomicU64,
}

impl Pools {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(vec![Pool::new(String::new(), String::new())]),
            conn_seq: AtomicU64::new(1),
        }
    }

    /// Number of pools, the reserved one included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    /// Allocate a connection id.
    pub(crate) fn next_conn_id(&self) -> u64 {
        self.conn_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn find_locked(pools: &[Pool], key: &str, filter: &str) -> Option<usize> {
        pools
            .iter()
            .position(|p| p.key == key && p.filter == filter)
    }

    fn find_or_create_locked(pools: &mut Vec<Pool>, key: &str, filter: &str) -> usize {
        match Self::find_locked(pools, key, filter) {
            Some(index) => index,
            None => {
                pools.push(Pool::new(key.to_string(), filter.to_string()));
                pools.len() - 1
            }
        }
    }

    #[must_use]
    pub fn find(&self, key: &str, filter: &str) -> Option<usize> {
        Self::find_locked(&self.pools.read(), key, filter)
    }

    /// Atomically find or create the pool, register the connection, and
    /// enqueue its initial snapshot from the pool cache.
    ///
    /// `fallback` seeds the cache of a cold pool (the caller has already
    /// read and filtered it); a warm pool keeps its cache and the new
    /// subscriber snapshots from that. Doing all of it under one lock
    /// guarantees the subscriber sees exactly one snapshot before any
    /// delta.
    pub fn open(&self, conn: Arc<Conn>, fallback: Vec<u8>) -> usize {
        let mut pools = self.pools.write();
        let index = Self::find_or_create_locked(&mut pools, conn.key(), conn.filter());
        if pools[index].cache.is_none() {
            pools[index].set_cache(fallback);
        }
        if let Some(cache) = pools[index].cache.as_ref() {
            let frame = message::frame(&message::encode(&cache.data), true, cache.version);
            conn.send(frame);
        }
        pools[index].connections.push(conn);
        debug!(
            key = %pools[index].key,
            connections = pools[index].connections.len(),
            "connection opened"
        );
        index
    }

    /// Remove the connection from its pool. Returns true when it was still
    /// registered. The caller closes the transport afterwards.
    pub fn remove(&self, conn: &Conn) -> bool {
        let mut pools = self.pools.write();
        let Some(index) = Self::find_locked(&pools, conn.key(), conn.filter()) else {
            return false;
        };
        let before = pools[index].connections.len();
        pools[index].connections.retain(|c| c.id() != conn.id());
        before != pools[index].connections.len()
    }

    /// Indices of pools whose pattern matches a changed key, the reserved
    /// pool excluded. Held under a read lock for the iteration window only.
    #[must_use]
    pub fn matching(&self, path: &str) -> Vec<usize> {
        self.pools
            .read()
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, p)| p.key == path || key::matches(&p.key, path))
            .map(|(i, _)| i)
            .collect()
    }

    /// The `(key, filter)` pair a pool was opened against.
    #[must_use]
    pub fn target(&self, index: usize) -> Option<(String, String)> {
        self.pools
            .read()
            .get(index)
            .map(|p| (p.key.clone(), p.filter.clone()))
    }

    #[must_use]
    pub fn connection_count(&self, index: usize) -> usize {
        self.pools
            .read()
            .get(index)
            .map_or(0, |p| p.connections.len())
    }

    /// Live connections across every pool.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.pools.read().iter().map(|p| p.connections.len()).sum()
    }

    /// Cached body and version for `(key, filter)`, if the pool exists and
    /// holds one.
    #[must_use]
    pub fn cache(&self, key: &str, filter: &str) -> Option<Cache> {
        let pools = self.pools.read();
        let index = Self::find_locked(&pools, key, filter)?;
        pools[index].cache.clone()
    }

    /// Find-or-create the pool and seed its cache when empty. Returns the
    /// effective cache; an already-seeded pool keeps its data and version.
    pub fn seed_cache(&self, key: &str, filter: &str, data: Vec<u8>) -> Cache {
        let mut pools = self.pools.write();
        let index = Self::find_or_create_locked(&mut pools, key, filter);
        match pools[index].cache.clone() {
            Some(cache) => cache,
            None => {
                let version = pools[index].set_cache(data.clone());
                Cache { data, version }
            }
        }
    }

    /// Run the patch engine for one pool against its cache, update the
    /// cache to `data`, and enqueue the resulting frame to every
    /// connection of the pool.
    ///
    /// The patch decision, the version allocation, and the enqueues all
    /// happen under the registry write lock: the patch delivered at
    /// version `v` was computed against the cache that carried `v-1`, and
    /// every connection receives frames in version order.
    pub fn broadcast(
        &self,
        index: usize,
        data: Vec<u8>,
        force_patch: bool,
    ) -> Option<(PatchOutcome, i64, usize)> {
        let mut pools = self.pools.write();
        let pool = pools.get_mut(index)?;
        let outcome = match pool.cache.as_ref() {
            Some(cache) => patch::compute(&cache.data, &data, force_patch),
            None => PatchOutcome {
                body: data.clone(),
                snapshot: true,
            },
        };
        let version = pool.set_cache(data);
        let frame = message::frame(&message::encode(&outcome.body), outcome.snapshot, version);
        for conn in &pool.connections {
            conn.send(frame.clone());
        }
        Some((outcome, version, pool.connections.len()))
    }

    /// Drain every connection from every pool, for shutdown. The caller
    /// closes the returned transports.
    pub fn unregister_all(&self) -> Vec<Arc<Conn>> {
        let mut pools = self.pools.write();
        let mut all = Vec::new();
        for pool in pools.iter_mut() {
            all.append(&mut pool.connections);
        }
        all
    }
}

impl Default for Pools {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::conn::Command;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn conn(pools: &Pools, key: &str) -> (Arc<Conn>, UnboundedReceiver<Command>) {
        let (conn, rx) = Conn::new(pools.next_conn_id(), key.to_string(), key.to_string());
        (Arc::new(conn), rx)
    }

    fn next_frame(rx: &mut UnboundedReceiver<Command>) -> Option<(bool, i64, Vec<u8>)> {
        match rx.try_recv().ok()? {
            Command::Frame(raw) => {
                let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
                let snapshot = value["snapshot"].as_bool().unwrap();
                let version =
                    i64::from_str_radix(value["version"].as_str().unwrap(), 16).unwrap();
                let data = crate::message::decode(value["data"].as_str().unwrap()).unwrap();
                Some((snapshot, version, data))
            }
            Command::Close => None,
        }
    }

    #[test]
    fn test_reserved_pool_matches_nothing() {
        let pools = Pools::new();
        assert_eq!(pools.len(), 1);
        assert!(pools.matching("anything").is_empty());
        assert!(pools.matching("").is_empty());
    }

    #[test]
    fn test_open_sends_initial_snapshot() {
        let pools = Pools::new();
        let (c, mut rx) = conn(&pools, "room/1");
        pools.open(c, b"{}".to_vec());

        let (snapshot, version, data) = next_frame(&mut rx).unwrap();
        assert!(snapshot);
        assert_eq!(version, 1);
        assert_eq!(data, b"{}");
    }

    #[test]
    fn test_open_creates_then_reuses_pool() {
        let pools = Pools::new();
        let (c1, _rx1) = conn(&pools, "room/1");
        let (c2, mut rx2) = conn(&pools, "room/1");
        let i1 = pools.open(c1, b"{}".to_vec());
        pools.broadcast(i1, b"{\"warm\":true}".to_vec(), false);

        // the second subscriber snapshots from the warm cache
        let i2 = pools.open(c2, b"{}".to_vec());
        assert_eq!(i1, i2);
        assert_eq!(pools.connection_count(i1), 2);
        let (snapshot, version, data) = next_frame(&mut rx2).unwrap();
        assert!(snapshot);
        assert_eq!(version, 2);
        assert_eq!(data, b"{\"warm\":true}");
    }

    #[test]
    fn test_distinct_filter_is_distinct_pool() {
        let pools = Pools::new();
        let (a, _rx_a) = Conn::new(1, "k".into(), "f1".into());
        let (b, _rx_b) = Conn::new(2, "k".into(), "f2".into());
        let ia = pools.open(Arc::new(a), b"{}".to_vec());
        let ib = pools.open(Arc::new(b), b"{}".to_vec());
        assert_ne!(ia, ib);
    }

    #[test]
    fn test_remove_leaves_pool_and_cache() {
        let pools = Pools::new();
        let (c, _rx) = conn(&pools, "room/1");
        let index = pools.open(c.clone(), b"{}".to_vec());

        assert!(pools.remove(&c));
        assert!(!pools.remove(&c)); // idempotent
        assert_eq!(pools.connection_count(index), 0);
        // pool retained, cache survives for reconnects
        assert_eq!(pools.len(), 2);
        let cache = pools.cache("room/1", "room/1").unwrap();
        assert_eq!(cache.version, 1);
    }

    #[test]
    fn test_matching_skips_reserved_and_globs() {
        let pools = Pools::new();
        let (a, _ra) = conn(&pools, "room/1");
        let (b, _rb) = conn(&pools, "room/*");
        let (c, _rc) = conn(&pools, "other");
        pools.open(a, b"{}".to_vec());
        pools.open(b, b"[]".to_vec());
        pools.open(c, b"{}".to_vec());

        assert_eq!(pools.matching("room/1").len(), 2);
        assert_eq!(pools.matching("room/2").len(), 1);
        assert!(pools.matching("nope").is_empty());
    }

    #[test]
    fn test_versions_strictly_increase_in_delivery_order() {
        let pools = Pools::new();
        let (c, mut rx) = conn(&pools, "k");
        let index = pools.open(c, b"{}".to_vec());

        for n in 0..5 {
            let body = format!("{{\"n\":{n}}}").into_bytes();
            pools.broadcast(index, body, false).unwrap();
        }

        let mut last = 0;
        while let Some((_, version, _)) = next_frame(&mut rx) {
            assert!(version > last);
            last = version;
        }
        assert_eq!(last, 6); // initial seed plus five broadcasts
    }

    #[test]
    fn test_first_broadcast_without_cache_is_snapshot() {
        let pools = Pools::new();
        let index = {
            let mut pools_mut = pools.pools.write();
            Pools::find_or_create_locked(&mut pools_mut, "cold", "cold")
        };
        let (outcome, version, fanout) = pools
            .broadcast(index, b"{\"a\":1}".to_vec(), false)
            .unwrap();
        assert!(outcome.snapshot);
        assert_eq!(version, 1);
        assert_eq!(fanout, 0);
    }

    #[test]
    fn test_cache_tracks_fed_body() {
        let pools = Pools::new();
        let (c, _rx) = conn(&pools, "k");
        let index = pools.open(c, b"{}".to_vec());
        pools.broadcast(index, b"{\"a\":1}".to_vec(), false).unwrap();
        pools.broadcast(index, b"{\"a\":2}".to_vec(), false).unwrap();
        let cache = pools.cache("k", "k").unwrap();
        assert_eq!(cache.data, b"{\"a\":2}");
        assert_eq!(cache.version, 3);
    }

    #[test]
    fn test_seed_cache_does_not_clobber() {
        let pools = Pools::new();
        let seeded = pools.seed_cache("k", "k", b"{\"a\":1}".to_vec());
        assert_eq!(seeded.version, 1);
        let again = pools.seed_cache("k", "k", b"{\"a\":2}".to_vec());
        assert_eq!(again.version, 1);
        assert_eq!(again.data, b"{\"a\":1}");
    }

    #[test]
    fn test_unregister_all() {
        let pools = Pools::new();
        let (a, _ra) = conn(&pools, "a");
        let (b, _rb) = conn(&pools, "b");
        pools.open(a, b"{}".to_vec());
        pools.open(b, b"{}".to_vec());
        let drained = pools.unregister_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(pools.total_connections(), 0);
    }
}
