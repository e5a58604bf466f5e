// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pure in-memory adapter: both tiers are concurrent maps. The default
//! storage, and the one the test suite runs against.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::traits::{Database, StorageError};
use super::{EventOp, EventReceiver, StorageOptions, Watcher};
use crate::key;

/// One map-backed tier with its watcher channel.
pub(crate) struct MapTier {
    data: DashMap<String, Vec<u8>>,
    watcher: Watcher,
}

impl MapTier {
    pub(crate) fn new() -> Self {
        Self {
            data: DashMap::new(),
            watcher: Watcher::new(),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.data
            .get(key)
            .map(|r| r.value().clone())
            .ok_or(StorageError::NotFound)
    }

    pub(crate) fn set(&self, key: &str, data: Vec<u8>, announce: bool) {
        self.data.insert(key.to_string(), data);
        if announce {
            self.watcher.emit(key, EventOp::Set);
        }
    }

    pub(crate) fn del(&self, key: &str, announce: bool) -> Result<(), StorageError> {
        if self.data.remove(key).is_none() {
            return Err(StorageError::NotFound);
        }
        if announce {
            self.watcher.emit(key, EventOp::Del);
        }
        Ok(())
    }

    pub(crate) fn list(&self, pattern: &str) -> Result<Vec<u8>, StorageError> {
        let mut entries: Vec<(String, Value)> = self
            .data
            .iter()
            .filter(|r| r.key() == pattern || key::matches(pattern, r.key()))
            .filter_map(|r| {
                serde_json::from_slice(r.value())
                    .ok()
                    .map(|v| (r.key().clone(), v))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Value> = entries.into_iter().map(|(_, v)| v).collect();
        serde_json::to_vec(&values).map_err(|e| StorageError::Backend(e.to_string()))
    }

    pub(crate) fn keys(&self) -> Result<Vec<u8>, StorageError> {
        let mut keys: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        keys.sort_by_key(|k| k.to_lowercase());
        serde_json::to_vec(&serde_json::json!({ "keys": keys }))
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    pub(crate) fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

/// In-memory storage: composition of two [`MapTier`]s.
pub struct MemoryStorage {
    active: AtomicBool,
    persistent: MapTier,
    mem: MapTier,
    no_broadcast: RwLock<Vec<String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            persistent: MapTier::new(),
            mem: MapTier::new(),
            no_broadcast: RwLock::new(Vec::new()),
        }
    }

    fn announce(&self, key: &str) -> bool {
        !self.no_broadcast.read().iter().any(|k| k == key)
    }

    fn ensure_active(&self) -> Result<(), StorageError> {
        if self.active() {
            Ok(())
        } else {
            Err(StorageError::Inactive)
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemoryStorage {
    async fn start(&self, opts: StorageOptions) -> Result<(), StorageError> {
        *self.no_broadcast.write() = opts.no_broadcast_keys;
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.persistent.watcher().close();
        self.mem.watcher().close();
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.persistent.get(key)
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_active()?;
        self.persistent.set(key, data, self.announce(key));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_active()?;
        self.persistent.del(key, self.announce(key))
    }

    async fn list(&self, pattern: &str) -> Result<Vec<u8>, StorageError> {
        self.persistent.list(pattern)
    }

    async fn keys(&self) -> Result<Vec<u8>, StorageError> {
        self.persistent.keys()
    }

    fn watch(&self) -> EventReceiver {
        self.persistent.watcher().receiver()
    }

    async fn mem_get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.mem.get(key)
    }

    async fn mem_set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.ensure_active()?;
        self.mem.set(key, data, self.announce(key));
        Ok(())
    }

    async fn mem_del(&self, key: &str) -> Result<(), StorageError> {
        self.ensure_active()?;
        self.mem.del(key, self.announce(key))
    }

    async fn mem_list(&self, pattern: &str) -> Result<Vec<u8>, StorageError> {
        self.mem.list(pattern)
    }

    async fn mem_keys(&self) -> Result<Vec<u8>, StorageError> {
        self.mem.keys()
    }

    fn mem_watch(&self) -> EventReceiver {
        self.mem.watcher().receiver()
    }
}
