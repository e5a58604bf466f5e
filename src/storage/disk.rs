// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistent adapter: the persistent tier lives in a sled tree, the
//! in-memory tier reuses the map tier.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;

use super::memory::MapTier;
use super::traits::{Database, StorageError};
use super::{EventOp, EventReceiver, StorageOptions, Watcher};
use crate::key;

const DEFAULT_PATH: &str = "data/db";

pub struct DiskStorage {
    active: AtomicBool,
    db: RwLock<Option<sled::Db>>,
    watcher: Watcher,
    mem: MapTier,
    no_broadcast: RwLock<Vec<String>>,
}

impl DiskStorage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            db: RwLock::new(None),
            watcher: Watcher::new(),
            mem: MapTier::new(),
            no_broadcast: RwLock::new(Vec::new()),
        }
    }

    fn announce(&self, key: &str) -> bool {
        !self.no_broadcast.read().iter().any(|k| k == key)
    }

    fn with_db<T>(
        &self,
        f: impl FnOnce(&sled::Db) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        match self.db.read().as_ref() {
            Some(db) => f(db),
            None => Err(StorageError::Inactive),
        }
    }
}

impl Default for DiskStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for DiskStorage {
    async fn start(&self, opts: StorageOptions) -> Result<(), StorageError> {
        let path = opts.path.unwrap_or_else(|| DEFAULT_PATH.to_string());
        let db = sled::open(&path)?;
        info!(path = %path, "disk storage opened");
        *self.no_broadcast.write() = opts.no_broadcast_keys;
        *self.db.write() = Some(db);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(db) = self.db.write().take() {
            let _ = db.flush();
        }
        self.watcher.close();
        self.mem.watcher().close();
    }

    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.with_db(|db| match db.get(key.as_bytes())? {
            Some(value) => Ok(value.to_vec()),
            None => Err(StorageError::NotFound),
        })
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.with_db(|db| {
            db.insert(key.as_bytes(), data)?;
            Ok(())
        })?;
        if self.announce(key) {
            self.watcher.emit(key, EventOp::Set);
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StorageError> {
        self.with_db(|db| match db.remove(key.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        })?;
        if self.announce(key) {
            self.watcher.emit(key, EventOp::Del);
        }
        Ok(())
    }

    async fn list(&self, pattern: &str) -> Result<Vec<u8>, StorageError> {
        self.with_db(|db| {
            // keys share the pattern's literal prefix up to the first glob
            let prefix = pattern.split('*').next().unwrap_or("");
            let mut entries: Vec<(String, Value)> = Vec::new();
            for item in db.scan_prefix(prefix.as_bytes()) {
                let (k, v) = item?;
                let k = String::from_utf8_lossy(&k).to_string();
                if k != pattern && !key::matches(pattern, &k) {
                    continue;
                }
                if let Ok(value) = serde_json::from_slice(&v) {
                    entries.push((k, value));
                }
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let values: Vec<Value> = entries.into_iter().map(|(_, v)| v).collect();
            serde_json::to_vec(&values).map_err(|e| StorageError::Backend(e.to_string()))
        })
    }

    async fn keys(&self) -> Result<Vec<u8>, StorageError> {
        self.with_db(|db| {
            let mut keys = Vec::new();
            for item in db.iter() {
                let (k, _) = item?;
                keys.push(String::from_utf8_lossy(&k).to_string());
            }
            keys.sort_by_key(|k| k.to_lowercase());
            serde_json::to_vec(&serde_json::json!({ "keys": keys }))
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
    }

    fn watch(&self) -> EventReceiver {
        self.watcher.receiver()
    }

    async fn mem_get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.mem.get(key)
    }

    async fn mem_set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        if !self.active() {
            return Err(StorageError::Inactive);
        }
        self.mem.set(key, data, self.announce(key));
        Ok(())
    }

    async fn mem_del(&self, key: &str) -> Result<(), StorageError> {
        if !self.active() {
            return Err(StorageError::Inactive);
        }
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
