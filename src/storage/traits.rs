// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The storage contract the broadcast fabric is built against.

use async_trait::async_trait;
use thiserror::Error;

use super::{EventReceiver, StorageOptions};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("key not found")]
    NotFound,
    #[error("storage is not active")]
    Inactive,
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Two-tier storage contract.
///
/// The persistent tier (`get`/`set`/...) survives restarts when the adapter
/// supports it; the in-memory tier (`mem_get`/`mem_set`/...) is always
/// ephemeral. Adapters emit a [`super::StorageEvent`] on the matching tier's
/// watcher channel after every mutation, except for keys listed in
/// [`StorageOptions::no_broadcast_keys`].
///
/// Adapters are interchangeable at construction time only; there is no
/// runtime swap.
#[async_trait]
pub trait Database: Send + Sync {
    async fn start(&self, opts: StorageOptions) -> Result<(), StorageError>;
    async fn close(&self);
    fn active(&self) -> bool;

    // persistent tier
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;
    async fn del(&self, key: &str) -> Result<(), StorageError>;
    /// All values whose key matches `pattern`, as a JSON array sorted by key.
    async fn list(&self, pattern: &str) -> Result<Vec<u8>, StorageError>;
    /// All keys of the persistent tier as `{"keys":[...]}`, sorted
    /// case-insensitively.
    async fn keys(&self) -> Result<Vec<u8>, StorageError>;
    fn watch(&self) -> EventReceiver;

    // in-memory tier
    async fn mem_get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn mem_set(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError>;
    async fn mem_del(&self, key: &str) -> Result<(), StorageError>;
    async fn mem_list(&self, pattern: &str) -> Result<Vec<u8>, StorageError>;
    async fn mem_keys(&self) -> Result<Vec<u8>, StorageError>;
    fn mem_watch(&self) -> EventReceiver;
}
