// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage adapters and the change-event plumbing.
//!
//! Every adapter exposes two tiers behind one [`Database`] contract: the
//! persistent tier (`get`/`set`/`del`/...) and the in-memory tier
//! (`mem_get`/`mem_set`/...). Each tier owns a watcher channel on which the
//! adapter emits a [`StorageEvent`] *after* the mutation is visible to
//! subsequent reads. Dispatcher workers drain these channels.

pub mod traits;
pub mod memory;
pub mod disk;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
pub use traits::{Database, StorageError};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Operation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOp {
    Set,
    Del,
}

impl EventOp {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOp::Set => "set",
            EventOp::Del => "del",
        }
    }
}

/// A change event emitted by a storage tier. Keys are always literal.
#[derive(Debug, Clone)]
pub struct StorageEvent {
    pub key: String,
    pub op: EventOp,
}

/// Shared handle to a tier's event channel. Workers lock to receive, so
/// each event reaches exactly one worker.
pub type EventReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<StorageEvent>>>;

/// Options handed to [`Database::start`].
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Keys whose mutations are not announced on the watcher channels.
    pub no_broadcast_keys: Vec<String>,
    /// Adapter-specific location (e.g. the sled directory).
    pub path: Option<String>,
}

/// One tier's watcher channel. Dropping the sender (on close) ends the
/// channel, which the dispatcher workers observe as shutdown.
pub(crate) struct Watcher {
    tx: Mutex<Option<mpsc::UnboundedSender<StorageEvent>>>,
    rx: EventReceiver,
}

impl Watcher {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Announce a mutation. No-op once the watcher is closed.
    pub(crate) fn emit(&self, key: &str, op: EventOp) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(StorageEvent {
                key: key.to_string(),
                op,
            });
        }
    }

    pub(crate) fn receiver(&self) -> EventReceiver {
        self.rx.clone()
    }

    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}
