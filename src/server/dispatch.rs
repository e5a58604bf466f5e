// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dispatcher workers: drain the storage watcher channels and launch a
//! broadcast task per change event.
//!
//! Each tier gets `workers` tasks competing on one shared receiver, so an
//! event reaches exactly one worker. Workers exit when the channel closes
//! or the storage goes inactive; broadcasts themselves are fire-and-forget
//! tasks so a slow fan-out never stalls the channel.

use std::sync::Arc;

use tracing::debug;

use crate::metrics;
use crate::storage::EventReceiver;

use super::Core;

/// Which storage tier produced an event. Broadcast reads resolve against
/// the same tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Persistent,
    Memory,
}

impl Tier {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Tier::Persistent => "persistent",
            Tier::Memory => "memory",
        }
    }
}

/// Spawn `workers` dispatcher tasks per tier.
pub(crate) fn spawn_workers(core: &Arc<Core>) {
    let storage = core.storage();
    for _ in 0..core.config.workers {
        tokio::spawn(watch_loop(
            Arc::clone(core),
            storage.watch(),
            Tier::Persistent,
        ));
        tokio::spawn(watch_loop(Arc::clone(core), storage.mem_watch(), Tier::Memory));
    }
}

async fn watch_loop(core: Arc<Core>, events: EventReceiver, tier: Tier) {
    loop {
        let event = events.lock().await.recv().await;
        let Some(event) = event else {
            break;
        };
        if !event.key.is_empty() {
            metrics::record_event(tier.as_str(), event.op.as_str());
            if !core.config.silence {
                debug!(key = %event.key, tier = tier.as_str(), "broadcast");
            }
            let task_core = Arc::clone(&core);
            tokio::spawn(async move { task_core.broadcast(&event.key, tier).await });
        }
        if !core.storage().active() {
            break;
        }
    }
    debug!(tier = tier.as_str(), "dispatcher worker exited");
}
