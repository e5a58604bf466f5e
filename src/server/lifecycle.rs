// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Server lifecycle: start, graceful close, signal wait, and the clock
//! tick producer.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::storage::StorageOptions;

use super::{dispatch, routes, Core, Server, ServerError};

/// The reserved key the clock broadcasts on.
const TICK_KEY: &str = "time";

impl Server {
    /// Start the storage, bind the listener, and spawn the dispatcher
    /// workers and the clock tick.
    ///
    /// Storage failure here is fatal to the caller: nothing has been
    /// spawned yet and the error propagates untouched.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let core = &self.core;
        if core.active() {
            return Err(ServerError::AlreadyActive);
        }

        core.storage()
            .start(StorageOptions {
                no_broadcast_keys: core.config.no_broadcast_keys.clone(),
                path: core.config.db_path.clone(),
            })
            .await?;

        let listener = TcpListener::bind(&core.config.address).await.map_err(|source| {
            ServerError::Bind {
                address: core.config.address.clone(),
                source,
            }
        })?;
        let address = listener.local_addr().map_err(|source| ServerError::Bind {
            address: core.config.address.clone(),
            source,
        })?;
        *core.address.write() = Some(address);
        core.closing.store(false, Ordering::Release);
        core.active.store(true, Ordering::Release);

        let router = routes::router(Arc::clone(core));
        let serve_core = Arc::clone(core);
        let mut shutdown_rx = core.shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await;
            if let Err(err) = result {
                if serve_core.active() {
                    error!(error = %err, "http server failed");
                }
            }
        });

        dispatch::spawn_workers(core);
        tokio::spawn(tick(Arc::clone(core)));

        info!(address = %address, "glad to serve");
        Ok(())
    }

    /// Graceful close: storage first (workers drain and exit), then the
    /// pools, then the HTTP listener. Idempotent.
    pub async fn close(&self) {
        let core = &self.core;
        if core.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        core.active.store(false, Ordering::Release);
        warn!("shutdown");

        core.storage().close().await;
        for conn in core.pools.unregister_all() {
            conn.close();
        }
        let _ = core.shutdown.send(true);
    }

    /// Block until SIGINT, SIGTERM, or SIGHUP, then close.
    pub async fn wait_close(&self) {
        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                return;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                return;
            }
        };
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install signal handler");
                return;
            }
        };

        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = hangup.recv() => {}
        }
        self.close().await;
    }
}

/// Periodic timestamp broadcast to subscribers of the reserved `time` key.
/// A trivial producer on top of the fabric: no storage involved, straight
/// through the patch engine so versions stay monotonic.
async fn tick(core: Arc<Core>) {
    let mut interval = tokio::time::interval(Duration::from_millis(core.config.tick_ms.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if !core.active() {
            break;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let body = format!("{{\"time\":\"{now}\"}}").into_bytes();
        for index in core.pools.matching(TICK_KEY) {
            core.pools.broadcast(index, body.clone(), core.config.force_patch);
        }
    }
}
