// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A subscribed connection: an ordered frame queue in front of a single
//! writer task that owns the write half of the WebSocket.
//!
//! The single writer guarantees at most one write in flight per transport
//! and strict FIFO delivery of enqueued frames. Frames are enqueued
//! synchronously (under the registry lock on the broadcast path), so the
//! delivery order of a connection always matches the version order of its
//! pool. Every write carries a deadline; a stalled consumer is detected on
//! its next frame and its transport closed without blocking anyone else.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::metrics;

/// Deadline for one frame write. A consumer that cannot drain a frame
/// within this window is closed.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(15);

pub(crate) enum Command {
    Frame(Vec<u8>),
    Close,
}

/// One subscriber connection. Appears in exactly one pool; holds the
/// `(key, filter)` pair it was opened against instead of a pool pointer.
pub struct Conn {
    id: u64,
    key: String,
    filter: String,
    tx: mpsc::UnboundedSender<Command>,
}

impl Conn {
    /// Create the connection handle and the receiving end for its writer
    /// task (see [`write_loop`]).
    pub(crate) fn new(
        id: u64,
        key: String,
        filter: String,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id,
                key,
                filter,
                tx,
            },
            rx,
        )
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Enqueue one frame. Never blocks; a closed connection swallows the
    /// frame, which the next event converges over.
    pub fn send(&self, frame: Vec<u8>) {
        let _ = self.tx.send(Command::Frame(frame));
    }

    /// Ask the writer task to close the transport. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }
}

/// Drain a connection's frame queue into its transport. Runs until the
/// queue closes, a close is requested, or a write fails its deadline.
pub(crate) async fn write_loop(
    conn_id: u64,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(command) = rx.recv().await {
        let frame = match command {
            Command::Frame(frame) => frame,
            Command::Close => break,
        };
        let started = std::time::Instant::now();
        match timeout(WRITE_DEADLINE, sink.send(Message::Binary(frame))).await {
            Ok(Ok(())) => {
                metrics::record_write("ok");
                metrics::record_write_latency(started.elapsed());
            }
            Ok(Err(err)) => {
                metrics::record_write("error");
                debug!(conn = conn_id, error = %err, "stream write failed");
                break;
            }
            Err(_) => {
                metrics::record_write("timeout");
                warn!(conn = conn_id, "write deadline exceeded, closing transport");
                break;
            }
        }
    }
    rx.close();
    let _ = timeout(WRITE_DEADLINE, sink.close()).await;
}
