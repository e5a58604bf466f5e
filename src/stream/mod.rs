// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The stream fabric: subscriber pools and per-connection write discipline.
//!
//! A [`Pool`] groups every live connection subscribed to one
//! `(key-pattern, filter)` pair and carries the cached last-sent body plus a
//! monotonically increasing version. The [`Pools`] registry owns the pools
//! by index behind one read-write lock; connections hold the pair they were
//! opened against and never point back at their pool.
//!
//! Pools are created on first subscribe and retained for the lifetime of the
//! registry, so indices handed out under a read lock stay valid and cached
//! versions survive reconnects.

pub(crate) mod conn;
mod pool;

pub use conn::{Conn, WRITE_DEADLINE};
pub use pool::{Cache, Pool, Pools};

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("subscription rejected for '{key}': {reason}")]
    SubscribeRejected { key: String, reason: String },
    #[error("stream write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("stream transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Convenience constructor for subscribe callbacks.
    pub fn rejected(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeRejected {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
