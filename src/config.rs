// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the broadcast server.
//!
//! # Example
//!
//! ```
//! use keycast::Config;
//!
//! // Minimal config (uses defaults)
//! let config = Config::default();
//! assert_eq!(config.workers, 6);
//! assert_eq!(config.tick_ms, 1000);
//!
//! // Full config
//! let config = Config {
//!     address: "0.0.0.0:8800".into(),
//!     workers: 4,
//!     force_patch: true,
//!     in_memory_keys: vec!["session/*".into()],
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the broadcast server.
///
/// All fields have sensible defaults. At minimum you should configure
/// `address`; everything else tunes the stream fabric.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address (e.g. "127.0.0.1:8800"). Port 0 picks a free port.
    #[serde(default = "default_address")]
    pub address: String,

    /// Number of dispatcher workers per storage tier (default: 6)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Always send patches, even when they are larger than the snapshot
    #[serde(default)]
    pub force_patch: bool,

    /// Static routing: keys without a registered filter are refused
    #[serde(default)]
    pub static_routes: bool,

    /// Interval of the clock broadcast on the reserved `time` key, in
    /// milliseconds (default: 1000)
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Suppress per-broadcast log output (embedders may also filter the
    /// tracing subscriber directly)
    #[serde(default)]
    pub silence: bool,

    /// Keys whose mutations never reach the watcher channels.
    /// The keys stay readable and writable.
    #[serde(default)]
    pub no_broadcast_keys: Vec<String>,

    /// Patterns routed to the in-memory tier instead of the persistent one
    #[serde(default)]
    pub in_memory_keys: Vec<String>,

    /// Path for the persistent tier, when the disk adapter is used
    #[serde(default)]
    pub db_path: Option<String>,
}

fn default_address() -> String {
    "127.0.0.1:8800".to_string()
}
fn default_workers() -> usize {
    6
}
fn default_tick_ms() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: default_address(),
            workers: default_workers(),
            force_patch: false,
            static_routes: false,
            tick_ms: default_tick_ms(),
            silence: false,
            no_broadcast_keys: Vec::new(),
            in_memory_keys: Vec::new(),
            db_path: None,
        }
    }
}

impl Config {
    /// True when `key` belongs to the in-memory tier.
    #[must_use]
    pub fn is_memory_key(&self, key: &str) -> bool {
        self.in_memory_keys
            .iter()
            .any(|p| p == key || crate::key::matches(p, key))
    }
}
