//! # Keycast
//!
//! A real-time key-value broadcast server. Clients subscribe to keys (exact
//! or glob-patterned) over a WebSocket and receive the current value followed
//! by either full snapshots or minimal JSON-patch deltas whenever the value
//! changes. HTTP peers and stream clients may publish, mutate, or delete
//! keys; every mutation fans out to all matching subscriber pools.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP / Stream Surface                  │
//! │  • GET / POST / DELETE on /{key}                            │
//! │  • WebSocket upgrade (subprotocol "bearer") on GET /{key}   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Storage Adapters                        │
//! │  • Persistent tier (sled) + in-memory tier (DashMap)        │
//! │  • Each tier emits change events on its own watcher channel │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (StorageEvent per mutation)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Broadcast Dispatcher                      │
//! │  • W worker tasks per tier drain the watcher channel        │
//! │  • Each event resolves to the pools whose pattern matches   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                    (read → filter → patch engine)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Pool Registry                         │
//! │  • (pattern, filter) → pool of live connections             │
//! │  • Cached last-sent body + monotonic version per pool       │
//! │  • Snapshot vs JSON-patch decided per broadcast             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keycast::{Server, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new(Config {
//!         address: "127.0.0.1:8800".into(),
//!         ..Default::default()
//!     });
//!
//!     server.open_filter("room/*");
//!     server.start().await.expect("failed to start");
//!     server.wait_close().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`server`]: the [`Server`] orchestrating surface, dispatcher, and pools
//! - [`stream`]: pool registry and per-connection write discipline
//! - [`storage`]: the [`Database`] contract plus disk and memory adapters
//! - [`patch`]: snapshot-vs-patch decision engine
//! - [`key`]: key validation and glob matching
//! - [`message`]: wire frame codec
//! - [`filters`]: ordered write/read/delete filter tables

pub mod config;
pub mod key;
pub mod message;
pub mod patch;
pub mod filters;
pub mod storage;
pub mod stream;
pub mod server;
pub mod metrics;

pub use config::Config;
pub use server::{Server, ServerError};
pub use filters::FilterError;
pub use message::ClientEvent;
pub use patch::PatchOutcome;
pub use storage::{
    Database, DiskStorage, EventOp, MemoryStorage, StorageError, StorageEvent, StorageOptions,
};
pub use stream::{Cache, Pools, StreamError};
