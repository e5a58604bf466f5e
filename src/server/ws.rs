// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! WebSocket subscriptions: upgrade, initial snapshot, read loop.
//!
//! Per-connection lifecycle:
//! 1. upgrade with subprotocol `bearer` (key validity and audit were
//!    checked by the route)
//! 2. subscribe callback; an error aborts before the pool is touched
//! 3. read filter on the initial body; static-mode refusals close here
//! 4. registration and initial snapshot, atomically against broadcasts
//! 5. read loop: liveness detection plus client-originated mutations
//! 6. on any read error: unregister, background unsubscribe callback,
//!    close the transport
//!
//! Inbound frames that fail to decode are logged and dropped; the
//! connection stays open.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::key;
use crate::message::ClientEvent;
use crate::metrics;
use crate::stream::conn::write_loop;
use crate::stream::Conn;

use super::Core;

pub(crate) fn subscribe(core: Arc<Core>, key: String, upgrade: WebSocketUpgrade) -> Response {
    upgrade
        .protocols(["bearer"])
        .on_upgrade(move |socket| handle_socket(core, key, socket))
}

async fn handle_socket(core: Arc<Core>, key: String, socket: WebSocket) {
    if let Err(err) = core.subscribe_check(&key) {
        metrics::record_refused("subscribe_callback");
        warn!(key = %key, error = %err, "subscription rejected");
        return; // dropping the socket closes it
    }

    // the initial body: the pool cache when warm, storage otherwise; the
    // read filter gates static mode either way
    let candidate = match core.pools.cache(&key, &key) {
        Some(cache) => cache.data,
        None => core.raw_value(&key, core.tier_of(&key)).await,
    };
    let fallback = match core.read_filter_check(&key, candidate) {
        Ok(filtered) => filtered,
        Err(err) => {
            metrics::record_refused("read_filter");
            warn!(key = %key, error = %err, "subscription refused by filter");
            return;
        }
    };

    let (sink, mut receiver) = socket.split();
    // the filter name of a stream subscription is the subscribed pattern
    let (conn, frames) = Conn::new(core.pools.next_conn_id(), key.clone(), key.clone());
    let conn = Arc::new(conn);
    tokio::spawn(write_loop(conn.id(), frames, sink));

    // registration and the initial snapshot happen under one registry
    // lock: exactly one snapshot, then deltas, versions in order
    core.pools.open(Arc::clone(&conn), fallback);
    metrics::set_connections(core.pools.total_connections());

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => client_event(&core, &key, text.as_bytes()).await,
            Ok(Message::Binary(raw)) => client_event(&core, &key, &raw).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong keep the loop alive
            Err(err) => {
                debug!(key = %key, error = %err, "read loop ended");
                break;
            }
        }
    }

    core.close_conn(&conn);
}

/// Apply one client-originated mutation received on a subscription.
async fn client_event(core: &Arc<Core>, subscribed: &str, raw: &[u8]) {
    let event = match ClientEvent::decode(raw) {
        Ok(event) => event,
        Err(err) => {
            warn!(key = %subscribed, error = %err, "dropping undecodable event");
            return;
        }
    };

    let Some(target) = resolve_target(subscribed, event.index.as_deref()) else {
        warn!(key = %subscribed, index = ?event.index, "dropping event without resolvable target");
        return;
    };

    if event.is_del() {
        if let Err(err) = core.unpublish(&target).await {
            debug!(key = %target, error = %err, "stream delete failed");
        }
        return;
    }

    match event.decoded_data() {
        Ok(Some(data)) => {
            if let Err(err) = core.publish(&target, data).await {
                debug!(key = %target, error = %err, "stream set failed");
            }
        }
        Ok(None) => {}
        Err(err) => {
            warn!(key = %target, error = %err, "dropping event with invalid payload");
        }
    }
}

/// Resolve the concrete key a client event addresses. A literal
/// subscription addresses itself; a subscription with a trailing glob
/// addresses `parent/index`.
fn resolve_target(subscribed: &str, index: Option<&str>) -> Option<String> {
    if !key::is_pattern(subscribed) {
        return Some(subscribed.to_string());
    }
    if subscribed != "*" && !subscribed.ends_with("/*") {
        return None;
    }
    let index = index?;
    let parent = key::parent(subscribed);
    let target = if parent.is_empty() {
        index.to_string()
    } else {
        format!("{parent}/{index}")
    };
    key::valid(&target).then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal_subscription() {
        assert_eq!(resolve_target("room/1", None).unwrap(), "room/1");
        // index is irrelevant on a literal subscription
        assert_eq!(resolve_target("room/1", Some("9")).unwrap(), "room/1");
    }

    #[test]
    fn test_resolve_glob_subscription() {
        assert_eq!(resolve_target("room/*", Some("7")).unwrap(), "room/7");
        assert_eq!(resolve_target("*", Some("top")).unwrap(), "top");
        assert!(resolve_target("room/*", None).is_none());
    }

    #[test]
    fn test_resolve_rejects_bad_targets() {
        assert!(resolve_target("a/*/c", Some("x")).is_none());
        assert!(resolve_target("room/*", Some("not/valid*")).is_none());
        assert!(resolve_target("room/*", Some("")).is_none());
    }
}
