// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The HTTP surface.
//!
//! Routes:
//! - `GET /` → server stats (`{"keys": [...]}`)
//! - `GET /{key}` → current filtered value, `{}` if absent
//! - `GET /{key}?v=<hex>` → value only when the version moved past `<hex>`
//! - `GET /{key}` + `Upgrade: websocket` → subscription stream
//! - `POST /{key}` → publish (a trailing `*` segment is replaced with a
//!   generated index, the original push semantics)
//! - `DELETE /{key}` → unpublish
//!
//! Key validation happens in the handlers; the route itself accepts any
//! tail so errors come back as proper JSON bodies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::key;
use crate::metrics;
use crate::storage::StorageError;

use super::{ws, Core, WriteError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn router(core: Arc<Core>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/", get(stats))
        .route("/*key", get(read).post(publish).delete(unpublish))
        .layer(cors)
        .layer(TimeoutLayer::new(HTTP_TIMEOUT))
        .with_state(core)
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = serde_json::to_vec(&serde_json::json!({ "error": message })).unwrap_or_default();
    json_response(status, body)
}

async fn stats(State(core): State<Arc<Core>>, parts: Parts) -> Response {
    if !core.audit_check(&parts) {
        return error_response(StatusCode::UNAUTHORIZED, "request not authorized");
    }
    match core.storage().keys().await {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn read(
    State(core): State<Arc<Core>>,
    Path(key): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: Option<WebSocketUpgrade>,
    parts: Parts,
) -> Response {
    if !key::route_valid(&key) || !key::pattern_valid(&key) {
        metrics::record_refused("invalid_key");
        return error_response(StatusCode::BAD_REQUEST, "key is not valid");
    }
    if !core.audit_check(&parts) {
        metrics::record_refused("unauthorized");
        return error_response(StatusCode::UNAUTHORIZED, "request not authorized");
    }

    if let Some(upgrade) = upgrade {
        return ws::subscribe(core, key, upgrade);
    }

    let cache = match core.fetch(&key, &key).await {
        Ok(cache) => cache,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    match params.get("v") {
        Some(since) => match i64::from_str_radix(since, 16) {
            Ok(since) if cache.version > since => json_response(StatusCode::OK, cache.data),
            Ok(_) => StatusCode::NOT_MODIFIED.into_response(),
            Err(_) => error_response(StatusCode::BAD_REQUEST, "version is not valid hex"),
        },
        None => json_response(StatusCode::OK, cache.data),
    }
}

async fn publish(
    State(core): State<Arc<Core>>,
    Path(key): Path<String>,
    parts: Parts,
    body: Bytes,
) -> Response {
    if !key::route_valid(&key) || !key::pattern_valid(&key) {
        return error_response(StatusCode::BAD_REQUEST, "key is not valid");
    }
    if !core.audit_check(&parts) {
        return error_response(StatusCode::UNAUTHORIZED, "request not authorized");
    }
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty request body");
    }

    let target = if key::is_pattern(&key) {
        match push_key(&key) {
            Some(target) => target,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "cannot publish to a pattern without a trailing glob",
                )
            }
        }
    } else {
        key
    };

    match core.publish(&target, body.to_vec()).await {
        Ok(()) => {
            let body = serde_json::to_vec(&serde_json::json!({ "index": target }))
                .unwrap_or_default();
            json_response(StatusCode::OK, body)
        }
        Err(WriteError::Filter(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(WriteError::Storage(err)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

async fn unpublish(
    State(core): State<Arc<Core>>,
    Path(key): Path<String>,
    parts: Parts,
) -> Response {
    if !key::valid(&key) {
        return error_response(StatusCode::BAD_REQUEST, "key is not valid");
    }
    if !core.audit_check(&parts) {
        return error_response(StatusCode::UNAUTHORIZED, "request not authorized");
    }

    match core.unpublish(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(WriteError::Filter(err)) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
        Err(WriteError::Storage(StorageError::NotFound)) => {
            error_response(StatusCode::NOT_FOUND, "key not found")
        }
        Err(WriteError::Storage(err)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}

/// Resolve a push publish: a pattern whose final segment is `*` gets that
/// segment replaced with a time-based index.
fn push_key(pattern: &str) -> Option<String> {
    if pattern != "*" && !pattern.ends_with("/*") {
        return None;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_nanos();
    let parent = key::parent(pattern);
    if parent.is_empty() {
        Some(nanos.to_string())
    } else {
        Some(format!("{parent}/{nanos}"))
    }
}
