// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire frame codec.
//!
//! # Frame Format
//!
//! ## Server → client (binary message, JSON text)
//! ```text
//! {"snapshot": <bool>, "version": "<hex int64>", "data": "<base64>"}
//! ```
//! `data` carries the base64 of either a full value (snapshot) or a
//! JSON-patch array (delta).
//!
//! ## Client → server
//! ```text
//! {"op"?: "del", "index"?: "<string>", "data"?: "<base64>"}
//! ```
//! An absent or unknown `op` means "set". On decode failure the frame is
//! logged and dropped; the connection stays open.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("event decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("event data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Inbound client event, already JSON-decoded. `data` stays base64 until
/// [`ClientEvent::decoded_data`] is called.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientEvent {
    #[serde(default)]
    pub op: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl ClientEvent {
    pub fn decode(raw: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// True when the event asks for a deletion.
    #[must_use]
    pub fn is_del(&self) -> bool {
        self.op.as_deref() == Some("del")
    }

    /// The base64-decoded payload, if any.
    pub fn decoded_data(&self) -> Result<Option<Vec<u8>>, MessageError> {
        match self.data.as_deref() {
            Some(data) if !data.is_empty() => Ok(Some(STANDARD.decode(data)?)),
            _ => Ok(None),
        }
    }
}

/// Base64-encode a payload for the `data` field.
#[must_use]
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64-decode a `data` field.
pub fn decode(data: &str) -> Result<Vec<u8>, MessageError> {
    Ok(STANDARD.decode(data)?)
}

/// Render an outbound frame. The field order (snapshot, version, data) is
/// part of the wire contract, so the envelope is built by hand rather than
/// through a serializer's map type.
#[must_use]
pub fn frame(data_b64: &str, snapshot: bool, version: i64) -> Vec<u8> {
    format!(
        "{{\"snapshot\": {}, \"version\": \"{:x}\", \"data\": \"{}\"}}",
        snapshot, version, data_b64
    )
    .into_bytes()
}
