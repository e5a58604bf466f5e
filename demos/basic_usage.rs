// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic keycast usage example.
//!
//! Demonstrates:
//! 1. Starting a server with the in-memory storage
//! 2. Subscribing to a glob pattern over WebSocket
//! 3. Publishing over HTTP and watching the frames arrive
//! 4. Snapshot vs patch frames on the wire
//! 5. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::StreamExt;
use keycast::{Config, Server};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Simple logging (no filter for simplicity)
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║              keycast: Basic Usage Example                     ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the server
    // ─────────────────────────────────────────────────────────────────────────
    println!("📦 Starting keycast on a loopback port...");

    let mut server = Server::new(Config {
        address: "127.0.0.1:0".into(),
        ..Default::default()
    });
    server.start().await?;
    let address = server.address().expect("server just started");
    println!("   ✅ Serving at {address}");

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Subscribe to a glob pattern
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Subscribing to room/* ...");
    let (mut stream, _) = connect_async(format!("ws://{address}/room/*")).await?;

    // the first frame is always a snapshot of the current match
    if let Some(Ok(Message::Binary(raw))) = stream.next().await {
        println!("   └─ initial frame: {}", summarize(&raw));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Publish over HTTP and watch the fan-out
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Publishing three values...");
    let http = reqwest::Client::new();
    for (key, body) in [
        ("room/alice", r#"{"status":"online"}"#),
        ("room/bob", r#"{"status":"online"}"#),
        ("room/alice", r#"{"status":"away"}"#),
    ] {
        http.post(format!("http://{address}/{key}"))
            .body(body)
            .send()
            .await?;
        println!("   └─ POST /{key} ← {body}");

        if let Some(Ok(Message::Binary(raw))) = stream.next().await {
            println!("      frame: {}", summarize(&raw));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    server.close().await;
    println!("   ✅ Shutdown complete!\n");

    Ok(())
}

/// Render one wire frame for display: envelope fields plus decoded data.
fn summarize(raw: &[u8]) -> String {
    let Ok(envelope) = serde_json::from_slice::<serde_json::Value>(raw) else {
        return "<not json>".into();
    };
    let snapshot = envelope["snapshot"].as_bool().unwrap_or(false);
    let version = envelope["version"].as_str().unwrap_or("?");
    let data = envelope["data"]
        .as_str()
        .and_then(|d| STANDARD.decode(d).ok())
        .map(|d| String::from_utf8_lossy(&d).into_owned())
        .unwrap_or_else(|| "<undecodable>".into());
    let kind = if snapshot { "snapshot" } else { "patch" };
    format!("{kind} v{version} → {data}")
}
