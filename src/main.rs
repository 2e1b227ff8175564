// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use node_gateway_broker::{
    broker::Broker,
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    conn::Connection,
    error::SendError,
    registry::NodeMetadata,
    wire::WireMessage,
};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::info;

/// A connection stub that logs what the broker tries to send and forwards
/// the frame to `main` over a channel, standing in for a real node that
/// would otherwise reply over its own transport. Real transport (the framed
/// WebSocket/TCP channel) is out of scope (spec §1); this demo exists to
/// exercise the broker end to end without one.
#[derive(Debug)]
struct LoggingConnection {
    sent: mpsc::UnboundedSender<WireMessage>,
}

impl Connection for LoggingConnection {
    fn send(&self, msg: WireMessage) -> Result<(), SendError> {
        info!(?msg, "would send frame to node");
        let _ = self.sent.send(msg);
        Ok(())
    }
}

/// Plays the node's side of one invoke: a direct reply for `system.run`, a
/// chunked transfer for `system.bigrun`.
async fn drive_fake_node(broker: Arc<Broker>, mut sent: mpsc::UnboundedReceiver<WireMessage>) {
    while let Some(msg) = sent.recv().await {
        let WireMessage::InvokeRequest { id, node_id, command, .. } = msg else { continue };
        match command.as_str() {
            "system.run" => {
                broker.handle_invoke_result(
                    &id,
                    &node_id,
                    Ok(node_gateway_broker::wire::Payload::Serialized(
                        "{\"ok\":true,\"value\":\"hello\"}".into(),
                    )),
                );
            },
            "system.bigrun" => {
                let payload = "{\"ok\":true,\"value\":\"a much longer payload\"}";
                let hash = hex::encode(Sha256::digest(payload.as_bytes()));
                let chunk_bytes = 8u64;
                let chunks: Vec<&[u8]> = payload.as_bytes().chunks(chunk_bytes as usize).collect();
                broker.start_transfer(
                    &id,
                    &node_id,
                    payload.len() as u64,
                    chunk_bytes,
                    chunks.len() as u64,
                    &hash,
                );
                for (index, slice) in chunks.iter().enumerate() {
                    broker.chunk(&id, &node_id, index as u64, &STANDARD.encode(slice), slice.len() as u64);
                }
            },
            other => info!(command = other, "fake node has no canned reply for this command"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger("demos/logger.yaml")?;

    let cfg = resolve_config_path("demos/broker.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load broker config")?;

    let broker = Arc::new(Broker::new(cfg));
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive_fake_node(broker.clone(), rx));

    broker
        .register(
            "conn-1".into(),
            Arc::new(LoggingConnection { sent: tx }),
            NodeMetadata {
                device_id: Some("demo-node".into()),
                display_name: "demo node".into(),
                platform: "linux".into(),
                version: "0.1.0".into(),
                ..Default::default()
            },
        )
        .context("register demo node")?;
    info!("registered demo-node, {} connected", broker.list_connected().len());

    let direct = broker
        .invoke(
            "demo-node",
            "system.run",
            Some(serde_json::json!({"cmd": "echo ok"})),
            Some(2_000),
            None,
        )
        .await;
    info!(ok = direct.ok, payload = ?direct.payload_json, error = ?direct.error, "direct invoke resolved");

    let chunked = broker
        .invoke(
            "demo-node",
            "system.bigrun",
            Some(serde_json::json!({"cmd": "generate-report"})),
            Some(2_000),
            None,
        )
        .await;
    info!(ok = chunked.ok, payload = ?chunked.payload_json, error = ?chunked.error, "chunked invoke resolved");

    broker.unregister("conn-1");
    info!("unregistered demo-node, {} connected", broker.list_connected().len());

    Ok(())
}
