// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cfg::enums::{TransferEncoding, TransferFormat, WireErrorCode};

/// Server → node request (spec §6.1, event `node.invoke.request`).
/// Node → server reply (spec §6.2, `node.invoke.result`) and chunk frame
/// (spec §6.3, `node.invoke.result.chunk`).
///
/// Grounded on the teacher's opcode-discriminated `Pdu` enum
/// (`models::opcode::BhsOpcode` + `models::parse::Pdu`), adapted from a
/// binary BHS discriminant to serde's `tag = "type"` JSON discriminant
/// since this wire format is plain JSON, not a binary PDU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "node.invoke.request")]
    InvokeRequest {
        id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        command: String,
        #[serde(rename = "paramsJSON")]
        params_json: Option<String>,
        #[serde(rename = "timeoutMs", skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(rename = "idempotencyKey", skip_serializing_if = "Option::is_none")]
        idempotency_key: Option<String>,
    },

    #[serde(rename = "node.invoke.result")]
    InvokeResult {
        id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(rename = "payloadJSON", skip_serializing_if = "Option::is_none")]
        payload_json: Option<String>,
        #[serde(rename = "payloadTransfer", skip_serializing_if = "Option::is_none")]
        payload_transfer: Option<PayloadTransfer>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },

    #[serde(rename = "node.invoke.result.chunk")]
    InvokeResultChunk {
        id: String,
        #[serde(rename = "nodeId")]
        node_id: String,
        index: u64,
        data: String,
        bytes: u64,
    },

    /// Server → node fire-and-forget notification (spec §4.C `sendEvent`).
    /// Carries no request id of its own and expects no reply.
    #[serde(rename = "node.event")]
    Event {
        #[serde(rename = "nodeId")]
        node_id: String,
        event: String,
        payload: Value,
    },
}

impl WireMessage {
    /// The request id this frame carries, if any — `Event` frames have
    /// none since they expect no reply to correlate.
    pub fn id(&self) -> Option<&str> {
        match self {
            WireMessage::InvokeRequest { id, .. }
            | WireMessage::InvokeResult { id, .. }
            | WireMessage::InvokeResultChunk { id, .. } => Some(id),
            WireMessage::Event { .. } => None,
        }
    }

    pub fn node_id(&self) -> &str {
        match self {
            WireMessage::InvokeRequest { node_id, .. }
            | WireMessage::InvokeResult { node_id, .. }
            | WireMessage::InvokeResultChunk { node_id, .. }
            | WireMessage::Event { node_id, .. } => node_id,
        }
    }
}

/// The chunked-start form of a reply (spec §6.2), announcing a transfer
/// instead of carrying the payload inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadTransfer {
    pub format: TransferFormat,
    pub encoding: TransferEncoding,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    #[serde(rename = "chunkCount")]
    pub chunk_count: u64,
    pub sha256: String,
}

/// Remote application error, surfaced verbatim from the node (spec §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub code: WireErrorCode,
    pub message: String,
}
