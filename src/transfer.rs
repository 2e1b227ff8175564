//! Chunked Transfer Engine (spec §4 component E).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};

use crate::{
    broker::state::BrokerState,
    cfg::config::Limits,
    error::{BrokerError, ProtocolErrorReason},
    wire::Payload,
};

/// One outstanding chunked result assembly (spec §3 `PendingInvokeTransfer`).
///
/// Grounded on the teacher's streaming SCSI data-out assembly
/// (`models::data::request::ScsiDataOut`, `control_block::write`), which
/// accumulates offset-tagged buffers against a declared total length —
/// generalized here from SCSI data-out PDUs to base64 JSON chunk frames,
/// with `sha2::Sha256` added for end-to-end integrity since the wire
/// protocol declares a `sha256` digest the PDU format does not.
pub(crate) struct PendingInvokeTransfer {
    pub node_id: String,
    pub total_bytes: u64,
    #[allow(dead_code)]
    pub chunk_bytes: u64,
    pub chunk_count: u64,
    pub next_index: u64,
    pub bytes_received: u64,
    pub expected_sha256: String,
    hasher: Sha256,
    chunks: Vec<Vec<u8>>,
}

impl PendingInvokeTransfer {
    fn new(
        node_id: &str,
        total_bytes: u64,
        chunk_bytes: u64,
        chunk_count: u64,
        sha256: &str,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            total_bytes,
            chunk_bytes,
            chunk_count,
            next_index: 0,
            bytes_received: 0,
            expected_sha256: sha256.to_lowercase(),
            hasher: Sha256::new(),
            chunks: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(node_id: &str, total_bytes: u64, sha256: &str) -> Self {
        Self::new(node_id, total_bytes, total_bytes, 1, sha256)
    }
}

/// The outcome of `start()`/`chunk()` (spec §4.E `TransferResult`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub ok: bool,
    pub reason: Option<ProtocolErrorReason>,
}

impl TransferResult {
    fn accepted() -> Self {
        Self { ok: true, reason: None }
    }

    fn rejected(reason: ProtocolErrorReason) -> Self {
        Self { ok: false, reason: Some(reason) }
    }
}

/// Resolves the owning invoke with `INVALID_REQUEST` (spec §4.E: "each
/// failure resolves the owning PendingInvoke"). A no-op if no matching
/// pending invoke exists (e.g. validation #1 of `start`, where there is no
/// owner to resolve).
fn fail_owning_invoke(
    state: &mut BrokerState,
    id: &str,
    node_id: &str,
    reason: ProtocolErrorReason,
) {
    crate::invoke::resolve(state, id, node_id, Err(BrokerError::invalid_request(reason)));
}

/// `start(id, nodeId, totalBytes, chunkBytes, chunkCount, sha256, limits)`
/// (spec §4.E).
#[allow(clippy::too_many_arguments)]
pub(crate) fn start(
    state: &mut BrokerState,
    id: &str,
    node_id: &str,
    total_bytes: u64,
    chunk_bytes: u64,
    chunk_count: u64,
    sha256: &str,
    limits: &Limits,
) -> TransferResult {
    let owned_by_node =
        state.pending_invokes.get(id).map(|p| p.node_id == node_id).unwrap_or(false);
    if !owned_by_node {
        return TransferResult::rejected(ProtocolErrorReason::UnknownInvokeId);
    }

    if state.transfers.contains_key(id) {
        fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkOutOfOrder);
        return TransferResult::rejected(ProtocolErrorReason::ChunkOutOfOrder);
    }

    if total_bytes > limits.max_invoke_result_bytes {
        fail_owning_invoke(state, id, node_id, ProtocolErrorReason::PayloadTooLarge);
        return TransferResult::rejected(ProtocolErrorReason::PayloadTooLarge);
    }

    if state.inflight_bytes + total_bytes > limits.max_inflight_bytes {
        fail_owning_invoke(state, id, node_id, ProtocolErrorReason::PayloadTooLarge);
        return TransferResult::rejected(ProtocolErrorReason::PayloadTooLarge);
    }

    state.transfers.insert(
        id.to_string(),
        PendingInvokeTransfer::new(node_id, total_bytes, chunk_bytes, chunk_count, sha256),
    );
    state.inflight_bytes += total_bytes;
    TransferResult::accepted()
}

/// `chunk(id, nodeId, index, data_b64, bytes)` (spec §4.E).
pub(crate) fn chunk(
    state: &mut BrokerState,
    id: &str,
    node_id: &str,
    index: u64,
    data_b64: &str,
    bytes: u64,
) -> TransferResult {
    let transfer_owned_by_node =
        state.transfers.get(id).map(|t| t.node_id == node_id).unwrap_or(false);
    if !transfer_owned_by_node {
        let invoke_on_same_node =
            state.pending_invokes.get(id).map(|p| p.node_id == node_id).unwrap_or(false);
        if invoke_on_same_node {
            fail_owning_invoke(state, id, node_id, ProtocolErrorReason::UnknownInvokeId);
        }
        return TransferResult::rejected(ProtocolErrorReason::UnknownInvokeId);
    }

    {
        let t = state.transfers.get(id).expect("checked above");
        if index != t.next_index || index >= t.chunk_count {
            fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkOutOfOrder);
            return TransferResult::rejected(ProtocolErrorReason::ChunkOutOfOrder);
        }
    }

    let decoded = match STANDARD.decode(data_b64) {
        Ok(d) if d.len() as u64 == bytes => d,
        _ => {
            fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkBytesMismatch);
            return TransferResult::rejected(ProtocolErrorReason::ChunkBytesMismatch);
        },
    };

    {
        let t = state.transfers.get(id).expect("checked above");
        if t.bytes_received + decoded.len() as u64 > t.total_bytes {
            fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkBytesMismatch);
            return TransferResult::rejected(ProtocolErrorReason::ChunkBytesMismatch);
        }
    }

    let (next_index, chunk_count, bytes_received, total_bytes, expected_sha256) = {
        let t = state.transfers.get_mut(id).expect("checked above");
        t.hasher.update(&decoded);
        t.bytes_received += decoded.len() as u64;
        t.chunks.push(decoded);
        t.next_index += 1;
        (t.next_index, t.chunk_count, t.bytes_received, t.total_bytes, t.expected_sha256.clone())
    };

    if next_index != chunk_count {
        return TransferResult::accepted();
    }

    if bytes_received != total_bytes {
        fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkBytesMismatch);
        return TransferResult::rejected(ProtocolErrorReason::ChunkBytesMismatch);
    }

    let hash_hex = {
        let t = state.transfers.get(id).expect("checked above");
        hex::encode(t.hasher.clone().finalize())
    };
    if hash_hex != expected_sha256 {
        fail_owning_invoke(state, id, node_id, ProtocolErrorReason::HashMismatch);
        return TransferResult::rejected(ProtocolErrorReason::HashMismatch);
    }

    let assembled = {
        let t = state.transfers.get(id).expect("checked above");
        let mut buf = Vec::with_capacity(t.total_bytes as usize);
        for c in &t.chunks {
            buf.extend_from_slice(c);
        }
        buf
    };

    let payload_json = match String::from_utf8(assembled) {
        Ok(s) => s,
        Err(_) => {
            fail_owning_invoke(state, id, node_id, ProtocolErrorReason::ChunkBytesMismatch);
            return TransferResult::rejected(ProtocolErrorReason::ChunkBytesMismatch);
        },
    };

    crate::invoke::resolve(state, id, node_id, Ok(Payload::Serialized(payload_json)));
    TransferResult::accepted()
}
