//! Invocation Table (spec §4 component D).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    broker::state::{BrokerState, PendingInvoke},
    error::BrokerError,
    wire::{Payload, WireMessage},
};

/// The caller-facing result of an `invoke` call (spec §4.D).
///
/// Grounded on the teacher's `NopCtx`/`LoginCtx` "one outcome per exchange"
/// shape, and on the `sblanchard-SerialAgent` `ToolRouteResult` for the
/// concrete ok/payload/error split returned to a caller awaiting a
/// node round trip.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub ok: bool,
    pub payload_json: Option<String>,
    pub error: Option<BrokerError>,
}

impl InvokeOutcome {
    pub(crate) fn ok(payload: Payload) -> Self {
        Self { ok: true, payload_json: payload.into_json_string(), error: None }
    }

    pub(crate) fn err(error: BrokerError) -> Self {
        Self { ok: false, payload_json: None, error: Some(error) }
    }
}

/// Step 1-4 of `invoke()` (spec §4.D): look up the node, allocate a fresh
/// `requestId`, build and send the request frame, and register the
/// `PendingInvoke`. Everything here is synchronous — the suspension point
/// lives in the caller, which races the returned receiver against a timer.
pub(crate) fn begin(
    state: &mut BrokerState,
    node_id: &str,
    command: &str,
    params: Option<Value>,
    timeout_ms: u64,
    idempotency_key: Option<String>,
) -> Result<(String, oneshot::Receiver<Result<Payload, BrokerError>>), BrokerError> {
    let session =
        state.sessions_by_node.get(node_id).cloned().ok_or_else(BrokerError::not_connected)?;

    let request_id = Uuid::new_v4().to_string();
    let msg = WireMessage::InvokeRequest {
        id: request_id.clone(),
        node_id: node_id.to_string(),
        command: command.to_string(),
        params_json: params.map(|v| v.to_string()),
        timeout_ms: Some(timeout_ms),
        idempotency_key,
    };

    session
        .conn
        .send(msg)
        .map_err(|e| BrokerError::unavailable(format!("failed to send invoke to node: {e}")))?;

    let (tx, rx) = oneshot::channel();
    state.pending_invokes.insert(request_id.clone(), PendingInvoke {
        node_id: node_id.to_string(),
        command: command.to_string(),
        resolver: tx,
    });

    Ok((request_id, rx))
}

/// Resolves a pending invoke if-and-only-if `node_id` matches the one it
/// was issued to (spec §4.D: "prevents cross-node spoofing"). Returns
/// `false` for an unknown id (silently discarded, never a crash) or a
/// node mismatch.
pub(crate) fn resolve(
    state: &mut BrokerState,
    id: &str,
    node_id: &str,
    outcome: Result<Payload, BrokerError>,
) -> bool {
    let owned_by_node =
        state.pending_invokes.get(id).map(|p| p.node_id == node_id).unwrap_or(false);
    if !owned_by_node {
        return false;
    }
    match state.take_pending(id) {
        Some(pending) => {
            let _ = pending.resolver.send(outcome);
            true
        },
        None => false,
    }
}

/// `abortInvokeResultTransfer(id, nodeId, error?) -> bool` (spec §4.D).
/// Resolves a matching pending invoke with the supplied (or default)
/// error; if only a transfer exists, just reclaims its bytes.
pub(crate) fn abort(
    state: &mut BrokerState,
    id: &str,
    node_id: &str,
    error: Option<BrokerError>,
) -> bool {
    let err = error.unwrap_or_else(|| BrokerError::unavailable("node invoke aborted"));
    if resolve(state, id, node_id, Err(err)) {
        return true;
    }
    if state.transfers.get(id).is_some_and(|t| t.node_id == node_id) {
        state.drop_transfer(id);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry, test_support::FakeConnection};
    use std::sync::Arc;

    fn registered(state: &mut BrokerState, node_id: &str) {
        registry::register(
            state,
            format!("conn-{node_id}"),
            Arc::new(FakeConnection::default()),
            crate::registry::NodeMetadata {
                device_id: Some(node_id.to_string()),
                ..Default::default()
            },
        )
        .expect("register");
    }

    #[test]
    fn begin_fails_fast_when_node_absent() {
        let mut state = BrokerState::default();
        let err = begin(&mut state, "missing", "system.run", None, 5000, None).expect_err("should fail fast");
        assert_eq!(err.code, crate::cfg::enums::WireErrorCode::NotConnected);
    }

    #[test]
    fn begin_registers_pending_and_sends_frame() {
        let mut state = BrokerState::default();
        registered(&mut state, "node-1");

        let (id, _rx) =
            begin(&mut state, "node-1", "system.run", None, 5000, None).expect("begin");
        assert!(state.pending_invokes.contains_key(&id));
    }

    #[test]
    fn resolve_rejects_cross_node_spoofing() {
        let mut state = BrokerState::default();
        registered(&mut state, "node-1");
        let (id, _rx) = begin(&mut state, "node-1", "cmd", None, 5000, None).expect("begin");

        let resolved = resolve(&mut state, &id, "node-2", Ok(Payload::Empty));
        assert!(!resolved);
        assert!(state.pending_invokes.contains_key(&id));
    }

    #[test]
    fn resolve_unknown_id_is_a_noop() {
        let mut state = BrokerState::default();
        assert!(!resolve(&mut state, "nope", "node-1", Ok(Payload::Empty)));
    }

    #[tokio::test]
    async fn resolve_delivers_outcome_to_waiter() {
        let mut state = BrokerState::default();
        registered(&mut state, "node-1");
        let (id, rx) = begin(&mut state, "node-1", "cmd", None, 5000, None).expect("begin");

        assert!(resolve(&mut state, &id, "node-1", Ok(Payload::Serialized("\"hi\"".into()))));
        let outcome = rx.await.expect("resolver fired");
        assert_eq!(outcome.expect("ok result").into_json_string(), Some("\"hi\"".into()));
    }

    #[test]
    fn abort_reclaims_transfer_bytes_without_pending_invoke() {
        let mut state = BrokerState::default();
        state.transfers.insert(
            "t1".into(),
            crate::transfer::PendingInvokeTransfer::new_for_test("node-1", 10, "abc"),
        );
        state.inflight_bytes = 10;

        let resolved = abort(&mut state, "t1", "node-1", None);
        assert!(!resolved);
        assert_eq!(state.inflight_bytes, 0);
        assert!(!state.transfers.contains_key("t1"));
    }
}
