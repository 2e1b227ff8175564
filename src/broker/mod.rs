//! The broker facade: single entry point composing the registry,
//! invocation table, and chunked transfer engine behind one lock (spec §5).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub(crate) mod state;

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{select, time::sleep};

use crate::{
    cfg::config::Config,
    conn::Connection,
    error::BrokerError,
    invoke::{self, InvokeOutcome},
    registry::{self, NodeMetadata, NodeSession},
    transfer::{self, TransferResult},
    wire::Payload,
};
use state::BrokerState;

/// Owns the registry's three tables and the inflight-byte counter behind a
/// single `parking_lot::Mutex` (spec §5), and exposes the public operations
/// from §4. Grounded on the teacher's `client::pool_sessions::Pool`, which
/// plays the equivalent "one struct, many callers" role for live sessions.
pub struct Broker {
    state: Mutex<BrokerState>,
    config: Config,
}

impl Broker {
    pub fn new(config: Config) -> Self {
        Self { state: Mutex::new(BrokerState::default()), config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `register(conn, metadata) -> NodeSession` (spec §4.C).
    pub fn register(
        &self,
        conn_id: String,
        conn: Arc<dyn Connection>,
        metadata: NodeMetadata,
    ) -> Result<Arc<NodeSession>, BrokerError> {
        registry::register(&mut self.state.lock(), conn_id, conn, metadata)
    }

    /// `unregister(connId) -> nodeId | none` (spec §4.C).
    pub fn unregister(&self, conn_id: &str) -> Option<String> {
        registry::unregister(&mut self.state.lock(), conn_id)
    }

    /// `get(nodeId) -> NodeSession | none` (spec §4.C).
    pub fn get(&self, node_id: &str) -> Option<Arc<NodeSession>> {
        registry::get(&self.state.lock(), node_id)
    }

    /// `listConnected() -> snapshot list` (spec §4.C).
    pub fn list_connected(&self) -> Vec<Arc<NodeSession>> {
        registry::list_connected(&self.state.lock())
    }

    /// `sendEvent(nodeId, event, payload) -> bool` (spec §4.C).
    pub fn send_event(&self, node_id: &str, event: &str, payload: Value) -> bool {
        registry::send_event(&self.state.lock(), node_id, event, payload)
    }

    /// `invoke(nodeId, command, params?, timeoutMs?, idempotencyKey?) ->
    /// Result` (spec §4.D). Suspends the caller until resolution by reply,
    /// chunked-transfer completion, timeout, or node disconnect — everything
    /// else in the broker runs synchronously under the lock and resolves
    /// this future as a side effect.
    pub async fn invoke(
        &self,
        node_id: &str,
        command: &str,
        params: Option<Value>,
        timeout_ms: Option<u64>,
        idempotency_key: Option<String>,
    ) -> InvokeOutcome {
        let timeout_ms =
            timeout_ms.unwrap_or(self.config.timeouts.default_invoke_timeout_ms.as_millis() as u64);

        let (id, mut rx) = {
            let mut state = self.state.lock();
            match invoke::begin(&mut state, node_id, command, params, timeout_ms, idempotency_key) {
                Ok(v) => v,
                Err(e) => return InvokeOutcome::err(e),
            }
        };

        select! {
            res = &mut rx => Self::outcome_from_resolution(res),
            () = sleep(Duration::from_millis(timeout_ms)) => {
                let won = self.state.lock().take_pending(&id).is_some();
                if won {
                    InvokeOutcome::err(BrokerError::timeout())
                } else {
                    // A racing reply/transfer/unregister already resolved
                    // the channel under the lock; observe its outcome
                    // rather than reporting a spurious timeout.
                    Self::outcome_from_resolution(rx.await)
                }
            }
        }
    }

    fn outcome_from_resolution(
        res: Result<Result<Payload, BrokerError>, tokio::sync::oneshot::error::RecvError>,
    ) -> InvokeOutcome {
        match res {
            Ok(Ok(payload)) => InvokeOutcome::ok(payload),
            Ok(Err(e)) => InvokeOutcome::err(e),
            Err(_) => InvokeOutcome::err(BrokerError::timeout()),
        }
    }

    /// `handleInvokeResult(id, nodeId, ok, payload?, payloadJSON?, error?)
    /// -> bool` (spec §4.D).
    pub fn handle_invoke_result(
        &self,
        id: &str,
        node_id: &str,
        outcome: Result<Payload, BrokerError>,
    ) -> bool {
        invoke::resolve(&mut self.state.lock(), id, node_id, outcome)
    }

    /// `abortInvokeResultTransfer(id, nodeId, error?) -> bool` (spec §4.D).
    pub fn abort_invoke_result_transfer(
        &self,
        id: &str,
        node_id: &str,
        error: Option<BrokerError>,
    ) -> bool {
        invoke::abort(&mut self.state.lock(), id, node_id, error)
    }

    /// `start(id, nodeId, totalBytes, chunkBytes, chunkCount, sha256) ->
    /// TransferResult` (spec §4.E), using this broker's configured limits.
    #[allow(clippy::too_many_arguments)]
    pub fn start_transfer(
        &self,
        id: &str,
        node_id: &str,
        total_bytes: u64,
        chunk_bytes: u64,
        chunk_count: u64,
        sha256: &str,
    ) -> TransferResult {
        transfer::start(
            &mut self.state.lock(),
            id,
            node_id,
            total_bytes,
            chunk_bytes,
            chunk_count,
            sha256,
            &self.config.limits,
        )
    }

    /// `chunk(id, nodeId, index, data_b64, bytes) -> TransferResult`
    /// (spec §4.E).
    pub fn chunk(
        &self,
        id: &str,
        node_id: &str,
        index: u64,
        data_b64: &str,
        bytes: u64,
    ) -> TransferResult {
        transfer::chunk(&mut self.state.lock(), id, node_id, index, data_b64, bytes)
    }
}
