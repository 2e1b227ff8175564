// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use tokio::sync::oneshot;

use crate::{error::BrokerError, registry::NodeSession, transfer::PendingInvokeTransfer};

/// One outstanding `invoke` call (spec §3 `PendingInvoke`).
///
/// The resolver is a one-shot channel: exactly one of {reply, timeout,
/// abort, node-disconnect} takes ownership of `resolver` by removing this
/// entry from `BrokerState::pending_invokes` and calling `.send(..)` on it.
pub(crate) struct PendingInvoke {
    pub node_id: String,
    #[allow(dead_code)]
    pub command: String,
    pub resolver: oneshot::Sender<Result<crate::wire::Payload, BrokerError>>,
}

/// The single coordinator-guarded core the broker's three tables and the
/// global inflight-byte counter live in (spec §5: "Implementations must
/// serialize mutation of the registry's three tables and the inflight
/// counter ... Inter-table transitions ... must be atomic").
///
/// Grounded on the teacher's `client::pool_sessions::Pool`, which plays the
/// same "one struct owns every live session/connection index" role; the
/// teacher uses independent `DashMap`s per table because none of its
/// cross-table transitions need to be atomic, whereas `start()` rejecting a
/// transfer while observing the invocation table (spec §4.E step 1) does.
/// A single `parking_lot::Mutex` (never held across an `.await`) gives that
/// atomicity directly, the same choice the `sblanchard-SerialAgent` gateway
/// router makes for its own pending-request table.
#[derive(Default)]
pub(crate) struct BrokerState {
    pub sessions_by_node: HashMap<String, Arc<NodeSession>>,
    pub conn_to_node: HashMap<String, String>,
    pub pending_invokes: HashMap<String, PendingInvoke>,
    pub transfers: HashMap<String, PendingInvokeTransfer>,
    pub inflight_bytes: u64,
}

impl BrokerState {
    /// Removes a pending invoke and any associated transfer, releasing its
    /// inflight bytes. Used by every teardown path (timeout, abort,
    /// unregister, transfer-completion) so the "never drop below zero"
    /// invariant (spec §5) has one implementation.
    pub fn take_pending(&mut self, id: &str) -> Option<PendingInvoke> {
        let entry = self.pending_invokes.remove(id);
        self.drop_transfer(id);
        entry
    }

    pub fn drop_transfer(&mut self, id: &str) {
        if let Some(t) = self.transfers.remove(id) {
            self.inflight_bytes = self.inflight_bytes.saturating_sub(t.total_bytes);
        }
    }
}
