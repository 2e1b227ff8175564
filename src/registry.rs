//! Node Registry (spec §4 component C).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{broker::state::BrokerState, conn::Connection, error::BrokerError};

/// Descriptive metadata carried by a node's hello/handshake (spec §3).
#[derive(Debug, Clone, Default)]
pub struct NodeMetadata {
    pub device_id: Option<String>,
    pub client_id: Option<String>,
    pub display_name: String,
    pub platform: String,
    pub version: String,
    pub device_fingerprint: Option<String>,
    pub remote_ip: Option<String>,
    pub capabilities: HashSet<String>,
    pub commands: HashSet<String>,
    pub permissions: Value,
    pub path_env: Option<String>,
}

impl NodeMetadata {
    /// `nodeId` is derived from metadata: device id if present, else
    /// client id (spec §4.C).
    fn derive_node_id(&self) -> Option<String> {
        self.device_id.clone().or_else(|| self.client_id.clone())
    }
}

/// One live bidirectional connection to a remote node (spec §3).
#[derive(Debug)]
pub struct NodeSession {
    pub node_id: String,
    pub conn_id: String,
    pub conn: Arc<dyn Connection>,
    pub metadata: NodeMetadata,
    pub connected_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `register(conn, metadata) -> NodeSession`. If a prior session with the
/// same `nodeId` exists it is unregistered first with reason "replaced"
/// (spec §4.C, §9 "Replacement semantics").
pub(crate) fn register(
    state: &mut BrokerState,
    conn_id: String,
    conn: Arc<dyn Connection>,
    metadata: NodeMetadata,
) -> Result<Arc<NodeSession>, BrokerError> {
    let node_id = metadata.derive_node_id().ok_or_else(|| {
        BrokerError::unavailable("metadata carries neither deviceId nor clientId")
    })?;

    if let Some(prior) = state.sessions_by_node.get(&node_id) {
        let prior_conn_id = prior.conn_id.clone();
        debug!(node_id = %node_id, prior_conn_id = %prior_conn_id, "replacing prior node session");
        unregister(state, &prior_conn_id);
    }

    let session = Arc::new(NodeSession {
        node_id: node_id.clone(),
        conn_id: conn_id.clone(),
        conn,
        metadata,
        connected_at_ms: now_ms(),
    });

    state.sessions_by_node.insert(node_id.clone(), session.clone());
    state.conn_to_node.insert(conn_id, node_id);

    Ok(session)
}

/// `unregister(connId) -> nodeId | none`. Fails every pending invoke and
/// transfer belonging to the departed node with `NOT_CONNECTED` (spec
/// §4.C, invariant 2).
pub(crate) fn unregister(state: &mut BrokerState, conn_id: &str) -> Option<String> {
    let node_id = state.conn_to_node.remove(conn_id)?;
    state.sessions_by_node.remove(&node_id);

    let dead_ids: Vec<String> = state
        .pending_invokes
        .iter()
        .filter(|(_, p)| p.node_id == node_id)
        .map(|(id, _)| id.clone())
        .collect();

    for id in dead_ids {
        if let Some(pending) = state.take_pending(&id) {
            let _ = pending.resolver.send(Err(BrokerError::not_connected()));
        }
    }

    let orphan_transfers: Vec<String> = state
        .transfers
        .iter()
        .filter(|(_, t)| t.node_id == node_id)
        .map(|(id, _)| id.clone())
        .collect();
    for id in orphan_transfers {
        state.drop_transfer(&id);
    }

    Some(node_id)
}

pub(crate) fn get(state: &BrokerState, node_id: &str) -> Option<Arc<NodeSession>> {
    state.sessions_by_node.get(node_id).cloned()
}

pub(crate) fn list_connected(state: &BrokerState) -> Vec<Arc<NodeSession>> {
    state.sessions_by_node.values().cloned().collect()
}

/// `sendEvent(nodeId, event, payload) -> bool`. Best-effort fire-and-forget
/// (spec §4.C).
pub(crate) fn send_event(
    state: &BrokerState,
    node_id: &str,
    event: &str,
    payload: Value,
) -> bool {
    let Some(session) = state.sessions_by_node.get(node_id) else {
        return false;
    };

    if session.conn.is_closed() {
        debug!(node_id = %node_id, event, "sendEvent skipped, connection already closed");
        return false;
    }

    let msg = crate::wire::WireMessage::Event {
        node_id: node_id.to_string(),
        event: event.to_string(),
        payload,
    };

    match session.conn.send(msg) {
        Ok(()) => true,
        Err(e) => {
            warn!(node_id = %node_id, event, error = %e, "sendEvent failed");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeConnection;

    fn meta(device_id: &str) -> NodeMetadata {
        NodeMetadata {
            device_id: Some(device_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut state = BrokerState::default();
        let conn = Arc::new(FakeConnection::default());
        let session =
            register(&mut state, "conn-1".into(), conn, meta("node-1")).expect("register");
        assert_eq!(session.node_id, "node-1");
        assert!(get(&state, "node-1").is_some());
        assert_eq!(state.conn_to_node.get("conn-1").map(String::as_str), Some("node-1"));
    }

    #[test]
    fn two_index_invariant_holds_after_mutation() {
        let mut state = BrokerState::default();
        register(&mut state, "c1".into(), Arc::new(FakeConnection::default()), meta("n1"))
            .expect("register n1");
        register(&mut state, "c2".into(), Arc::new(FakeConnection::default()), meta("n2"))
            .expect("register n2");
        unregister(&mut state, "c1");

        assert_eq!(state.sessions_by_node.len(), state.conn_to_node.len());
        assert!(get(&state, "n1").is_none());
        assert!(get(&state, "n2").is_some());
    }

    #[test]
    fn replacing_a_node_tears_down_the_prior_session() {
        let mut state = BrokerState::default();
        register(&mut state, "c1".into(), Arc::new(FakeConnection::default()), meta("n1"))
            .expect("register first");
        register(&mut state, "c2".into(), Arc::new(FakeConnection::default()), meta("n1"))
            .expect("register replacement");

        assert!(!state.conn_to_node.contains_key("c1"));
        assert_eq!(state.conn_to_node.get("c2").map(String::as_str), Some("n1"));
        assert_eq!(state.sessions_by_node.len(), 1);
    }

    #[test]
    fn send_event_false_when_node_absent() {
        let state = BrokerState::default();
        assert!(!send_event(&state, "missing", "ping", Value::Null));
    }

    #[test]
    fn send_event_short_circuits_on_closed_connection() {
        let mut state = BrokerState::default();
        let conn = Arc::new(FakeConnection::default());
        conn.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        register(&mut state, "c1".into(), conn.clone(), meta("n1")).expect("register");

        assert!(!send_event(&state, "n1", "ping", Value::Null));
        assert!(conn.sent.lock().expect("lock").is_empty());
    }
}
