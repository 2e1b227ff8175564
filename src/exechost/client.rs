//! Exec-host approval-pending client (spec §4.F component F).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use rand::RngExt;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    select,
    time::{Instant, sleep_until},
};
use tracing::warn;
use uuid::Uuid;

use crate::{
    exechost::protocol::{ExecReply, ExecRequest, sign},
    state_machine::common::Transition,
};

/// Terminal result of one exec-host round trip (spec §8 invariant 6).
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// `exec-res` arrived; carries its payload.
    Resolved(Value),
    /// Hard failure: connection closed/errored, or timed out while Armed.
    Null,
    /// Timed out while Pending (spec §4.F Pending/timeout row).
    PendingTimeout,
}

impl ExecOutcome {
    /// The `{ ok: false, pending: true, payload: { reason: "approval-timeout" } }`
    /// shape a caller would see for `PendingTimeout` (spec §4.F).
    pub fn pending_timeout_payload() -> Value {
        serde_json::json!({ "ok": false, "pending": true, "payload": { "reason": "approval-timeout" } })
    }
}

/// Armed/Pending state (spec §4.F table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecState {
    Armed,
    Pending,
}

/// One inbound event fed to the transition table.
enum ExecEvent {
    Pending(Value),
    Res(Value),
    Timeout,
    ConnError,
}

/// What the driver loop must do in response to a transition.
enum ExecDecision {
    InstallPendingTimer(Duration),
    NoOp,
    Resolve(ExecOutcome),
}

/// Pure Armed/Pending decision table (spec §4.F), kept free of socket I/O
/// the same way the teacher separates `NopStates` transitions from
/// `NopCtx::recieve_nop_in`'s actual read — so the table is exhaustively
/// unit-testable without a running socket.
fn transition(
    state: ExecState,
    event: ExecEvent,
    default_pending_timeout: Duration,
) -> Transition<ExecState, ExecDecision> {
    match (state, event) {
        (ExecState::Armed, ExecEvent::Pending(payload)) => {
            let extended = payload
                .get("timeoutMs")
                .and_then(Value::as_u64)
                .map(Duration::from_millis)
                .unwrap_or(default_pending_timeout);
            Transition::Next(ExecState::Pending, ExecDecision::InstallPendingTimer(extended))
        },
        (ExecState::Armed, ExecEvent::Res(payload)) => {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Resolved(payload)))
        },
        (ExecState::Armed, ExecEvent::Timeout | ExecEvent::ConnError) => {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Null))
        },
        (ExecState::Pending, ExecEvent::Pending(_)) => {
            Transition::Stay(ExecDecision::NoOp)
        },
        (ExecState::Pending, ExecEvent::Res(payload)) => {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Resolved(payload)))
        },
        (ExecState::Pending, ExecEvent::Timeout) => {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::PendingTimeout))
        },
        (ExecState::Pending, ExecEvent::ConnError) => {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Null))
        },
    }
}

/// Runs one exec-host round trip to completion: signs and sends the
/// `exec` frame, then drives the Armed/Pending table against the reply
/// stream until resolution. `on_pending` is invoked at most once, the
/// first time an `exec-pending` frame arrives.
pub async fn run(
    socket_path: &str,
    token: &str,
    request_json: &str,
    base_timeout: Duration,
    default_pending_timeout: Duration,
    mut on_pending: impl FnMut(Value) + Send,
) -> Result<ExecOutcome> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect exec-host socket at {socket_path}"))?;
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let id = Uuid::new_v4().to_string();
    let mut nonce_bytes = [0u8; 16];
    rand::rng().fill(&mut nonce_bytes);
    let nonce = hex::encode(nonce_bytes);
    let ts = now_ms();
    let hmac = sign(token, &nonce, ts, request_json);

    let req = ExecRequest {
        kind: "exec",
        id,
        nonce,
        ts,
        hmac,
        request_json: request_json.to_string(),
    };
    let line = serde_json::to_string(&req).context("serialize exec request")? + "\n";
    wr.write_all(line.as_bytes()).await.context("send exec request")?;

    let mut state = ExecState::Armed;
    let mut deadline = Instant::now() + base_timeout;

    loop {
        let event = select! {
            line = lines.next_line() => match line {
                Ok(Some(raw)) => match serde_json::from_str::<ExecReply>(&raw) {
                    Ok(ExecReply::Pending { payload, .. }) => ExecEvent::Pending(payload),
                    Ok(ExecReply::Res { payload, .. }) => ExecEvent::Res(payload),
                    Err(e) => {
                        warn!(error = %e, "malformed exec-host frame");
                        ExecEvent::ConnError
                    },
                },
                Ok(None) => ExecEvent::ConnError,
                Err(e) => {
                    warn!(error = %e, "exec-host socket read error");
                    ExecEvent::ConnError
                },
            },
            () = sleep_until(deadline) => ExecEvent::Timeout,
        };

        let first_pending_payload =
            if state == ExecState::Armed { if let ExecEvent::Pending(ref p) = event { Some(p.clone()) } else { None } } else { None };

        match transition(state, event, default_pending_timeout) {
            Transition::Next(next, ExecDecision::InstallPendingTimer(extra)) => {
                state = next;
                deadline = Instant::now() + extra;
                if let Some(payload) = first_pending_payload {
                    on_pending(payload);
                }
            },
            Transition::Stay(ExecDecision::NoOp) => {},
            Transition::Done(ExecDecision::Resolve(outcome)) => return Ok(outcome),
            _ => unreachable!("transition table only produces the decisions matched above"),
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_with_timeout(ms: u64) -> Value {
        serde_json::json!({ "timeoutMs": ms })
    }

    #[test]
    fn armed_pending_installs_payload_timeout() {
        let t = transition(ExecState::Armed, ExecEvent::Pending(payload_with_timeout(400)), Duration::from_millis(300_000));
        match t {
            Transition::Next(ExecState::Pending, ExecDecision::InstallPendingTimer(d)) => {
                assert_eq!(d, Duration::from_millis(400));
            },
            _ => panic!("expected Next(Pending, InstallPendingTimer(400ms))"),
        }
    }

    #[test]
    fn armed_pending_falls_back_to_default_timeout() {
        let t = transition(ExecState::Armed, ExecEvent::Pending(Value::Null), Duration::from_millis(300_000));
        match t {
            Transition::Next(ExecState::Pending, ExecDecision::InstallPendingTimer(d)) => {
                assert_eq!(d, Duration::from_millis(300_000));
            },
            _ => panic!("expected default pending timeout"),
        }
    }

    #[test]
    fn armed_timeout_resolves_null() {
        let t = transition(ExecState::Armed, ExecEvent::Timeout, Duration::from_millis(300_000));
        assert!(matches!(t, Transition::Done(ExecDecision::Resolve(ExecOutcome::Null))));
    }

    #[test]
    fn pending_ignores_repeated_pending_without_resolving() {
        let t = transition(ExecState::Pending, ExecEvent::Pending(Value::Null), Duration::from_millis(300_000));
        assert!(matches!(t, Transition::Stay(ExecDecision::NoOp)));
    }

    #[test]
    fn pending_timeout_resolves_approval_timeout() {
        let t = transition(ExecState::Pending, ExecEvent::Timeout, Duration::from_millis(300_000));
        assert!(matches!(t, Transition::Done(ExecDecision::Resolve(ExecOutcome::PendingTimeout))));
    }

    #[test]
    fn pending_res_resolves_with_payload() {
        let payload = serde_json::json!({"ok": true});
        let t = transition(ExecState::Pending, ExecEvent::Res(payload.clone()), Duration::from_millis(300_000));
        match t {
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Resolved(p))) => assert_eq!(p, payload),
            _ => panic!("expected Resolved(payload)"),
        }
    }

    #[test]
    fn either_state_conn_error_resolves_null() {
        assert!(matches!(
            transition(ExecState::Armed, ExecEvent::ConnError, Duration::from_millis(1)),
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Null))
        ));
        assert!(matches!(
            transition(ExecState::Pending, ExecEvent::ConnError, Duration::from_millis(1)),
            Transition::Done(ExecDecision::Resolve(ExecOutcome::Null))
        ));
    }

    /// Spec §8 seed scenario S6, end to end over a real Unix socket: a
    /// 100ms base timer, `exec-pending` at 50ms extending to 400ms, then
    /// `exec-res` at 300ms. The final resolution must be the `exec-res`
    /// value, not a timeout.
    #[tokio::test]
    async fn s6_exec_pending_extends_timeout_end_to_end() {
        use std::sync::atomic::{AtomicU64, Ordering};

        use tokio::net::UnixListener;

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("exechost-s6-{}-{n}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).expect("bind exec-host test socket");

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let (rd, mut wr) = stream.into_split();
            let mut reader = BufReader::new(rd).lines();
            let request_line = reader.next_line().await.expect("read").expect("request line");
            let req: serde_json::Value = serde_json::from_str(&request_line).expect("parse request");
            assert_eq!(req["type"], "exec");

            tokio::time::sleep(Duration::from_millis(50)).await;
            wr.write_all(b"{\"type\":\"exec-pending\",\"id\":\"x\",\"payload\":{\"timeoutMs\":400}}\n")
                .await
                .expect("send exec-pending");

            tokio::time::sleep(Duration::from_millis(250)).await;
            wr.write_all(b"{\"type\":\"exec-res\",\"id\":\"x\",\"payload\":{\"ok\":true}}\n")
                .await
                .expect("send exec-res");
        });

        let pending_seen = std::sync::Arc::new(std::sync::Mutex::new(None));
        let pending_seen_cb = pending_seen.clone();
        let outcome = run(
            path.to_str().expect("utf8 path"),
            "shared-secret",
            "{\"cmd\":\"echo ok\"}",
            Duration::from_millis(100),
            Duration::from_millis(300_000),
            move |payload| *pending_seen_cb.lock().expect("lock") = Some(payload),
        )
        .await
        .expect("run exec-host round trip");

        server.await.expect("server task");
        let _ = std::fs::remove_file(&path);

        assert_eq!(
            pending_seen.lock().expect("lock").clone(),
            Some(serde_json::json!({"timeoutMs": 400}))
        );
        assert_eq!(outcome, ExecOutcome::Resolved(serde_json::json!({"ok": true})));
    }
}
