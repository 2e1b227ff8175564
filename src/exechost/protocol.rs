//! Exec-host wire framing and HMAC signing (spec §4.F, §6.5).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// One JSON line sent to the local exec-host socket (spec §6.5 `exec`).
#[derive(Debug, Serialize)]
pub(crate) struct ExecRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub nonce: String,
    pub ts: u64,
    pub hmac: String,
    #[serde(rename = "requestJson")]
    pub request_json: String,
}

/// Either leg of the exec-host reply stream (spec §4.F): zero-or-one
/// `exec-pending` followed by exactly one `exec-res`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum ExecReply {
    #[serde(rename = "exec-pending")]
    Pending {
        #[allow(dead_code)]
        id: String,
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "exec-res")]
    Res {
        #[allow(dead_code)]
        id: String,
        #[serde(default)]
        payload: Value,
    },
}

/// `hmac = HMAC-SHA256(token, nonce + ":" + ts + ":" + requestJson)`,
/// lowercase hex (spec §4.F).
pub(crate) fn sign(token: &str, nonce: &str, ts: u64, request_json: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(nonce.as_bytes());
    mac.update(b":");
    mac.update(ts.to_string().as_bytes());
    mac.update(b":");
    mac.update(request_json.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a signed request and its timestamp freshness. Not exercised by
/// the client itself (it only signs), but kept alongside `sign` as the
/// receiver-side half of the open question in spec §9: the protocol never
/// specified a skew window, so this crate picks one (`skew_secs`,
/// `Config::timeouts.hmac_skew_secs`) rather than silently accepting any
/// `ts`.
#[allow(dead_code)]
pub(crate) fn verify(
    token: &str,
    nonce: &str,
    ts: u64,
    request_json: &str,
    received_hmac: &str,
    now_ms: u64,
    skew_secs: u64,
) -> bool {
    let expected = sign(token, nonce, ts, request_json);
    if expected != received_hmac {
        return false;
    }
    let skew_ms = skew_secs.saturating_mul(1000);
    now_ms.abs_diff(ts) <= skew_ms
}
