// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde::{Deserialize, Serialize};

use crate::cfg::enums::WireErrorCode;

/// The `{ code, message }` pair carried in every failed `invoke` result
/// (spec §6.1/§7). Implements `std::error::Error` via `thiserror` so the
/// exec-host client's transport-level failures can use `?` the same way
/// the rest of the crate does, even though a `BrokerError` returned from a
/// public broker operation is always a *value*, never a propagated `Err`.
#[derive(thiserror::Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct BrokerError {
    pub code: WireErrorCode,
    pub message: String,
}

impl BrokerError {
    pub fn new(code: WireErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn not_connected() -> Self {
        Self::new(WireErrorCode::NotConnected, "node disconnected")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(WireErrorCode::Unavailable, message)
    }

    pub fn timeout() -> Self {
        Self::new(WireErrorCode::Timeout, "invoke timed out")
    }

    pub fn invalid_request(reason: ProtocolErrorReason) -> Self {
        Self::new(WireErrorCode::InvalidRequest, reason.message())
    }

    pub fn awaiting_node_approval() -> Self {
        Self::new(
            WireErrorCode::AwaitingNodeApproval,
            "deadline exceeded while awaiting node approval",
        )
    }
}

/// The five named protocol-error reasons from spec §7, kept as an enum so
/// tests can match on the reason rather than string-compare messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorReason {
    UnknownInvokeId,
    ChunkOutOfOrder,
    ChunkBytesMismatch,
    PayloadTooLarge,
    HashMismatch,
}

impl ProtocolErrorReason {
    pub fn message(self) -> &'static str {
        match self {
            ProtocolErrorReason::UnknownInvokeId => "unknown invoke id",
            ProtocolErrorReason::ChunkOutOfOrder => "chunk out of order",
            ProtocolErrorReason::ChunkBytesMismatch => "chunk bytes mismatch",
            ProtocolErrorReason::PayloadTooLarge => "payload too large",
            ProtocolErrorReason::HashMismatch => "hash mismatch",
        }
    }
}

/// Transport-level failures from sending on a `Connection`. Distinct from
/// `BrokerError` because these never appear on the wire — they only ever
/// get mapped into a `BrokerError::unavailable(..)` at the call site.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    Other(String),
}
