// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// The five wire error codes a broker operation can resolve with.
///
/// Mirrors spec §6.4 verbatim; kept as a string-serialized enum so it
/// round-trips through the JSON wire format unchanged.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireErrorCode {
    #[serde(rename = "NOT_CONNECTED")]
    NotConnected,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "AWAITING_NODE_APPROVAL")]
    AwaitingNodeApproval,
}

impl fmt::Display for WireErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WireErrorCode::NotConnected => "NOT_CONNECTED",
            WireErrorCode::Unavailable => "UNAVAILABLE",
            WireErrorCode::Timeout => "TIMEOUT",
            WireErrorCode::InvalidRequest => "INVALID_REQUEST",
            WireErrorCode::AwaitingNodeApproval => "AWAITING_NODE_APPROVAL",
        })
    }
}

/// Chunk transfer encoding declared by a `payloadTransfer` frame.
///
/// Only one combination is specified by spec §6.2, but the field is kept as
/// an enum (not a bare string) so a future transfer format cannot silently
/// be accepted by a codec that forgot to check it.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFormat {
    #[serde(rename = "json")]
    Json,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    #[serde(rename = "base64")]
    Base64,
}
