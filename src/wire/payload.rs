// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use serde_json::Value;

/// A result payload the node can hand back in one of three shapes (design
/// note §9 of SPEC_FULL.md): a decoded JSON value, a pre-serialized JSON
/// string (kept serialized so chunked assembly never double-parses), or
/// nothing at all.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Decoded(Value),
    Serialized(String),
    Empty,
}

impl Payload {
    /// The `payloadJSON` string to place on an outbound/resolved frame.
    /// `Decoded` values are serialized once, here, at the boundary.
    pub fn into_json_string(self) -> Option<String> {
        match self {
            Payload::Decoded(v) => Some(v.to_string()),
            Payload::Serialized(s) => Some(s),
            Payload::Empty => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Payload::Decoded(v)
    }
}
