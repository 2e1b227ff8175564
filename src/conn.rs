//! Connection Abstraction (spec §4 component A).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Debug;

use crate::{error::SendError, wire::WireMessage};

/// A framed, bidirectional duplex channel to one remote node.
///
/// The real transport (WS/TCP upgrade, authentication) is explicitly out
/// of scope (spec §1) and lives outside this crate; callers hand the
/// broker anything implementing `send`, and feed inbound frames back in
/// through `NodeRegistry`/`InvocationTable`/`TransferTable` methods rather
/// than through this trait. Grounded on the teacher's `ClientConnection`
/// send/receive split (`client::client::ClientConnection::{send_request,
/// read_response}`), reduced to the single outbound primitive this broker
/// actually needs since inbound framing/demuxing is the transport's job.
pub trait Connection: Send + Sync + Debug {
    /// Sends one structured message. Best-effort: implementations should
    /// not block indefinitely: the broker treats any `Err` as an
    /// immediate `UNAVAILABLE`.
    fn send(&self, msg: WireMessage) -> Result<(), SendError>;

    /// True once the connection has observed its transport close. The
    /// registry does not poll this directly (teardown is driven by an
    /// explicit `unregister` call from the transport layer) but it is
    /// exposed so a caller can short-circuit `sendEvent` without attempting
    /// a doomed send.
    fn is_closed(&self) -> bool {
        false
    }
}
