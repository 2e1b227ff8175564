//! In-memory `Connection` fake shared by this crate's own unit tests.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Mutex, atomic::{AtomicBool, Ordering}};

use crate::{conn::Connection, error::SendError, wire::WireMessage};

#[derive(Debug, Default)]
pub(crate) struct FakeConnection {
    pub sent: Mutex<Vec<WireMessage>>,
    pub fail: AtomicBool,
    pub closed: AtomicBool,
}

impl Connection for FakeConnection {
    fn send(&self, msg: WireMessage) -> Result<(), SendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        self.sent.lock().expect("fake connection mutex poisoned").push(msg);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
