//! Wire-level message schemas the broker produces and consumes (spec §6).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod message;
pub mod payload;

pub use message::{PayloadTransfer, WireError, WireMessage};
pub use payload::Payload;
