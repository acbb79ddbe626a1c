// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The state machine and login-sequence handling shared by both broker
//! variants (§4.8).

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BrokerState {
    Offline = 0,
    Connecting = 1,
    Connected = 2,
    Stopped = 3,
}

impl BrokerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BrokerState::Offline,
            1 => BrokerState::Connecting,
            2 => BrokerState::Connected,
            _ => BrokerState::Stopped,
        }
    }
}

/// An atomically-readable [`BrokerState`] cell, shared between the broker's
/// background task and whatever code inspects its status.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(initial: BrokerState) -> Self {
        StateCell(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> BrokerState {
        BrokerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: BrokerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Prepends `login_sequence` to `payload` the first time this is called
/// after a fresh connect; `sent` tracks whether that has already happened
/// for the current connection.
pub fn frame_with_login<'a>(payload: &'a [u8], login_sequence: Option<&[u8]>, sent: &mut bool) -> std::borrow::Cow<'a, [u8]> {
    match (login_sequence, *sent) {
        (Some(seq), false) if !seq.is_empty() => {
            *sent = true;
            let mut out = Vec::with_capacity(seq.len() + payload.len());
            out.extend_from_slice(seq);
            out.extend_from_slice(payload);
            std::borrow::Cow::Owned(out)
        },
        _ => {
            *sent = true;
            std::borrow::Cow::Borrowed(payload)
        },
    }
}
