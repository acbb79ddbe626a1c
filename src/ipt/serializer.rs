// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Frame serialization and the outgoing sequence-number register.
//!
//! Unlike the SML tokenizer, IPT frames carry an explicit `total_length`
//! field, so there is no need to escape-stuff a literal marker occurring
//! inside the payload: the reader always knows exactly how many payload
//! bytes to consume next. Only the four-byte sync marker precedes each
//! frame.

use std::sync::atomic::{AtomicU8, Ordering};

use super::header::IptHeader;
use super::parser::MARKER;

pub fn encode_frame(cmd: u16, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MARKER.len() + 8 + payload.len());
    out.extend_from_slice(&MARKER);
    out.extend_from_slice(&IptHeader::for_payload(cmd, seq, payload.len()).to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Hands out the next outgoing sequence number, rolling over the set
/// `1..=255` and skipping 0 so a receiver can correlate a response to the
/// most-recent request by that sequence alone.
#[derive(Debug, Default)]
pub struct SequenceRegister(AtomicU8);

impl SequenceRegister {
    pub fn new() -> Self {
        SequenceRegister(AtomicU8::new(0))
    }

    pub fn next(&self) -> u8 {
        loop {
            let cur = self.0.load(Ordering::Relaxed);
            let next = if cur == 255 { 1 } else { cur + 1 };
            if self.0.compare_exchange(cur, next, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
                return next;
            }
        }
    }

    /// The sequence number of the most-recently issued request, for
    /// correlating the response that comes back for it.
    pub fn last(&self) -> u8 {
        self.0.load(Ordering::Relaxed)
    }
}
