// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C3/C4 — the SML tokenizer and message assembler: escape-framed TLV
//! encoding, CRC16 framing, and the structured request/response messages
//! built on top of it.

pub mod crc;
pub mod generator;
pub mod message;
pub mod tokenizer;
pub mod value;

pub use message::{Body, Message, PeriodEntry};
pub use value::Value;

use crate::error::SmfError;

/// Encodes a [`Message`] into a complete, CRC-guarded, escape-framed wire
/// frame ready to write to a socket.
pub fn encode_frame(msg: &Message) -> Vec<u8> {
    tokenizer::encode_frame(&msg.encode())
}

/// Decodes the first complete frame at the start of `wire`, returning the
/// [`Message`] and the number of bytes the frame occupied.
pub fn decode_frame(wire: &[u8]) -> Result<(Message, usize), SmfError> {
    let (body, consumed) = tokenizer::decode_frame(wire)?;
    let (msg, body_consumed) = Message::decode(&body)?;
    if body_consumed != body.len() {
        return Err(SmfError::framing("sml", "trailing bytes after message"));
    }
    Ok((msg, consumed))
}
