// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The decoded-command registry (§4.2): the closed set of commands this
//! gateway actually receives, each with a fixed decoder that consumes its
//! body in a typed sequence — null-terminated strings, big-endian
//! integers, length-prefixed opaque data. Anything outside the registry
//! decodes to [`DecodedCommand::Unknown`] rather than failing the parse;
//! the sync marker resync in [`super::parser::FrameParser`] already
//! guarantees the byte stream itself never desyncs over an unrecognized
//! command.

use super::codes::*;
use super::parser::RawFrame;
use crate::error::SmfError;
use crate::scramble::SCRAMBLE_KEY_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCommand {
    LoginPublic { name: String, pwd: String },
    LoginScrambled { name: String, pwd: String, key: [u8; SCRAMBLE_KEY_LEN] },
    Watchdog,
    RegisterTarget { target: String, packet_size: u16, window_size: u8 },
    OpenPushChannel { target: String, account: String, number: String, version: String, device_id: String, timeout: u16 },
    PushDataTransfer { channel_id: u32, source_id: u32, status: u8, block: u8, data: Vec<u8> },
    OpenConnection { number: String },
    ProtocolVersionRequest,
    Unknown(u16),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    /// A run of bytes up to (and consuming) the next NUL, matching the
    /// original parser's `std::getline(..., '\0')`.
    fn read_cstr(&mut self) -> Result<String, SmfError> {
        let rest = &self.bytes[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| SmfError::framing("ipt", "string field missing its NUL terminator"))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], SmfError> {
        let rest = &self.bytes[self.pos..];
        if rest.len() < n {
            return Err(SmfError::framing("ipt", format!("command body shorter than the {n} bytes this field needs")));
        }
        self.pos += n;
        Ok(&rest[..n])
    }

    fn read_u8(&mut self) -> Result<u8, SmfError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, SmfError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, SmfError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// A `u32` length prefix followed by that many raw bytes.
    fn read_data(&mut self) -> Result<Vec<u8>, SmfError> {
        let len = self.read_u32()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }
}

/// Decodes `frame`'s payload into its typed command, or `Unknown(cmd)` for
/// any command outside the registry.
pub fn decode(frame: &RawFrame) -> Result<DecodedCommand, SmfError> {
    let mut c = Cursor::new(&frame.payload);
    match frame.header.cmd {
        CTRL_REQ_LOGIN_PUBLIC => Ok(DecodedCommand::LoginPublic { name: c.read_cstr()?, pwd: c.read_cstr()? }),
        CTRL_REQ_LOGIN_SCRAMBLED => {
            let name = c.read_cstr()?;
            let pwd = c.read_cstr()?;
            let key_bytes = c.read_bytes(SCRAMBLE_KEY_LEN)?;
            let mut key = [0u8; SCRAMBLE_KEY_LEN];
            key.copy_from_slice(key_bytes);
            Ok(DecodedCommand::LoginScrambled { name, pwd, key })
        },
        CTRL_REQ_WATCHDOG => Ok(DecodedCommand::Watchdog),
        CTRL_REQ_REGISTER_TARGET => Ok(DecodedCommand::RegisterTarget { target: c.read_cstr()?, packet_size: c.read_u16()?, window_size: c.read_u8()? }),
        TP_REQ_OPEN_PUSH_CHANNEL => Ok(DecodedCommand::OpenPushChannel {
            target: c.read_cstr()?,
            account: c.read_cstr()?,
            number: c.read_cstr()?,
            version: c.read_cstr()?,
            device_id: c.read_cstr()?,
            timeout: c.read_u16()?,
        }),
        TP_REQ_PUSHDATA_TRANSFER => Ok(DecodedCommand::PushDataTransfer {
            channel_id: c.read_u32()?,
            source_id: c.read_u32()?,
            status: c.read_u8()?,
            block: c.read_u8()?,
            data: c.read_data()?,
        }),
        TP_REQ_OPEN_CONNECTION => Ok(DecodedCommand::OpenConnection { number: c.read_cstr()? }),
        APP_REQ_PROTOCOL_VERSION => Ok(DecodedCommand::ProtocolVersionRequest),
        other => Ok(DecodedCommand::Unknown(other)),
    }
}
