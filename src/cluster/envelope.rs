// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C11 envelope codec: the `client_req`/`client_res` verbs the segment
//! gateway exchanges with the cluster master (§4.10), reusing the SML TLV
//! value codec ([`crate::sml::tokenizer`]) as the wire encoding so the
//! uplink never needs a second serializer.

use crate::error::SmfError;
use crate::sml::tokenizer::{decode_value, encode_value};
use crate::sml::value::{field, Value};

mod code {
    pub const REQ_LOGIN: u8 = 0x01;
    pub const RES_LOGIN: u8 = 0x02;
    pub const REQ_OPEN_PUSH_CHANNEL: u8 = 0x03;
    pub const RES_OPEN_PUSH_CHANNEL: u8 = 0x04;
    pub const REQ_TRANSFER_PUSHDATA: u8 = 0x05;
    pub const RES_TRANSFER_PUSHDATA: u8 = 0x06;
    pub const REQ_CLOSE_PUSH_CHANNEL: u8 = 0x07;
    pub const RES_CLOSE_PUSH_CHANNEL: u8 = 0x08;
    pub const BUS_INSERT_MSG: u8 = 0x09;
}

/// One of the verbs listed in §4.10. `bag` is the opaque options blob every
/// verb in the original protocol carries alongside its typed fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterVerb {
    ReqLogin { name: String, pwd: String, scheme: String, bag: Vec<u8> },
    ResLogin { success: bool, name: String, msg: Option<String>, query: bool, bag: Vec<u8> },
    ReqOpenPushChannel { target: String, device: String, number: String, version: String, id: String, timeout_secs: u32, bag: Vec<u8> },
    ResOpenPushChannel { channel: u32, source: u32, count: u32, options: Vec<u8>, bag: Vec<u8> },
    ReqTransferPushdata { channel: u32, source: u32, data: Vec<u8>, bag: Vec<u8> },
    ResTransferPushdata { channel: u32, source: u32, bag: Vec<u8> },
    ReqClosePushChannel { channel: u32, bag: Vec<u8> },
    ResClosePushChannel { channel: u32, bag: Vec<u8> },
    /// Operational logging; fire-and-forget, never dispatched through the
    /// sequence→continuation map.
    BusInsertMsg { severity: u8, text: String },
}

fn opt_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl ClusterVerb {
    fn code(&self) -> u8 {
        match self {
            ClusterVerb::ReqLogin { .. } => code::REQ_LOGIN,
            ClusterVerb::ResLogin { .. } => code::RES_LOGIN,
            ClusterVerb::ReqOpenPushChannel { .. } => code::REQ_OPEN_PUSH_CHANNEL,
            ClusterVerb::ResOpenPushChannel { .. } => code::RES_OPEN_PUSH_CHANNEL,
            ClusterVerb::ReqTransferPushdata { .. } => code::REQ_TRANSFER_PUSHDATA,
            ClusterVerb::ResTransferPushdata { .. } => code::RES_TRANSFER_PUSHDATA,
            ClusterVerb::ReqClosePushChannel { .. } => code::REQ_CLOSE_PUSH_CHANNEL,
            ClusterVerb::ResClosePushChannel { .. } => code::RES_CLOSE_PUSH_CHANNEL,
            ClusterVerb::BusInsertMsg { .. } => code::BUS_INSERT_MSG,
        }
    }

    fn content(&self) -> Value {
        match self {
            ClusterVerb::ReqLogin { name, pwd, scheme, bag } => {
                Value::Tuple(vec![Value::String(name.clone()), Value::String(pwd.clone()), Value::String(scheme.clone()), Value::Buffer(bag.clone())])
            },
            ClusterVerb::ResLogin { success, name, msg, query, bag } => Value::Tuple(vec![
                Value::Bool(*success),
                Value::String(name.clone()),
                msg.clone().map(Value::String).unwrap_or(Value::Null),
                Value::Bool(*query),
                Value::Buffer(bag.clone()),
            ]),
            ClusterVerb::ReqOpenPushChannel { target, device, number, version, id, timeout_secs, bag } => Value::Tuple(vec![
                Value::String(target.clone()),
                Value::String(device.clone()),
                Value::String(number.clone()),
                Value::String(version.clone()),
                Value::String(id.clone()),
                Value::U32(*timeout_secs),
                Value::Buffer(bag.clone()),
            ]),
            ClusterVerb::ResOpenPushChannel { channel, source, count, options, bag } => Value::Tuple(vec![
                Value::U32(*channel),
                Value::U32(*source),
                Value::U32(*count),
                Value::Buffer(options.clone()),
                Value::Buffer(bag.clone()),
            ]),
            ClusterVerb::ReqTransferPushdata { channel, source, data, bag } => {
                Value::Tuple(vec![Value::U32(*channel), Value::U32(*source), Value::Buffer(data.clone()), Value::Buffer(bag.clone())])
            },
            ClusterVerb::ResTransferPushdata { channel, source, bag } => Value::Tuple(vec![Value::U32(*channel), Value::U32(*source), Value::Buffer(bag.clone())]),
            ClusterVerb::ReqClosePushChannel { channel, bag } => Value::Tuple(vec![Value::U32(*channel), Value::Buffer(bag.clone())]),
            ClusterVerb::ResClosePushChannel { channel, bag } => Value::Tuple(vec![Value::U32(*channel), Value::Buffer(bag.clone())]),
            ClusterVerb::BusInsertMsg { severity, text } => Value::Tuple(vec![Value::U8(*severity), Value::String(text.clone())]),
        }
    }

    fn from_code_and_content(code: u8, content: &Value) -> Result<Self, SmfError> {
        let tuple = content.as_tuple().ok_or_else(|| SmfError::framing("cluster", "envelope content is not a list"))?;
        let as_str = |v: &Value, what: &'static str| -> Result<String, SmfError> { v.as_str().map(str::to_string).ok_or_else(|| SmfError::framing("cluster", format!("{what} must be a string"))) };
        let as_u32 = |v: &Value, what: &'static str| -> Result<u32, SmfError> {
            v.as_u64().and_then(|n| u32::try_from(n).ok()).ok_or_else(|| SmfError::framing("cluster", format!("{what} must fit in u32")))
        };
        let as_buf = |v: &Value, what: &'static str| -> Result<Vec<u8>, SmfError> { v.as_buffer().map(<[u8]>::to_vec).ok_or_else(|| SmfError::framing("cluster", format!("{what} must be a buffer"))) };

        Ok(match code {
            code::REQ_LOGIN => ClusterVerb::ReqLogin {
                name: as_str(field(tuple, 0, "name")?, "name")?,
                pwd: as_str(field(tuple, 1, "pwd")?, "pwd")?,
                scheme: as_str(field(tuple, 2, "scheme")?, "scheme")?,
                bag: as_buf(field(tuple, 3, "bag")?, "bag")?,
            },
            code::RES_LOGIN => ClusterVerb::ResLogin {
                success: matches!(field(tuple, 0, "success")?, Value::Bool(true)),
                name: as_str(field(tuple, 1, "name")?, "name")?,
                msg: opt_string(field(tuple, 2, "msg")?),
                query: matches!(field(tuple, 3, "query")?, Value::Bool(true)),
                bag: as_buf(field(tuple, 4, "bag")?, "bag")?,
            },
            code::REQ_OPEN_PUSH_CHANNEL => ClusterVerb::ReqOpenPushChannel {
                target: as_str(field(tuple, 0, "target")?, "target")?,
                device: as_str(field(tuple, 1, "device")?, "device")?,
                number: as_str(field(tuple, 2, "number")?, "number")?,
                version: as_str(field(tuple, 3, "version")?, "version")?,
                id: as_str(field(tuple, 4, "id")?, "id")?,
                timeout_secs: as_u32(field(tuple, 5, "timeout")?, "timeout")?,
                bag: as_buf(field(tuple, 6, "bag")?, "bag")?,
            },
            code::RES_OPEN_PUSH_CHANNEL => ClusterVerb::ResOpenPushChannel {
                channel: as_u32(field(tuple, 0, "channel")?, "channel")?,
                source: as_u32(field(tuple, 1, "source")?, "source")?,
                count: as_u32(field(tuple, 2, "count")?, "count")?,
                options: as_buf(field(tuple, 3, "options")?, "options")?,
                bag: as_buf(field(tuple, 4, "bag")?, "bag")?,
            },
            code::REQ_TRANSFER_PUSHDATA => ClusterVerb::ReqTransferPushdata {
                channel: as_u32(field(tuple, 0, "channel")?, "channel")?,
                source: as_u32(field(tuple, 1, "source")?, "source")?,
                data: as_buf(field(tuple, 2, "data")?, "data")?,
                bag: as_buf(field(tuple, 3, "bag")?, "bag")?,
            },
            code::RES_TRANSFER_PUSHDATA => ClusterVerb::ResTransferPushdata {
                channel: as_u32(field(tuple, 0, "channel")?, "channel")?,
                source: as_u32(field(tuple, 1, "source")?, "source")?,
                bag: as_buf(field(tuple, 2, "bag")?, "bag")?,
            },
            code::REQ_CLOSE_PUSH_CHANNEL => ClusterVerb::ReqClosePushChannel { channel: as_u32(field(tuple, 0, "channel")?, "channel")?, bag: as_buf(field(tuple, 1, "bag")?, "bag")? },
            code::RES_CLOSE_PUSH_CHANNEL => ClusterVerb::ResClosePushChannel { channel: as_u32(field(tuple, 0, "channel")?, "channel")?, bag: as_buf(field(tuple, 1, "bag")?, "bag")? },
            code::BUS_INSERT_MSG => ClusterVerb::BusInsertMsg {
                severity: field(tuple, 0, "severity")?.as_u64().map(|n| n as u8).ok_or_else(|| SmfError::framing("cluster", "severity must be a u8"))?,
                text: as_str(field(tuple, 1, "text")?, "text")?,
            },
            other => return Err(SmfError::framing("cluster", format!("unknown envelope code {other:#04x}"))),
        })
    }
}

/// A verb plus the cluster sequence number responses echo back (§4.10).
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub sequence: u64,
    pub verb: ClusterVerb,
}

impl Envelope {
    pub fn new(sequence: u64, verb: ClusterVerb) -> Self {
        Envelope { sequence, verb }
    }

    pub fn encode(&self) -> Vec<u8> {
        let top = Value::Tuple(vec![Value::U64(self.sequence), Value::U8(self.verb.code()), self.verb.content()]);
        let mut buf = Vec::new();
        encode_value(&mut buf, &top);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), SmfError> {
        let (value, consumed) = decode_value(bytes)?;
        let tuple = value.as_tuple().ok_or_else(|| SmfError::framing("cluster", "envelope is not a list"))?;
        let sequence = field(tuple, 0, "sequence")?.as_u64().ok_or_else(|| SmfError::framing("cluster", "sequence must be u64"))?;
        let code = field(tuple, 1, "code")?.as_u64().map(|n| n as u8).ok_or_else(|| SmfError::framing("cluster", "code must be u8"))?;
        let content = field(tuple, 2, "content")?;
        let verb = ClusterVerb::from_code_and_content(code, content)?;
        Ok((Envelope { sequence, verb }, consumed))
    }
}
