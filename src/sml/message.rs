// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C4 — the SML message assembler: reduces the TLV token stream produced by
//! [`super::tokenizer`] into a structured [`Message`], and the reverse.

use crate::error::SmfError;
use crate::obis::ObisCode;
use crate::sml::tokenizer::{decode_value, encode_value};
use crate::sml::value::{field, Value};

/// Numeric body-kind tags, carried as the first element of the message's
/// top-level list so a peer can dispatch without inspecting the payload
/// shape first.
mod code {
    pub const OPEN_REQ: u8 = 0x01;
    pub const OPEN_RES: u8 = 0x02;
    pub const CLOSE_REQ: u8 = 0x03;
    pub const CLOSE_RES: u8 = 0x04;
    pub const GET_PROFILE_PACK_REQ: u8 = 0x05;
    pub const GET_PROFILE_PACK_RES: u8 = 0x06;
    pub const GET_PROFILE_LIST_REQ: u8 = 0x07;
    pub const GET_PROFILE_LIST_RES: u8 = 0x08;
    pub const GET_PROC_PARAMETER_REQ: u8 = 0x09;
    pub const GET_PROC_PARAMETER_RES: u8 = 0x0A;
    pub const SET_PROC_PARAMETER_REQ: u8 = 0x0B;
    pub const SET_PROC_PARAMETER_RES: u8 = 0x0C;
    pub const GET_LIST_REQ: u8 = 0x0D;
    pub const GET_LIST_RES: u8 = 0x0E;
    pub const ATTENTION_RES: u8 = 0x0F;
}

/// One (obis, value, scaler) entry inside a profile list response.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodEntry {
    pub obis: ObisCode,
    pub raw: i64,
    pub scaler: i8,
}

impl PeriodEntry {
    fn encode(&self) -> Value {
        Value::Tuple(vec![Value::Obis(*self.obis.as_bytes()), Value::I64(self.raw), Value::I8(self.scaler)])
    }

    fn decode(v: &Value) -> Result<Self, SmfError> {
        let tuple = v.as_tuple().ok_or_else(|| SmfError::framing("sml", "period entry is not a list"))?;
        let obis = field(tuple, 0, "period.obis")?
            .as_obis()
            .ok_or_else(|| SmfError::framing("sml", "period entry obis must be Obis"))?;
        let raw = field(tuple, 1, "period.raw")?
            .as_i64()
            .ok_or_else(|| SmfError::framing("sml", "period entry raw must be integer"))?;
        let scaler = match field(tuple, 2, "period.scaler")? {
            Value::I8(s) => *s,
            other => return Err(SmfError::framing("sml", format!("period entry scaler must be I8, got {other:?}"))),
        };
        Ok(PeriodEntry { obis: ObisCode::from_bytes(obis), raw, scaler })
    }
}

/// The structured payload of an SML message, keyed by the verb the segment
/// gateway and the master cluster exchange (§4.1/§4.4 of the design).
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    OpenReq { codepage: Option<String>, client_id: Vec<u8>, req_file_id: String, server_id: Vec<u8>, username: Vec<u8>, password: Vec<u8> },
    OpenRes { codepage: Option<String>, client_id: Option<Vec<u8>>, req_file_id: String, server_id: Vec<u8> },
    CloseReq,
    CloseRes,
    GetProfilePackReq { server_id: Vec<u8>, profile: ObisCode },
    GetProfilePackRes { server_id: Vec<u8>, profile: ObisCode, entries: Vec<PeriodEntry> },
    GetProfileListReq { server_id: Vec<u8>, profile: ObisCode, start: u64, end: u64 },
    GetProfileListRes { server_id: Vec<u8>, profile: ObisCode, act_time: u64, entries: Vec<PeriodEntry> },
    GetProcParameterReq { server_id: Vec<u8>, parameter: ObisCode },
    GetProcParameterRes { server_id: Vec<u8>, parameter: ObisCode, value: Value },
    SetProcParameterReq { server_id: Vec<u8>, parameter: ObisCode, value: Value },
    SetProcParameterRes,
    GetListReq { server_id: Vec<u8>, list_name: ObisCode },
    GetListRes { server_id: Vec<u8>, list_name: ObisCode, act_time: u64, entries: Vec<PeriodEntry> },
    AttentionRes { server_id: Vec<u8>, attention_no: ObisCode, attention_msg: Option<String> },
}

fn bytes_value(b: &[u8]) -> Value {
    Value::Buffer(b.to_vec())
}

fn bytes_of<'a>(v: &'a Value, what: &'static str) -> Result<&'a [u8], SmfError> {
    v.as_buffer().ok_or_else(|| SmfError::framing("sml", format!("{what} must be a buffer")))
}

fn entries_value(entries: &[PeriodEntry]) -> Value {
    Value::Tuple(entries.iter().map(PeriodEntry::encode).collect())
}

fn entries_of(v: &Value) -> Result<Vec<PeriodEntry>, SmfError> {
    let tuple = v.as_tuple().ok_or_else(|| SmfError::framing("sml", "period list is not a list"))?;
    tuple.iter().map(PeriodEntry::decode).collect()
}

fn optional_string(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

impl Body {
    fn code(&self) -> u8 {
        match self {
            Body::OpenReq { .. } => code::OPEN_REQ,
            Body::OpenRes { .. } => code::OPEN_RES,
            Body::CloseReq => code::CLOSE_REQ,
            Body::CloseRes => code::CLOSE_RES,
            Body::GetProfilePackReq { .. } => code::GET_PROFILE_PACK_REQ,
            Body::GetProfilePackRes { .. } => code::GET_PROFILE_PACK_RES,
            Body::GetProfileListReq { .. } => code::GET_PROFILE_LIST_REQ,
            Body::GetProfileListRes { .. } => code::GET_PROFILE_LIST_RES,
            Body::GetProcParameterReq { .. } => code::GET_PROC_PARAMETER_REQ,
            Body::GetProcParameterRes { .. } => code::GET_PROC_PARAMETER_RES,
            Body::SetProcParameterReq { .. } => code::SET_PROC_PARAMETER_REQ,
            Body::SetProcParameterRes => code::SET_PROC_PARAMETER_RES,
            Body::GetListReq { .. } => code::GET_LIST_REQ,
            Body::GetListRes { .. } => code::GET_LIST_RES,
            Body::AttentionRes { .. } => code::ATTENTION_RES,
        }
    }

    fn content(&self) -> Value {
        match self {
            Body::OpenReq { codepage, client_id, req_file_id, server_id, username, password } => Value::Tuple(vec![
                codepage.clone().map(Value::String).unwrap_or(Value::Null),
                bytes_value(client_id),
                Value::String(req_file_id.clone()),
                bytes_value(server_id),
                bytes_value(username),
                bytes_value(password),
            ]),
            Body::OpenRes { codepage, client_id, req_file_id, server_id } => Value::Tuple(vec![
                codepage.clone().map(Value::String).unwrap_or(Value::Null),
                client_id.as_deref().map(bytes_value).unwrap_or(Value::Null),
                Value::String(req_file_id.clone()),
                bytes_value(server_id),
            ]),
            Body::CloseReq | Body::CloseRes | Body::SetProcParameterRes => Value::Tuple(vec![]),
            Body::GetProfilePackReq { server_id, profile } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*profile.as_bytes())])
            },
            Body::GetProfilePackRes { server_id, profile, entries } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*profile.as_bytes()), entries_value(entries)])
            },
            Body::GetProfileListReq { server_id, profile, start, end } => Value::Tuple(vec![
                bytes_value(server_id),
                Value::Obis(*profile.as_bytes()),
                Value::U64(*start),
                Value::U64(*end),
            ]),
            Body::GetProfileListRes { server_id, profile, act_time, entries } => Value::Tuple(vec![
                bytes_value(server_id),
                Value::Obis(*profile.as_bytes()),
                Value::U64(*act_time),
                entries_value(entries),
            ]),
            Body::GetProcParameterReq { server_id, parameter } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*parameter.as_bytes())])
            },
            Body::GetProcParameterRes { server_id, parameter, value } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*parameter.as_bytes()), value.clone()])
            },
            Body::SetProcParameterReq { server_id, parameter, value } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*parameter.as_bytes()), value.clone()])
            },
            Body::GetListReq { server_id, list_name } => {
                Value::Tuple(vec![bytes_value(server_id), Value::Obis(*list_name.as_bytes())])
            },
            Body::GetListRes { server_id, list_name, act_time, entries } => Value::Tuple(vec![
                bytes_value(server_id),
                Value::Obis(*list_name.as_bytes()),
                Value::U64(*act_time),
                entries_value(entries),
            ]),
            Body::AttentionRes { server_id, attention_no, attention_msg } => Value::Tuple(vec![
                bytes_value(server_id),
                Value::Obis(*attention_no.as_bytes()),
                attention_msg.clone().map(Value::String).unwrap_or(Value::Null),
            ]),
        }
    }

    fn from_code_and_content(code: u8, content: &Value) -> Result<Self, SmfError> {
        let tuple = content.as_tuple().ok_or_else(|| SmfError::framing("sml", "message content is not a list"))?;
        Ok(match code {
            code::OPEN_REQ => Body::OpenReq {
                codepage: optional_string(field(tuple, 0, "open.req.codepage")?),
                client_id: bytes_of(field(tuple, 1, "open.req.client_id")?, "client_id")?.to_vec(),
                req_file_id: field(tuple, 2, "open.req.req_file_id")?
                    .as_str()
                    .ok_or_else(|| SmfError::framing("sml", "req_file_id must be a string"))?
                    .to_string(),
                server_id: bytes_of(field(tuple, 3, "open.req.server_id")?, "server_id")?.to_vec(),
                username: bytes_of(field(tuple, 4, "open.req.username")?, "username")?.to_vec(),
                password: bytes_of(field(tuple, 5, "open.req.password")?, "password")?.to_vec(),
            },
            code::OPEN_RES => Body::OpenRes {
                codepage: optional_string(field(tuple, 0, "open.res.codepage")?),
                client_id: match field(tuple, 1, "open.res.client_id")? {
                    Value::Null => None,
                    v => Some(bytes_of(v, "client_id")?.to_vec()),
                },
                req_file_id: field(tuple, 2, "open.res.req_file_id")?
                    .as_str()
                    .ok_or_else(|| SmfError::framing("sml", "req_file_id must be a string"))?
                    .to_string(),
                server_id: bytes_of(field(tuple, 3, "open.res.server_id")?, "server_id")?.to_vec(),
            },
            code::CLOSE_REQ => Body::CloseReq,
            code::CLOSE_RES => Body::CloseRes,
            code::GET_PROFILE_PACK_REQ => Body::GetProfilePackReq {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                profile: ObisCode::from_bytes(
                    field(tuple, 1, "profile")?.as_obis().ok_or_else(|| SmfError::framing("sml", "profile must be Obis"))?,
                ),
            },
            code::GET_PROFILE_PACK_RES => Body::GetProfilePackRes {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                profile: ObisCode::from_bytes(
                    field(tuple, 1, "profile")?.as_obis().ok_or_else(|| SmfError::framing("sml", "profile must be Obis"))?,
                ),
                entries: entries_of(field(tuple, 2, "entries")?)?,
            },
            code::GET_PROFILE_LIST_REQ => Body::GetProfileListReq {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                profile: ObisCode::from_bytes(
                    field(tuple, 1, "profile")?.as_obis().ok_or_else(|| SmfError::framing("sml", "profile must be Obis"))?,
                ),
                start: field(tuple, 2, "start")?.as_u64().ok_or_else(|| SmfError::framing("sml", "start must be u64"))?,
                end: field(tuple, 3, "end")?.as_u64().ok_or_else(|| SmfError::framing("sml", "end must be u64"))?,
            },
            code::GET_PROFILE_LIST_RES => Body::GetProfileListRes {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                profile: ObisCode::from_bytes(
                    field(tuple, 1, "profile")?.as_obis().ok_or_else(|| SmfError::framing("sml", "profile must be Obis"))?,
                ),
                act_time: field(tuple, 2, "act_time")?.as_u64().ok_or_else(|| SmfError::framing("sml", "act_time must be u64"))?,
                entries: entries_of(field(tuple, 3, "entries")?)?,
            },
            code::GET_PROC_PARAMETER_REQ => Body::GetProcParameterReq {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                parameter: ObisCode::from_bytes(
                    field(tuple, 1, "parameter")?.as_obis().ok_or_else(|| SmfError::framing("sml", "parameter must be Obis"))?,
                ),
            },
            code::GET_PROC_PARAMETER_RES => Body::GetProcParameterRes {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                parameter: ObisCode::from_bytes(
                    field(tuple, 1, "parameter")?.as_obis().ok_or_else(|| SmfError::framing("sml", "parameter must be Obis"))?,
                ),
                value: field(tuple, 2, "value")?.clone(),
            },
            code::SET_PROC_PARAMETER_REQ => Body::SetProcParameterReq {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                parameter: ObisCode::from_bytes(
                    field(tuple, 1, "parameter")?.as_obis().ok_or_else(|| SmfError::framing("sml", "parameter must be Obis"))?,
                ),
                value: field(tuple, 2, "value")?.clone(),
            },
            code::SET_PROC_PARAMETER_RES => Body::SetProcParameterRes,
            code::GET_LIST_REQ => Body::GetListReq {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                list_name: ObisCode::from_bytes(
                    field(tuple, 1, "list_name")?.as_obis().ok_or_else(|| SmfError::framing("sml", "list_name must be Obis"))?,
                ),
            },
            code::GET_LIST_RES => Body::GetListRes {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                list_name: ObisCode::from_bytes(
                    field(tuple, 1, "list_name")?.as_obis().ok_or_else(|| SmfError::framing("sml", "list_name must be Obis"))?,
                ),
                act_time: field(tuple, 2, "act_time")?.as_u64().ok_or_else(|| SmfError::framing("sml", "act_time must be u64"))?,
                entries: entries_of(field(tuple, 3, "entries")?)?,
            },
            code::ATTENTION_RES => Body::AttentionRes {
                server_id: bytes_of(field(tuple, 0, "server_id")?, "server_id")?.to_vec(),
                attention_no: ObisCode::from_bytes(
                    field(tuple, 1, "attention_no")?
                        .as_obis()
                        .ok_or_else(|| SmfError::framing("sml", "attention_no must be Obis"))?,
                ),
                attention_msg: optional_string(field(tuple, 2, "attention_msg")?),
            },
            other => return Err(SmfError::framing("sml", format!("unknown message code {other:#x}"))),
        })
    }
}

/// One complete SML message: a transaction id, group/abort markers and a
/// typed [`Body`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub trx: String,
    pub group_no: u8,
    pub abort_on_error: u8,
    pub body: Body,
}

impl Message {
    pub fn new(trx: impl Into<String>, body: Body) -> Self {
        Message { trx: trx.into(), group_no: 0, abort_on_error: 0, body }
    }

    /// TLV-encodes this message as `[trx, group_no, abort_on_error, [code,
    /// content]]`, appended with its CRC16 and an EOM sentinel — the shape
    /// the tokenizer's frame wraps.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let envelope = Value::Tuple(vec![
            Value::String(self.trx.clone()),
            Value::U8(self.group_no),
            Value::U8(self.abort_on_error),
            Value::Tuple(vec![Value::U8(self.body.code()), self.body.content()]),
        ]);
        encode_value(&mut buf, &envelope);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), SmfError> {
        let (value, consumed) = decode_value(bytes)?;
        let tuple = value.as_tuple().ok_or_else(|| SmfError::framing("sml", "message is not a list"))?;
        let trx = field(tuple, 0, "trx")?
            .as_str()
            .ok_or_else(|| SmfError::framing("sml", "trx must be a string"))?
            .to_string();
        let group_no = match field(tuple, 1, "group_no")? {
            Value::U8(v) => *v,
            other => return Err(SmfError::framing("sml", format!("group_no must be U8, got {other:?}"))),
        };
        let abort_on_error = match field(tuple, 2, "abort_on_error")? {
            Value::U8(v) => *v,
            other => return Err(SmfError::framing("sml", format!("abort_on_error must be U8, got {other:?}"))),
        };
        let choice = field(tuple, 3, "body")?.as_tuple().ok_or_else(|| SmfError::framing("sml", "body must be a list"))?;
        let code = match field(choice, 0, "body.code")? {
            Value::U8(v) => *v,
            other => return Err(SmfError::framing("sml", format!("body code must be U8, got {other:?}"))),
        };
        let content = field(choice, 1, "body.content")?;
        let body = Body::from_code_and_content(code, content)?;
        Ok((Message { trx, group_no, abort_on_error, body }, consumed))
    }
}
