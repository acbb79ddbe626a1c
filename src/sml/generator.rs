// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transaction-id and file-id allocation, and the handful of request/response
//! builders every caller needs instead of constructing [`Body`] variants by
//! hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::obis::ObisCode;
use crate::sml::message::{Body, Message, PeriodEntry};
use crate::sml::value::Value;

/// Allocates `"<prefix>-<n>"` transaction ids, monotonically increasing for
/// the lifetime of the generator. One instance is owned per connection.
pub struct TrxGenerator {
    prefix: String,
    next: AtomicU64,
}

impl TrxGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        TrxGenerator { prefix: prefix.into(), next: AtomicU64::new(1) }
    }

    pub fn next_trx(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}

/// Produces a 12-digit file id from the current wall-clock time, matching
/// the `YYMMDDHHMMSS`-ish width the uplink expects for `req_file_id`.
pub fn file_id_now() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("{secs:012}")
}

pub fn open_request(client_id: Vec<u8>, server_id: Vec<u8>, username: Vec<u8>, password: Vec<u8>, trx: &TrxGenerator) -> Message {
    Message::new(
        trx.next_trx(),
        Body::OpenReq { codepage: None, client_id, req_file_id: file_id_now(), server_id, username, password },
    )
}

pub fn open_response(trx: impl Into<String>, req_file_id: impl Into<String>, server_id: Vec<u8>) -> Message {
    Message::new(trx, Body::OpenRes { codepage: None, client_id: None, req_file_id: req_file_id.into(), server_id })
}

pub fn close_request(trx: &TrxGenerator) -> Message {
    Message::new(trx.next_trx(), Body::CloseReq)
}

pub fn close_response(trx: impl Into<String>) -> Message {
    Message::new(trx, Body::CloseRes)
}

pub fn get_profile_list_request(trx: &TrxGenerator, server_id: Vec<u8>, profile: ObisCode, start: u64, end: u64) -> Message {
    Message::new(trx.next_trx(), Body::GetProfileListReq { server_id, profile, start, end })
}

pub fn get_profile_list_response(
    trx: impl Into<String>,
    server_id: Vec<u8>,
    profile: ObisCode,
    act_time: u64,
    entries: Vec<PeriodEntry>,
) -> Message {
    Message::new(trx, Body::GetProfileListRes { server_id, profile, act_time, entries })
}

pub fn get_proc_parameter_request(trx: &TrxGenerator, server_id: Vec<u8>, parameter: ObisCode) -> Message {
    Message::new(trx.next_trx(), Body::GetProcParameterReq { server_id, parameter })
}

pub fn set_proc_parameter_request(trx: &TrxGenerator, server_id: Vec<u8>, parameter: ObisCode, value: Value) -> Message {
    Message::new(trx.next_trx(), Body::SetProcParameterReq { server_id, parameter, value })
}
