// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Crate-wide error kinds.
//!
//! Codecs (IPT, SML, M-Bus) raise their own precise `thiserror` types and
//! convert into [`SmfError`] at the boundary where a component needs to log,
//! retry, or surface the failure per §7's policy table. Call sites that
//! aggregate several fallible steps keep using `anyhow::Result`, exactly as
//! the teacher's connection/session layer does.

use thiserror::Error;

/// One of the error kinds enumerated in §7 of the design.
#[derive(Debug, Error)]
pub enum SmfError {
    /// Escape/length/TLV framing violation (IPT or SML).
    #[error("framing error in {component}: {message}")]
    Framing { component: &'static str, message: String },

    /// SML CRC16 mismatch. Non-fatal: the caller still gets the decoded
    /// content but must mark it unverified.
    #[error("crc mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    Crc { expected: u16, computed: u16 },

    /// Login denied or authorization otherwise refused.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Push-channel open/close failure.
    #[error("channel error: {0}")]
    Channel(String),

    /// AES mode-5 decryption did not yield the expected sentinel.
    #[error("decryption failed for server id {server_id}")]
    Decrypt { server_id: String },

    /// VIF/VIFE code not present in the EN13757-3 table.
    #[error("unknown unit/vif code: {0:#04x}")]
    UnitUnknown(u8),

    /// Socket/serial I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation exceeded its allotted time budget.
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Missing key or invalid OBIS code discovered while reading config.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SmfError {
    pub fn framing(component: &'static str, message: impl Into<String>) -> Self {
        SmfError::Framing { component, message: message.into() }
    }
}
