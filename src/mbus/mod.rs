// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C6 — the wired/wireless M-Bus decoder: frame classification, the
//! server-id/manufacturer codec, AES-128-CBC mode-5 decryption, the
//! variable-data-block parser, and HCI unwrapping for the iM871A adapter.

pub mod aes;
pub mod frame;
pub mod hci;
pub mod vdb;

pub use frame::{ServerId, WMBusHeader};
pub use vdb::{parse_all, parse_one, Reading};
