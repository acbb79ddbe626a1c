// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! AES-128-CBC "mode 5" payload decryption, as used by OMS/wM-Bus.
//!
//! The key is per-meter, looked up by the caller (the meter-config table,
//! keyed by [`ServerId`]); a missing key is not an error here — callers pass
//! the ciphertext straight through and mark the reading unverified. Success
//! is judged after the fact by checking the `2F 2F` padding sentinel that
//! prefixes a correctly decrypted block.

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use super::frame::ServerId;
use crate::error::SmfError;

type Decryptor = cbc::Decryptor<Aes128>;

pub const SENTINEL: [u8; 2] = [0x2F, 0x2F];

/// Builds the deterministic mode-5 IV: manufacturer || device id || version
/// || medium || access-counter repeated to fill the 16-byte block.
pub fn build_iv(server_id: &ServerId, access_number: u8) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..2].copy_from_slice(&server_id.manufacturer.to_le_bytes());
    iv[2..6].copy_from_slice(&server_id.serial.to_le_bytes());
    iv[6] = server_id.version;
    iv[7] = server_id.medium;
    for b in &mut iv[8..16] {
        *b = access_number;
    }
    iv
}

/// Decrypts `ciphertext` under `key`/`iv`. Only whole 16-byte blocks are
/// decrypted; a trailing partial block (present when the payload isn't
/// block-aligned, which OMS permits) is copied through unchanged.
pub fn decrypt(ciphertext: &[u8], key: [u8; 16], iv: [u8; 16]) -> Vec<u8> {
    let whole = (ciphertext.len() / 16) * 16;
    let mut out = ciphertext.to_vec();
    let mut decryptor = Decryptor::new(&key.into(), &iv.into());
    for chunk in out[..whole].chunks_mut(16) {
        let block = chunk.try_into().expect("chunk is exactly one AES block");
        decryptor.decrypt_block_mut(block);
    }
    out
}

/// Whether `plaintext` begins with the mode-5 padding sentinel, i.e.
/// whether `key` was the right one.
pub fn looks_decrypted(plaintext: &[u8]) -> bool {
    plaintext.starts_with(&SENTINEL)
}

pub fn decrypt_and_verify(ciphertext: &[u8], key: [u8; 16], server_id: &ServerId, access_number: u8) -> Result<Vec<u8>, SmfError> {
    let iv = build_iv(server_id, access_number);
    let plain = decrypt(ciphertext, key, iv);
    if looks_decrypted(&plain) {
        Ok(plain)
    } else {
        Err(SmfError::Decrypt { server_id: server_id.to_string() })
    }
}
