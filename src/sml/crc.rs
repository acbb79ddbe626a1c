// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CRC16 as used on the SML wire: CCITT-FALSE (poly 0x1021, init 0xFFFF, no
//! reflection, xorout 0x0000), computed over the as-transmitted (escaped)
//! bytes from the begin marker through the pad byte.

use crc::{Crc, CRC_16_IBM_3740};

static CRC16_SML: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Computes the SML frame checksum over `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    CRC16_SML.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic() {
        let a = checksum(b"\x1b\x1b\x1b\x1b\x01\x01\x01\x01");
        let b = checksum(b"\x1b\x1b\x1b\x1b\x01\x01\x01\x01");
        assert_eq!(a, b);
    }

    #[test]
    fn checksum_differs_for_different_input() {
        let a = checksum(b"abc");
        let b = checksum(b"abd");
        assert_ne!(a, b);
    }
}
