// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Escape-guarded framing and the TLV token codec.
//!
//! A frame is `begin marker | escaped body | pad bytes | end marker | pad
//! count | crc16`. The escape sequence `1B 1B 1B 1B` may not appear
//! literally inside the body; if it does, it is stuffed by doubling so the
//! reader can tell a literal occurrence from the real begin/end marker.
//! The CRC is computed over every as-transmitted byte from the begin marker
//! through the pad-count byte inclusive.

use super::crc::checksum;
use super::value::Value;
use crate::error::SmfError;

pub const BEGIN_MARKER: [u8; 8] = [0x1b, 0x1b, 0x1b, 0x1b, 0x01, 0x01, 0x01, 0x01];
pub const ESCAPE: [u8; 4] = [0x1b, 0x1b, 0x1b, 0x1b];
pub const END_TAG: u8 = 0x1a;

// Type-nibble tags for the TLV scheme (see src/sml/value.rs).
const TAG_STRING: u8 = 0x0;
const TAG_BOOL: u8 = 0x1;
const TAG_U8: u8 = 0x2;
const TAG_U16: u8 = 0x3;
const TAG_U32: u8 = 0x4;
const TAG_U64: u8 = 0x5;
const TAG_I8: u8 = 0x6;
const TAG_I16: u8 = 0x7;
const TAG_I32: u8 = 0x8;
const TAG_I64: u8 = 0x9;
const TAG_LIST: u8 = 0xA;
const TAG_OPTIONAL: u8 = 0xB;
const TAG_EOM: u8 = 0xC;
const TAG_BUFFER: u8 = 0xD;
const TAG_OBIS: u8 = 0xE;
const TAG_TIME: u8 = 0xF;

fn write_tl(buf: &mut Vec<u8>, tag: u8, len: usize) {
    let mut remaining = len >> 3;
    let low3 = (len & 0x07) as u8;
    let cont = remaining > 0;
    buf.push((tag << 4) | low3 | if cont { 0x08 } else { 0 });
    while remaining > 0 {
        let low7 = (remaining & 0x7F) as u8;
        remaining >>= 7;
        let more = remaining > 0;
        buf.push(low7 | if more { 0x80 } else { 0 });
    }
}

fn read_tl(bytes: &[u8]) -> Result<(u8, usize, usize), SmfError> {
    let b0 = *bytes
        .first()
        .ok_or_else(|| SmfError::framing("sml", "truncated TL header"))?;
    let tag = b0 >> 4;
    let mut len = (b0 & 0x07) as usize;
    let mut shift = 3;
    let mut consumed = 1;
    let mut cont = b0 & 0x08 != 0;
    while cont {
        let b = *bytes
            .get(consumed)
            .ok_or_else(|| SmfError::framing("sml", "truncated TL length continuation"))?;
        len |= ((b & 0x7F) as usize) << shift;
        shift += 7;
        cont = b & 0x80 != 0;
        consumed += 1;
    }
    Ok((tag, len, consumed))
}

/// Appends the single end-of-message marker token (type `EOM`, length 0).
pub fn encode_eom(buf: &mut Vec<u8>) {
    write_tl(buf, TAG_EOM, 0);
}

pub fn is_eom(bytes: &[u8]) -> bool {
    bytes.first().map(|b| b >> 4 == TAG_EOM).unwrap_or(false)
}

/// Encodes one [`Value`] (recursively, for [`Value::Tuple`]) as TLV.
pub fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => write_tl(buf, TAG_OPTIONAL, 0),
        Value::Bool(b) => {
            write_tl(buf, TAG_BOOL, 1);
            buf.push(*b as u8);
        },
        Value::U8(v) => {
            write_tl(buf, TAG_U8, 1);
            buf.push(*v);
        },
        Value::U16(v) => {
            write_tl(buf, TAG_U16, 2);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::U32(v) => {
            write_tl(buf, TAG_U32, 4);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::U64(v) => {
            write_tl(buf, TAG_U64, 8);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::I8(v) => {
            write_tl(buf, TAG_I8, 1);
            buf.push(*v as u8);
        },
        Value::I16(v) => {
            write_tl(buf, TAG_I16, 2);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::I32(v) => {
            write_tl(buf, TAG_I32, 4);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::I64(v) => {
            write_tl(buf, TAG_I64, 8);
            buf.extend_from_slice(&v.to_be_bytes());
        },
        Value::Buffer(b) => {
            write_tl(buf, TAG_BUFFER, b.len());
            buf.extend_from_slice(b);
        },
        Value::String(s) => {
            write_tl(buf, TAG_STRING, s.len());
            buf.extend_from_slice(s.as_bytes());
        },
        Value::Obis(o) => {
            write_tl(buf, TAG_OBIS, 6);
            buf.extend_from_slice(o);
        },
        Value::Tuple(items) => {
            write_tl(buf, TAG_LIST, items.len());
            for item in items {
                encode_value(buf, item);
            }
        },
        Value::Time(t) => {
            let secs = t
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            write_tl(buf, TAG_TIME, 8);
            buf.extend_from_slice(&secs.to_be_bytes());
        },
    }
}

/// Decodes one [`Value`] from `bytes`, returning it with the number of bytes
/// consumed. `OPTIONAL`-tagged tokens are transparent: length 0 decodes to
/// [`Value::Null`], length 1 decodes to whatever the nested token is.
pub fn decode_value(bytes: &[u8]) -> Result<(Value, usize), SmfError> {
    let (tag, len, header) = read_tl(bytes)?;
    let body = &bytes[header..];
    let need = |n: usize| -> Result<(), SmfError> {
        if body.len() < n {
            Err(SmfError::framing("sml", "truncated value payload"))
        } else {
            Ok(())
        }
    };
    match tag {
        TAG_OPTIONAL if len == 0 => Ok((Value::Null, header)),
        TAG_OPTIONAL => {
            let (inner, inner_len) = decode_value(body)?;
            Ok((inner, header + inner_len))
        },
        TAG_BOOL => {
            need(1)?;
            Ok((Value::Bool(body[0] != 0), header + 1))
        },
        TAG_U8 => {
            need(1)?;
            Ok((Value::U8(body[0]), header + 1))
        },
        TAG_U16 => {
            need(2)?;
            Ok((Value::U16(u16::from_be_bytes([body[0], body[1]])), header + 2))
        },
        TAG_U32 => {
            need(4)?;
            Ok((Value::U32(u32::from_be_bytes(body[0..4].try_into().unwrap())), header + 4))
        },
        TAG_U64 => {
            need(8)?;
            Ok((Value::U64(u64::from_be_bytes(body[0..8].try_into().unwrap())), header + 8))
        },
        TAG_I8 => {
            need(1)?;
            Ok((Value::I8(body[0] as i8), header + 1))
        },
        TAG_I16 => {
            need(2)?;
            Ok((Value::I16(i16::from_be_bytes([body[0], body[1]])), header + 2))
        },
        TAG_I32 => {
            need(4)?;
            Ok((Value::I32(i32::from_be_bytes(body[0..4].try_into().unwrap())), header + 4))
        },
        TAG_I64 => {
            need(8)?;
            Ok((Value::I64(i64::from_be_bytes(body[0..8].try_into().unwrap())), header + 8))
        },
        TAG_BUFFER => {
            need(len)?;
            Ok((Value::Buffer(body[..len].to_vec()), header + len))
        },
        TAG_STRING => {
            need(len)?;
            let s = String::from_utf8(body[..len].to_vec())
                .map_err(|e| SmfError::framing("sml", format!("invalid utf-8 string: {e}")))?;
            Ok((Value::String(s), header + len))
        },
        TAG_OBIS => {
            need(6)?;
            let mut code = [0u8; 6];
            code.copy_from_slice(&body[..6]);
            Ok((Value::Obis(code), header + 6))
        },
        TAG_LIST => {
            let mut items = Vec::with_capacity(len);
            let mut consumed = 0;
            for _ in 0..len {
                let (item, n) = decode_value(&body[consumed..])?;
                items.push(item);
                consumed += n;
            }
            Ok((Value::Tuple(items), header + consumed))
        },
        TAG_TIME => {
            need(8)?;
            let secs = u64::from_be_bytes(body[0..8].try_into().unwrap());
            Ok((Value::unix_time(secs), header + 8))
        },
        TAG_EOM => Err(SmfError::framing("sml", "unexpected end-of-message token")),
        other => Err(SmfError::framing("sml", format!("unknown TLV tag {other:#x}"))),
    }
}

fn stuff_escape(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i..].starts_with(&ESCAPE) {
            out.extend_from_slice(&ESCAPE);
            out.extend_from_slice(&ESCAPE);
            i += 4;
        } else {
            out.push(body[i]);
            i += 1;
        }
    }
    out
}

/// Encodes a complete frame around an already-TLV-encoded body.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(body.len() + 16);
    wire.extend_from_slice(&BEGIN_MARKER);
    wire.extend_from_slice(&stuff_escape(body));

    let unpadded_len = wire.len() + 2; // + end-tag byte + pad-count byte
    let pad = (4 - (unpadded_len % 4)) % 4;
    for _ in 0..pad {
        wire.push(0x00);
    }
    wire.extend_from_slice(&ESCAPE);
    wire.push(END_TAG);
    wire.push(pad as u8);

    let crc = checksum(&wire);
    wire.extend_from_slice(&crc.to_be_bytes());
    wire
}

/// Locates and decodes one complete frame at the start of `wire`, returning
/// the unescaped body and the total number of bytes the frame occupied.
pub fn decode_frame(wire: &[u8]) -> Result<(Vec<u8>, usize), SmfError> {
    if !wire.starts_with(&BEGIN_MARKER) {
        return Err(SmfError::framing("sml", "missing begin marker"));
    }
    let mut body = Vec::new();
    let mut i = BEGIN_MARKER.len();
    let end_at;
    loop {
        if i + 4 > wire.len() {
            return Err(SmfError::framing("sml", "truncated frame: no end marker"));
        }
        if wire[i..i + 4] == ESCAPE {
            if i + 8 <= wire.len() && wire[i + 4..i + 8] == ESCAPE {
                body.extend_from_slice(&ESCAPE);
                i += 8;
                continue;
            }
            if i + 5 > wire.len() || wire[i + 4] != END_TAG {
                return Err(SmfError::framing("sml", "malformed escape sequence"));
            }
            end_at = i;
            break;
        }
        body.push(wire[i]);
        i += 1;
    }

    let pad = *wire
        .get(end_at + 5)
        .ok_or_else(|| SmfError::framing("sml", "truncated pad-count byte"))?;
    let crc_at = end_at + 6;
    let crc_bytes = wire
        .get(crc_at..crc_at + 2)
        .ok_or_else(|| SmfError::framing("sml", "truncated crc"))?;
    let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    let computed = checksum(&wire[..crc_at]);
    if expected != computed {
        return Err(SmfError::Crc { expected, computed });
    }
    let _ = pad;
    Ok((body, crc_at + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trips() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::U8(7),
            Value::U16(4000),
            Value::U32(1_000_000),
            Value::U64(u64::MAX),
            Value::I8(-5),
            Value::I16(-4000),
            Value::I32(-1_000_000),
            Value::I64(i64::MIN),
            Value::Buffer(vec![1, 2, 3]),
            Value::String("hello".into()),
            Value::Obis([0x81, 0x81, 0xC7, 0x86, 0x11, 0xFF]),
            Value::unix_time(1_700_000_000),
        ] {
            let mut buf = Vec::new();
            encode_value(&mut buf, &v);
            let (decoded, consumed) = decode_value(&buf).expect("decode");
            assert_eq!(consumed, buf.len());
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn tuple_round_trips() {
        let v = Value::Tuple(vec![Value::U8(1), Value::String("x".into()), Value::Tuple(vec![Value::Bool(false)])]);
        let mut buf = Vec::new();
        encode_value(&mut buf, &v);
        let (decoded, consumed) = decode_value(&buf).expect("decode");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, v);
    }

    #[test]
    fn long_string_uses_length_continuation() {
        let s = "x".repeat(200);
        let v = Value::String(s.clone());
        let mut buf = Vec::new();
        encode_value(&mut buf, &v);
        let (decoded, consumed) = decode_value(&buf).expect("decode");
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded.as_str(), Some(s.as_str()));
    }

    #[test]
    fn frame_round_trips() {
        let mut body = Vec::new();
        encode_value(&mut body, &Value::Tuple(vec![Value::U8(1), Value::String("abc".into())]));
        let wire = encode_frame(&body);
        let (decoded_body, consumed) = decode_frame(&wire).expect("decode frame");
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn frame_escapes_literal_marker_in_body() {
        let mut body = Vec::new();
        body.extend_from_slice(&ESCAPE);
        body.extend_from_slice(b"payload");
        let wire = encode_frame(&body);
        let (decoded_body, consumed) = decode_frame(&wire).expect("decode frame");
        assert_eq!(consumed, wire.len());
        assert_eq!(decoded_body, body);
    }

    #[test]
    fn frame_detects_crc_mismatch() {
        let mut body = Vec::new();
        encode_value(&mut body, &Value::U8(9));
        let mut wire = encode_frame(&body);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;
        assert!(matches!(decode_frame(&wire), Err(SmfError::Crc { .. })));
    }
}
