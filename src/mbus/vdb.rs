// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The variable-data-block parser: walks DIF/DIFE/VIF/VIFE/DATA byte
//! groups and emits one decoded [`Reading`] per complete group.
//!
//! Insufficient bytes for the group currently being read are not an error:
//! [`parse_one`] returns `Ok(None)` and the caller re-invokes it once more
//! bytes have arrived, exactly as the design's failure-semantics describe.

use crate::error::SmfError;
use crate::obis::{well_known, ObisCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    None,
    Int8,
    Int16,
    Int24,
    Int32,
    Real32,
    Int48,
    Int64,
    Selection,
    Bcd2,
    Bcd4,
    Bcd6,
    Bcd8,
    Variable,
    Bcd12,
    Special,
}

impl DataType {
    fn from_nibble(n: u8) -> Self {
        match n {
            0x0 => DataType::None,
            0x1 => DataType::Int8,
            0x2 => DataType::Int16,
            0x3 => DataType::Int24,
            0x4 => DataType::Int32,
            0x5 => DataType::Real32,
            0x6 => DataType::Int48,
            0x7 => DataType::Int64,
            0x8 => DataType::Selection,
            0x9 => DataType::Bcd2,
            0xA => DataType::Bcd4,
            0xB => DataType::Bcd6,
            0xC => DataType::Bcd8,
            0xD => DataType::Variable,
            0xE => DataType::Bcd12,
            0xF => DataType::Special,
            _ => unreachable!("nibble is always 0..=0xF"),
        }
    }

    /// Fixed payload length in bytes, or `None` for `Variable`/`Special`
    /// whose length is carried by the first data byte.
    fn fixed_len(self) -> Option<usize> {
        match self {
            DataType::None | DataType::Selection => Some(0),
            DataType::Int8 | DataType::Bcd2 => Some(1),
            DataType::Int16 | DataType::Bcd4 => Some(2),
            DataType::Int24 | DataType::Bcd6 => Some(3),
            DataType::Int32 | DataType::Real32 | DataType::Bcd8 => Some(4),
            DataType::Int48 | DataType::Bcd12 => Some(6),
            DataType::Int64 => Some(8),
            DataType::Variable | DataType::Special => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Instant,
    Max,
    Min,
    Error,
}

impl Function {
    fn from_dif(dif: u8) -> Self {
        match dif & 0x30 {
            0x00 => Function::Instant,
            0x10 => Function::Max,
            0x20 => Function::Min,
            _ => Function::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    WattHour,
    Joule,
    Watt,
    JoulePerHour,
    CubicMeter,
    CubicMeterPerHour,
    CubicMeterPerMinute,
    CubicMeterPerSecond,
    Kilogram,
    KilogramPerHour,
    Seconds,
    Minutes,
    Hours,
    Days,
    Celsius,
    Kelvin,
    Bar,
    Count,
    /// A VIF naming the first (`0xFB`) or second (`0xFD`) extension table,
    /// carrying that table's selector byte raw: the full EN13757-3
    /// extension tables are not modeled, but the orthogonal byte is kept
    /// rather than discarded the way a bare [`Unit::Unknown`] would.
    Extended(u8),
    Unknown(u8),
}

/// One decoded DIF+VIF+DATA group.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub obis: ObisCode,
    pub unit: Unit,
    pub scaler: i8,
    pub function: Function,
    pub storage_number: u32,
    pub tariff: u32,
    pub sub_unit: u32,
    pub value: DecodedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Integer(i64),
    Real(f32),
    DateG { year: u16, month: u8, day: u8 },
    DateTimeF { year: u16, month: u8, day: u8, hour: u8, minute: u8 },
    Raw(Vec<u8>),
    Placeholder,
}

fn bcd_to_u64(bytes: &[u8]) -> Result<u64, SmfError> {
    let mut value: u64 = 0;
    let mut mul: u64 = 1;
    for &b in bytes {
        let lo = b & 0x0F;
        let hi = (b >> 4) & 0x0F;
        if lo > 9 || hi > 9 {
            return Err(SmfError::framing("mbus", "invalid BCD nibble"));
        }
        value += lo as u64 * mul;
        mul *= 10;
        value += hi as u64 * mul;
        mul *= 10;
    }
    Ok(value)
}

fn decode_date_g(bytes: [u8; 2]) -> DecodedValue {
    let day = bytes[0] & 0x1F;
    let month = bytes[1] & 0x0F;
    let year_low = (bytes[0] >> 5) & 0x07;
    let year_high = (bytes[1] >> 5) & 0x07;
    let year = 2000 + ((year_high << 3) | year_low) as u16;
    DecodedValue::DateG { year, month, day }
}

fn decode_date_f(bytes: [u8; 4]) -> DecodedValue {
    let minute = bytes[0] & 0x3F;
    let hour = bytes[1] & 0x1F;
    let day = bytes[2] & 0x1F;
    let month = bytes[3] & 0x0F;
    let year_low = (bytes[2] >> 5) & 0x07;
    let year_high = (bytes[3] >> 5) & 0x07;
    let year = 2000 + ((year_high << 3) | year_low) as u16;
    DecodedValue::DateTimeF { year, month, day, hour, minute }
}

/// VIF -> (unit, scaler, obis) across the EN13757-3 primary table (§the
/// fixed 0x00-0x7F range). `0x7B`/`0x7D` select one of the two VIFE
/// extension tables instead of naming a unit directly; callers detect that
/// case themselves and fall back to [`Unit::Extended`].
fn lookup_vif(vif: u8) -> Option<(Unit, i8, ObisCode)> {
    let primary = vif & 0x7F;
    if primary & 0x78 == 0x00 {
        // Energy, Wh: 0x00-0x07, scaler 10^(n-3) Wh.
        return Some((Unit::WattHour, (primary & 0x07) as i8 - 3, well_known::ACTIVE_ENERGY_IMPORT));
    }
    if primary & 0x78 == 0x08 {
        // Energy, J: 0x08-0x0F, scaler 10^n J.
        return Some((Unit::Joule, (primary & 0x07) as i8, well_known::ACTIVE_ENERGY_IMPORT));
    }
    if primary & 0x78 == 0x10 {
        // Volume, m3: 0x10-0x17, scaler 10^(n-6) m3.
        return Some((Unit::CubicMeter, (primary & 0x07) as i8 - 6, well_known::VOLUME));
    }
    if primary & 0x78 == 0x18 {
        // Mass, kg: 0x18-0x1F, scaler 10^(n-3) kg.
        return Some((Unit::Kilogram, (primary & 0x07) as i8 - 3, well_known::MASS));
    }
    if primary & 0x7C == 0x20 {
        // On time, 0x20-0x23: seconds/minutes/hours/days.
        let unit = match primary & 0x03 {
            0 => Unit::Seconds,
            1 => Unit::Minutes,
            2 => Unit::Hours,
            _ => Unit::Days,
        };
        return Some((unit, 0, well_known::ON_TIME));
    }
    if primary & 0x7C == 0x24 {
        // Operating time, 0x24-0x27: seconds/minutes/hours/days.
        let unit = match primary & 0x03 {
            0 => Unit::Seconds,
            1 => Unit::Minutes,
            2 => Unit::Hours,
            _ => Unit::Days,
        };
        return Some((unit, 0, well_known::OPERATING_TIME));
    }
    if primary & 0x78 == 0x28 {
        // Power, W: 0x28-0x2F, scaler 10^(n-3) W.
        return Some((Unit::Watt, (primary & 0x07) as i8 - 3, well_known::ACTIVE_POWER));
    }
    if primary & 0x78 == 0x30 {
        // Power, J/h: 0x30-0x37, scaler 10^n J/h.
        return Some((Unit::JoulePerHour, (primary & 0x07) as i8, well_known::ACTIVE_POWER));
    }
    if primary & 0x78 == 0x38 {
        // Volume flow, m3/h: 0x38-0x3F, scaler 10^(n-6) m3/h.
        return Some((Unit::CubicMeterPerHour, (primary & 0x07) as i8 - 6, well_known::VOLUME_FLOW));
    }
    if primary & 0x78 == 0x40 {
        // Volume flow ext., m3/min: 0x40-0x47, scaler 10^(n-7) m3/min.
        return Some((Unit::CubicMeterPerMinute, (primary & 0x07) as i8 - 7, well_known::VOLUME_FLOW));
    }
    if primary & 0x78 == 0x48 {
        // Volume flow ext., m3/s: 0x48-0x4F, scaler 10^(n-9) m3/s.
        return Some((Unit::CubicMeterPerSecond, (primary & 0x07) as i8 - 9, well_known::VOLUME_FLOW));
    }
    if primary & 0x78 == 0x50 {
        // Mass flow, kg/h: 0x50-0x57, scaler 10^(n-3) kg/h.
        return Some((Unit::KilogramPerHour, (primary & 0x07) as i8 - 3, well_known::MASS_FLOW));
    }
    if primary & 0x7C == 0x58 {
        // Flow temperature, 0x58-0x5B, scaler 10^(n-3) degC.
        return Some((Unit::Celsius, (primary & 0x03) as i8 - 3, well_known::FLOW_TEMPERATURE));
    }
    if primary & 0x7C == 0x5C {
        // Return temperature, 0x5C-0x5F, scaler 10^(n-3) degC.
        return Some((Unit::Celsius, (primary & 0x03) as i8 - 3, well_known::RETURN_TEMPERATURE));
    }
    if primary & 0x7C == 0x60 {
        // Temperature difference, 0x60-0x63, scaler 10^(n-3) K.
        return Some((Unit::Kelvin, (primary & 0x03) as i8 - 3, well_known::TEMPERATURE_DIFFERENCE));
    }
    if primary & 0x7C == 0x64 {
        // External (ambient) temperature, 0x64-0x67, scaler 10^(n-3) degC.
        return Some((Unit::Celsius, (primary & 0x03) as i8 - 3, well_known::EXTERNAL_TEMPERATURE));
    }
    if primary & 0x7C == 0x68 {
        // Pressure, 0x68-0x6B, scaler 10^(n-3) bar.
        return Some((Unit::Bar, (primary & 0x03) as i8 - 3, well_known::PRESSURE));
    }
    if primary == 0x78 {
        return Some((Unit::Count, 0, well_known::SERIAL_NR));
    }
    None
}

/// Attempts to parse one DIF(+DIFE...)VIF(+VIFE...)DATA group from the
/// front of `bytes`. Returns the reading plus bytes consumed, or `None` if
/// `bytes` doesn't yet hold a complete group.
pub fn parse_one(bytes: &[u8]) -> Result<Option<(Reading, usize)>, SmfError> {
    let mut i = 0;
    let dif = match bytes.first() {
        Some(b) => *b,
        None => return Ok(None),
    };
    i += 1;

    let data_type = DataType::from_nibble(dif & 0x0F);
    let function = Function::from_dif(dif);
    let mut storage_number = ((dif >> 6) & 0x01) as u32;

    let mut tariff: u32 = 0;
    let mut sub_unit: u32 = 0;
    let mut dife_ext = dif & 0x80 != 0;
    let mut storage_shift = 1u32;
    let mut tariff_shift = 0u32;
    while dife_ext {
        let dife = match bytes.get(i) {
            Some(b) => *b,
            None => return Ok(None),
        };
        i += 1;
        storage_number |= ((dife & 0x0F) as u32) << storage_shift;
        tariff |= (((dife >> 4) & 0x03) as u32) << tariff_shift;
        sub_unit |= ((dife >> 6) & 0x01) as u32;
        storage_shift += 4;
        tariff_shift += 2;
        dife_ext = dife & 0x80 != 0;
    }

    let vif = match bytes.get(i) {
        Some(b) => *b,
        None => return Ok(None),
    };
    i += 1;
    let mut first_vife = None;
    let mut vife_ext = vif & 0x80 != 0;
    while vife_ext {
        let b = match bytes.get(i) {
            Some(b) => *b,
            None => return Ok(None),
        };
        i += 1;
        first_vife.get_or_insert(b);
        vife_ext = b & 0x80 != 0;
    }

    let (unit, scaler, obis) = match vif & 0x7F {
        0x7B | 0x7D => (Unit::Extended(first_vife.unwrap_or(0) & 0x7F), 0, well_known::STATUS_WORD),
        _ => lookup_vif(vif).unwrap_or((Unit::Unknown(vif), 0, well_known::STATUS_WORD)),
    };

    let len = match data_type.fixed_len() {
        Some(n) => n,
        None => {
            let n = match bytes.get(i) {
                Some(b) => *b as usize,
                None => return Ok(None),
            };
            i += 1;
            n
        },
    };
    if bytes.len() < i + len {
        return Ok(None);
    }
    let payload = &bytes[i..i + len];
    i += len;

    let value = match data_type {
        DataType::None | DataType::Selection => DecodedValue::Placeholder,
        DataType::Int8 => DecodedValue::Integer(payload[0] as i8 as i64),
        DataType::Int16 => DecodedValue::Integer(i16::from_le_bytes([payload[0], payload[1]]) as i64),
        DataType::Int24 => {
            let v = (payload[0] as i32) | ((payload[1] as i32) << 8) | ((payload[2] as i32) << 16);
            let v = (v << 8) >> 8; // sign-extend 24 -> 32
            DecodedValue::Integer(v as i64)
        },
        DataType::Int32 => DecodedValue::Integer(i32::from_le_bytes(payload.try_into().unwrap()) as i64),
        DataType::Real32 => DecodedValue::Real(f32::from_le_bytes(payload.try_into().unwrap())),
        DataType::Int48 => {
            let mut b = [0u8; 8];
            b[..6].copy_from_slice(payload);
            let v = i64::from_le_bytes(b);
            let v = (v << 16) >> 16;
            DecodedValue::Integer(v)
        },
        DataType::Int64 => DecodedValue::Integer(i64::from_le_bytes(payload.try_into().unwrap())),
        DataType::Bcd2 | DataType::Bcd4 | DataType::Bcd6 | DataType::Bcd8 | DataType::Bcd12 => {
            if len == 2 && unit == Unit::Celsius {
                decode_date_g([payload[0], payload[1]])
            } else {
                DecodedValue::Integer(bcd_to_u64(payload)? as i64)
            }
        },
        DataType::Variable | DataType::Special => {
            if len == 4 {
                decode_date_f(payload.try_into().unwrap())
            } else {
                DecodedValue::Raw(payload.to_vec())
            }
        },
    };

    Ok(Some((
        Reading { obis, unit, scaler, function, storage_number, tariff, sub_unit, value },
        i,
    )))
}

/// Parses every complete group in `bytes`, skipping `length_` bytes past an
/// unrecoverable group so byte alignment is preserved for the rest of the
/// stream, matching the design's unknown-DIF/VIF failure semantics.
pub fn parse_all(bytes: &[u8]) -> Vec<Reading> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        match parse_one(&bytes[offset..]) {
            Ok(Some((reading, consumed))) => {
                out.push(reading);
                offset += consumed.max(1);
            },
            Ok(None) => break,
            Err(_) => {
                offset += 1;
            },
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_fabrication_number_scenario() {
        let bytes = [0x0C, 0x78, 0x14, 0x52, 0x10, 0x00];
        let (reading, consumed) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(consumed, bytes.len());
        assert_eq!(reading.obis, well_known::SERIAL_NR);
        assert_eq!(reading.unit, Unit::Count);
        assert_eq!(reading.scaler, 0);
        // Standard M-Bus BCD: little-endian byte order, low nibble is the
        // least significant digit within each byte.
        assert_eq!(reading.value, DecodedValue::Integer(105_214));
    }

    #[test]
    fn returns_none_on_truncated_group() {
        let bytes = [0x04, 0x03, 0x01, 0x02];
        assert_eq!(parse_one(&bytes).expect("parse ok"), None);
    }

    #[test]
    fn decodes_energy_int32() {
        let mut bytes = vec![0x04, 0x03];
        bytes.extend_from_slice(&1_000_000i32.to_le_bytes());
        let (reading, consumed) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(consumed, bytes.len());
        assert_eq!(reading.unit, Unit::WattHour);
        assert_eq!(reading.scaler, 0);
        assert_eq!(reading.value, DecodedValue::Integer(1_000_000));
    }

    #[test]
    fn decodes_volume_flow_and_mass_categories() {
        let bytes = [0x04, 0x3A, 0x05, 0x00, 0x00, 0x00];
        let (reading, _) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(reading.unit, Unit::CubicMeterPerHour);
        assert_eq!(reading.obis, well_known::VOLUME_FLOW);

        let bytes = [0x04, 0x1A, 0x05, 0x00, 0x00, 0x00];
        let (reading, _) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(reading.unit, Unit::Kilogram);
        assert_eq!(reading.obis, well_known::MASS);
    }

    #[test]
    fn decodes_return_temperature_and_pressure() {
        let bytes = [0x01, 0x5D, 0x14];
        let (reading, _) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(reading.unit, Unit::Celsius);
        assert_eq!(reading.obis, well_known::RETURN_TEMPERATURE);

        let bytes = [0x01, 0x69, 0x0A];
        let (reading, _) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(reading.unit, Unit::Bar);
        assert_eq!(reading.obis, well_known::PRESSURE);
    }

    #[test]
    fn vife_extension_table_selector_is_kept_instead_of_discarded() {
        // VIF 0xFB (primary 0x7B, first extension table) followed by one
        // VIFE byte 0x8A (extension bit set, selector 0x0A).
        let bytes = [0x01, 0xFB, 0x0A, 0x05];
        let (reading, consumed) = parse_one(&bytes).expect("parse ok").expect("complete group");
        assert_eq!(consumed, bytes.len());
        assert_eq!(reading.unit, Unit::Extended(0x0A));
    }

    #[test]
    fn parse_all_consumes_back_to_back_groups() {
        let mut bytes = vec![0x0C, 0x78, 0x14, 0x52, 0x10, 0x00];
        bytes.extend_from_slice(&[0x01, 0x28, 0x07]); // instant power, int8
        let readings = parse_all(&bytes);
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[1].unit, Unit::Watt);
    }
}
