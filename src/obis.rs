// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C5 — OBIS registry and decimal scaling.
//!
//! An OBIS code is a 6-byte identifier `(A, B, C, D, E, F)`. This module also
//! hosts the [`Profile`] grid model (next-boundary computation) since every
//! profile *is* an OBIS code from a fixed subset, and the decimal scaling
//! helpers used to turn `(raw, scaler)` pairs into the printed strings SML
//! carries on the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A 6-byte OBIS identifier `(A, B, C, D, E, F)`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObisCode(pub [u8; 6]);

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        ObisCode([a, b, c, d, e, f])
    }

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        ObisCode(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    pub fn a(&self) -> u8 {
        self.0[0]
    }
    pub fn b(&self) -> u8 {
        self.0[1]
    }
    pub fn c(&self) -> u8 {
        self.0[2]
    }
    pub fn d(&self) -> u8 {
        self.0[3]
    }
    pub fn e(&self) -> u8 {
        self.0[4]
    }
    pub fn f(&self) -> u8 {
        self.0[5]
    }

    /// True if `self` begins with the given byte prefix (1..=6 bytes).
    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        prefix.len() <= 6 && &self.0[..prefix.len()] == prefix
    }

    /// The storage/index byte for grouping values within a profile. Most
    /// channels index on byte F (tariff-independent); a handful of vendor
    /// extensions index on byte E instead.
    pub fn storage_index(&self, use_e: bool) -> u8 {
        if use_e { self.e() } else { self.f() }
    }
}

impl fmt::Debug for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x} {:02x} {:02x} {:02x} {:02x} {:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// A sampling cadence for stored readings. Each variant is backed by a fixed
/// OBIS code from [`Profile::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    #[serde(rename = "1-min")]
    OneMinute,
    #[serde(rename = "15-min")]
    FifteenMinutes,
    #[serde(rename = "60-min")]
    SixtyMinutes,
    #[serde(rename = "24-hour")]
    Daily,
    #[serde(rename = "last-2-hours")]
    Last2Hours,
    #[serde(rename = "last-week")]
    LastWeek,
    #[serde(rename = "1-month")]
    OneMonth,
    #[serde(rename = "1-year")]
    OneYear,
    #[serde(rename = "initial")]
    Initial,
}

impl Profile {
    /// The canonical OBIS code for this profile.
    pub const fn code(self) -> ObisCode {
        match self {
            Profile::OneMinute => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x11, 0xFF),
            Profile::FifteenMinutes => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x12, 0xFF),
            Profile::SixtyMinutes => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x13, 0xFF),
            Profile::Daily => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x14, 0xFF),
            Profile::Last2Hours => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x15, 0xFF),
            Profile::LastWeek => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x16, 0xFF),
            Profile::OneMonth => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x17, 0xFF),
            Profile::OneYear => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x18, 0xFF),
            Profile::Initial => ObisCode::new(0x81, 0x81, 0xC7, 0x86, 0x20, 0xFF),
        }
    }

    /// Grid period in seconds, or `None` for [`Profile::Initial`] which is a
    /// one-shot, non-periodic grid (see DESIGN.md).
    pub const fn period_secs(self) -> Option<i64> {
        match self {
            Profile::OneMinute => Some(60),
            Profile::FifteenMinutes => Some(15 * 60),
            Profile::SixtyMinutes => Some(60 * 60),
            Profile::Daily => Some(24 * 60 * 60),
            Profile::Last2Hours => Some(2 * 60 * 60),
            Profile::LastWeek => Some(7 * 24 * 60 * 60),
            Profile::OneMonth => Some(30 * 24 * 60 * 60),
            Profile::OneYear => Some(365 * 24 * 60 * 60),
            Profile::Initial => None,
        }
    }

    /// The smallest grid-aligned instant strictly greater than `now`.
    pub fn next(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.period_secs() {
            Some(period) => {
                let t = now.timestamp();
                let next_idx = t.div_euclid(period) + 1;
                DateTime::from_timestamp(next_idx * period, 0).unwrap_or(now)
            },
            // Initial profile fires once, immediately after being armed.
            None => now + chrono::Duration::seconds(1),
        }
    }

    /// `ts_index` for the grid index this profile stores rows under:
    /// `floor(unix_seconds / period)`. `Initial` uses the raw unix second.
    pub fn index_from_ts(self, t: DateTime<Utc>) -> i64 {
        match self.period_secs() {
            Some(period) => t.timestamp().div_euclid(period),
            None => t.timestamp(),
        }
    }

    /// Inverse of [`Profile::index_from_ts`]: the grid-aligned instant that
    /// index `idx` represents.
    pub fn ts_from_index(self, idx: i64) -> DateTime<Utc> {
        let period = self.period_secs().unwrap_or(1);
        DateTime::from_timestamp(idx * period, 0).unwrap_or_default()
    }

    pub fn is_profile_code(code: ObisCode) -> bool {
        ALL_PROFILES.iter().any(|p| p.code() == code)
    }
}

pub const ALL_PROFILES: [Profile; 9] = [
    Profile::OneMinute,
    Profile::FifteenMinutes,
    Profile::SixtyMinutes,
    Profile::Daily,
    Profile::Last2Hours,
    Profile::LastWeek,
    Profile::OneMonth,
    Profile::OneYear,
    Profile::Initial,
];

/// A curated dictionary of well-known OBIS codes: root objects, profile
/// identifiers, and the meter-reading channels exercised by the test suite.
/// Not a byte-exact rendition of any official OBIS registry — a consistent
/// internal naming used throughout this crate and its tests.
pub mod well_known {
    use super::ObisCode;

    /// SML root object list.
    pub const ROOT: ObisCode = ObisCode::new(0x81, 0x81, 0xC7, 0x82, 0x01, 0xFF);
    /// Active energy import, tariff-independent.
    pub const ACTIVE_ENERGY_IMPORT: ObisCode = ObisCode::new(0x01, 0x00, 0x01, 0x08, 0x00, 0xFF);
    /// Active power, total.
    pub const ACTIVE_POWER: ObisCode = ObisCode::new(0x01, 0x00, 0x01, 0x07, 0x00, 0xFF);
    /// Device/fabrication serial number, as decoded from M-Bus VIF 0x78.
    pub const SERIAL_NR: ObisCode = ObisCode::new(0x00, 0x00, 0x60, 0x01, 0x00, 0xFF);
    /// Current status word.
    pub const STATUS_WORD: ObisCode = ObisCode::new(0x00, 0x00, 0x60, 0x05, 0x00, 0xFF);
    /// Accumulated volume (water/gas/heat meters).
    pub const VOLUME: ObisCode = ObisCode::new(0x00, 0x00, 0x01, 0x08, 0x00, 0xFF);
    /// Flow temperature (heat meters).
    pub const FLOW_TEMPERATURE: ObisCode = ObisCode::new(0x00, 0x00, 0x06, 0x00, 0x00, 0xFF);
    /// Accumulated mass (heat/gas meters billed by weight).
    pub const MASS: ObisCode = ObisCode::new(0x00, 0x00, 0x01, 0x09, 0x00, 0xFF);
    /// Cumulative on-time.
    pub const ON_TIME: ObisCode = ObisCode::new(0x00, 0x00, 0x60, 0x08, 0x00, 0xFF);
    /// Cumulative operating (measuring) time.
    pub const OPERATING_TIME: ObisCode = ObisCode::new(0x00, 0x00, 0x60, 0x09, 0x00, 0xFF);
    /// Instantaneous volume flow rate.
    pub const VOLUME_FLOW: ObisCode = ObisCode::new(0x00, 0x00, 0x01, 0x07, 0x00, 0xFF);
    /// Instantaneous mass flow rate.
    pub const MASS_FLOW: ObisCode = ObisCode::new(0x00, 0x00, 0x01, 0x0A, 0x00, 0xFF);
    /// Return-line temperature (heat meters).
    pub const RETURN_TEMPERATURE: ObisCode = ObisCode::new(0x00, 0x00, 0x06, 0x01, 0x00, 0xFF);
    /// Flow/return temperature difference.
    pub const TEMPERATURE_DIFFERENCE: ObisCode = ObisCode::new(0x00, 0x00, 0x06, 0x02, 0x00, 0xFF);
    /// External (ambient) temperature.
    pub const EXTERNAL_TEMPERATURE: ObisCode = ObisCode::new(0x00, 0x00, 0x06, 0x03, 0x00, 0xFF);
    /// Line pressure (heat/gas meters).
    pub const PRESSURE: ObisCode = ObisCode::new(0x00, 0x00, 0x06, 0x04, 0x00, 0xFF);
}

/// Looks up a human-readable name for a well-known or profile OBIS code.
pub fn get_name(code: ObisCode) -> Option<&'static str> {
    use well_known::*;
    if code == ROOT {
        return Some("root");
    }
    if code == ACTIVE_ENERGY_IMPORT {
        return Some("active-energy-import");
    }
    if code == ACTIVE_POWER {
        return Some("active-power");
    }
    if code == SERIAL_NR {
        return Some("serial-nr");
    }
    if code == STATUS_WORD {
        return Some("status-word");
    }
    if code == VOLUME {
        return Some("volume");
    }
    if code == FLOW_TEMPERATURE {
        return Some("flow-temperature");
    }
    if code == MASS {
        return Some("mass");
    }
    if code == ON_TIME {
        return Some("on-time");
    }
    if code == OPERATING_TIME {
        return Some("operating-time");
    }
    if code == VOLUME_FLOW {
        return Some("volume-flow");
    }
    if code == MASS_FLOW {
        return Some("mass-flow");
    }
    if code == RETURN_TEMPERATURE {
        return Some("return-temperature");
    }
    if code == TEMPERATURE_DIFFERENCE {
        return Some("temperature-difference");
    }
    if code == EXTERNAL_TEMPERATURE {
        return Some("external-temperature");
    }
    if code == PRESSURE {
        return Some("pressure");
    }
    for p in ALL_PROFILES {
        if p.code() == code {
            return Some(match p {
                Profile::OneMinute => "profile-1-min",
                Profile::FifteenMinutes => "profile-15-min",
                Profile::SixtyMinutes => "profile-60-min",
                Profile::Daily => "profile-24-hour",
                Profile::Last2Hours => "profile-last-2-hours",
                Profile::LastWeek => "profile-last-week",
                Profile::OneMonth => "profile-1-month",
                Profile::OneYear => "profile-1-year",
                Profile::Initial => "profile-initial",
            });
        }
    }
    None
}

pub fn is_profile(code: ObisCode) -> bool {
    Profile::is_profile_code(code)
}

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("invalid decimal string: {0}")]
    InvalidDecimal(String),
}

/// Renders `raw * 10^scaler` as its shortest exact decimal representation,
/// computed purely via string/digit manipulation (never floating point) to
/// preserve precision.
///
/// See DESIGN.md for the resolution of the zero-value edge case
/// (`scale_value(0, -1) == "0.0"` but `scale_value(100, -2) == "1"`).
pub fn scale_value(raw: i64, scaler: i8) -> String {
    let sign = raw < 0;
    let digits = raw.unsigned_abs().to_string();

    let body = if scaler >= 0 {
        if raw == 0 {
            "0".to_string()
        } else {
            let mut s = digits;
            s.extend(std::iter::repeat_n('0', scaler as usize));
            s
        }
    } else {
        let frac_len = (-scaler) as usize;
        let mut padded = digits;
        while padded.len() <= frac_len {
            padded.insert(0, '0');
        }
        let split_at = padded.len() - frac_len;
        let (int_part, frac_part) = padded.split_at(split_at);
        let trimmed = frac_part.trim_end_matches('0');
        if trimmed.is_empty() {
            if int_part.chars().all(|c| c == '0') {
                format!("{int_part}.0")
            } else {
                int_part.to_string()
            }
        } else {
            format!("{int_part}.{trimmed}")
        }
    };

    if sign && body.chars().any(|c| c != '0' && c != '.') {
        format!("-{body}")
    } else {
        body
    }
}

/// Recovers the integer `raw` from a string produced by [`scale_value`] for
/// the same `scaler`.
pub fn scale_reverse(s: &str, scaler: i8) -> Result<i64, ScaleError> {
    let s = s.trim();
    let (sign, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let value: i128 = if scaler >= 0 {
        let v: i128 = body
            .parse()
            .map_err(|_| ScaleError::InvalidDecimal(s.to_string()))?;
        let divisor = 10i128.pow(scaler as u32);
        v / divisor
    } else {
        let frac_len = (-scaler) as u32;
        match body.split_once('.') {
            Some((int_part, frac_part)) => {
                let mut frac = frac_part.to_string();
                while (frac.len() as u32) < frac_len {
                    frac.push('0');
                }
                let combined = format!("{int_part}{frac}");
                combined
                    .parse()
                    .map_err(|_| ScaleError::InvalidDecimal(s.to_string()))?
            },
            None => {
                let v: i128 = body
                    .parse()
                    .map_err(|_| ScaleError::InvalidDecimal(s.to_string()))?;
                v * 10i128.pow(frac_len)
            },
        }
    };

    let value = if sign { -value } else { value };
    Ok(value as i64)
}
