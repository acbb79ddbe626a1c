// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use smf_core::obis::{scale_reverse, scale_value, well_known, ObisCode, Profile};

#[test]
fn scale_value_and_scale_reverse_round_trip_across_negative_and_positive_scalers() {
    for (raw, scaler) in [(145210_i64, -2), (14521, -1), (1, 0), (-138, -1), (0, -3)] {
        let rendered = scale_value(raw, scaler);
        let back = scale_reverse(&rendered, scaler).expect("scale_reverse should accept its own output");
        assert_eq!(back, raw, "round trip failed for raw={raw} scaler={scaler} (rendered {rendered:?})");
    }
}

#[test]
fn active_energy_import_is_distinct_from_active_power() {
    assert_ne!(well_known::ACTIVE_ENERGY_IMPORT, well_known::ACTIVE_POWER);
}

#[test]
fn obis_code_round_trips_through_its_byte_representation() {
    let code = ObisCode::new(1, 0, 1, 8, 0, 0xFF);
    assert_eq!(ObisCode::from_bytes(*code.as_bytes()), code);
    assert_eq!(code.a(), 1);
    assert_eq!(code.f(), 0xFF);
}

#[test]
fn profile_index_and_timestamp_are_inverse_on_period_boundaries() {
    let profile = Profile::FifteenMinutes;
    let idx = 123_456;
    let ts = profile.ts_from_index(idx);
    assert_eq!(profile.index_from_ts(ts), idx);
}
