// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C8 — the profile storage contract (§4.7): the core never owns a SQL
//! schema, only this trait, plus an in-memory reference implementation the
//! push-job scheduler and its tests run against.

use std::sync::Mutex;

use dashmap::DashMap;

use crate::error::SmfError;
use crate::obis::{ObisCode, Profile};

#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRow {
    pub ts_index: i64,
    pub obis: ObisCode,
    pub value: String,
    pub scaler: i8,
    pub unit: String,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpLogEntry {
    pub status: String,
    pub code: String,
    pub peer: String,
    pub server: String,
    pub target: String,
    pub nr: u8,
    pub message: String,
}

/// The contract every real storage backend (SQLite in the production
/// system; memory here) must satisfy.
pub trait ProfileStorage: Send + Sync {
    /// Idempotent on `(meter, profile, ts_index, obis)` — a repeated insert
    /// with the same key replaces the prior value rather than duplicating
    /// the row.
    fn insert(&self, meter: &str, profile: Profile, ts_index: i64, obis: ObisCode, value: String, scaler: i8, unit: String, status: u8) -> Result<(), SmfError>;

    /// Rows for `meter`/`profile` with `ts_index` in `[from, to]`, grouped
    /// by `ts_index` and yielded in ascending order.
    fn select_window(&self, meter: &str, profile: Profile, ts_index_from: i64, ts_index_to: i64) -> Vec<ProfileRow>;

    fn generate_op_log(&self, entry: OpLogEntry);
}

type Key = (String, Profile, i64, ObisCode);

/// In-memory reference implementation used by tests and by `segw` when no
/// persistent backend is configured (`storage.backend: memory`).
#[derive(Default)]
pub struct MemoryStorage {
    rows: DashMap<Key, ProfileRow>,
    op_log: Mutex<Vec<OpLogEntry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op_log(&self) -> Vec<OpLogEntry> {
        self.op_log.lock().expect("op log lock poisoned").clone()
    }
}

impl ProfileStorage for MemoryStorage {
    fn insert(&self, meter: &str, profile: Profile, ts_index: i64, obis: ObisCode, value: String, scaler: i8, unit: String, status: u8) -> Result<(), SmfError> {
        let key = (meter.to_string(), profile, ts_index, obis);
        self.rows.insert(key, ProfileRow { ts_index, obis, value, scaler, unit, status });
        Ok(())
    }

    fn select_window(&self, meter: &str, profile: Profile, ts_index_from: i64, ts_index_to: i64) -> Vec<ProfileRow> {
        let mut rows: Vec<ProfileRow> = self
            .rows
            .iter()
            .filter(|entry| {
                let (m, p, ts, _) = entry.key();
                m == meter && *p == profile && *ts >= ts_index_from && *ts <= ts_index_to
            })
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|r| (r.ts_index, r.obis));
        rows
    }

    fn generate_op_log(&self, entry: OpLogEntry) {
        self.op_log.lock().expect("op log lock poisoned").push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obis::well_known;

    #[test]
    fn insert_is_idempotent_on_the_composite_key() {
        let storage = MemoryStorage::new();
        storage.insert("meter-1", Profile::FifteenMinutes, 100, well_known::ACTIVE_ENERGY_IMPORT, "1.0".into(), -1, "Wh".into(), 0).unwrap();
        storage.insert("meter-1", Profile::FifteenMinutes, 100, well_known::ACTIVE_ENERGY_IMPORT, "2.0".into(), -1, "Wh".into(), 0).unwrap();

        let rows = storage.select_window("meter-1", Profile::FifteenMinutes, 0, 1000);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "2.0");
    }

    #[test]
    fn select_window_returns_rows_in_ascending_ts_order() {
        let storage = MemoryStorage::new();
        for ts in [103, 101, 102] {
            storage.insert("meter-2", Profile::FifteenMinutes, ts, well_known::ACTIVE_POWER, format!("{ts}"), 0, "W".into(), 0).unwrap();
        }
        let rows = storage.select_window("meter-2", Profile::FifteenMinutes, 101, 103);
        let ts_values: Vec<i64> = rows.iter().map(|r| r.ts_index).collect();
        assert_eq!(ts_values, vec![101, 102, 103]);
    }

    #[test]
    fn select_window_excludes_out_of_range_and_other_meters() {
        let storage = MemoryStorage::new();
        storage.insert("meter-3", Profile::SixtyMinutes, 5, well_known::ACTIVE_POWER, "x".into(), 0, "W".into(), 0).unwrap();
        storage.insert("meter-3", Profile::SixtyMinutes, 50, well_known::ACTIVE_POWER, "y".into(), 0, "W".into(), 0).unwrap();
        storage.insert("meter-4", Profile::SixtyMinutes, 6, well_known::ACTIVE_POWER, "z".into(), 0, "W".into(), 0).unwrap();

        let rows = storage.select_window("meter-3", Profile::SixtyMinutes, 0, 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "x");
    }

    #[test]
    fn op_log_is_append_only() {
        let storage = MemoryStorage::new();
        storage.generate_op_log(OpLogEntry { status: "ok".into(), code: "0".into(), peer: "p".into(), server: "s".into(), target: "t".into(), nr: 1, message: "first".into() });
        storage.generate_op_log(OpLogEntry { status: "ok".into(), code: "0".into(), peer: "p".into(), server: "s".into(), target: "t".into(), nr: 1, message: "second".into() });
        let log = storage.op_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].message, "first");
        assert_eq!(log[1].message, "second");
    }
}
