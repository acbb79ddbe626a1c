// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C7 — the readout cache: an in-memory store of raw and decoded readouts
//! with observer notification, matching the two logical tables `_Readout`
//! and `_ReadoutData` from the design.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::mbus::ServerId;
use crate::obis::ObisCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Readout,
    ReadoutData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutRow {
    pub server_id: ServerId,
    pub frame_type: String,
    pub size: u32,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadoutDataRow {
    pub raw: String,
    pub type_tag: String,
    pub scaler: i8,
    pub unit: String,
}

/// Subscribers receive `(table, key, generation, origin)` for every
/// mutation. A broker attached to a wireless source watches `Readout` and
/// forwards raw frames; a profile-storage task watches `ReadoutData` and
/// persists per-profile aggregates (§4.6).
pub trait ReadoutObserver: Send + Sync {
    fn on_insert(&self, table: Table, key: Uuid, generation: u64, origin: &str);
    fn on_modify(&self, table: Table, key: Uuid, generation: u64, origin: &str) {
        let _ = (table, key, generation, origin);
    }
    fn on_remove(&self, table: Table, key: Uuid, generation: u64, origin: &str) {
        let _ = (table, key, generation, origin);
    }
    fn on_clear(&self, table: Table, generation: u64, origin: &str) {
        let _ = (table, generation, origin);
    }
}

fn server_key(id: &ServerId) -> u64 {
    ((id.manufacturer as u64) << 32) | id.serial as u64
}

/// In-memory `_Readout`/`_ReadoutData` store plus the dedup gate described
/// in §4.6.
#[derive(Default)]
pub struct ReadoutCache {
    readout: DashMap<Uuid, ReadoutRow>,
    readout_data: DashMap<(Uuid, ObisCode), ReadoutDataRow>,
    last_seen: DashMap<u64, DateTime<Utc>>,
    observers: RwLock<Vec<Arc<dyn ReadoutObserver>>>,
    generation: AtomicU64,
    /// `meter name -> server id bytes`, keyed by `ServerId`'s `Display`
    /// rendering (the same string a `push.Meter` config entry names a
    /// device by), updated as readouts for each device arrive.
    known_meters: DashMap<String, ServerId>,
}

impl std::fmt::Debug for ReadoutCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadoutCache")
            .field("readout_rows", &self.readout.len())
            .field("readout_data_rows", &self.readout_data.len())
            .finish()
    }
}

impl ReadoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn ReadoutObserver>) {
        self.observers.write().expect("observer lock poisoned").push(observer);
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    fn notify_insert(&self, table: Table, key: Uuid, generation: u64, origin: &str) {
        for observer in self.observers.read().expect("observer lock poisoned").iter() {
            observer.on_insert(table, key, generation, origin);
        }
    }

    fn notify_remove(&self, table: Table, key: Uuid, generation: u64, origin: &str) {
        for observer in self.observers.read().expect("observer lock poisoned").iter() {
            observer.on_remove(table, key, generation, origin);
        }
    }

    fn notify_clear(&self, table: Table, generation: u64, origin: &str) {
        for observer in self.observers.read().expect("observer lock poisoned").iter() {
            observer.on_clear(table, generation, origin);
        }
    }

    /// Inserts a raw readout, gated by `max_readout_frequency`. Returns the
    /// new row's key, or `None` if the insert was dropped as a duplicate
    /// seen too soon after the last one for this device.
    pub fn insert_readout(&self, row: ReadoutRow, max_readout_frequency: Duration, origin: &str) -> Option<Uuid> {
        let key = server_key(&row.server_id);
        let now = row.received_at;
        if let Some(last) = self.last_seen.get(&key) {
            let elapsed = now.signed_duration_since(*last);
            if elapsed < chrono::Duration::from_std(max_readout_frequency).unwrap_or_default() {
                return None;
            }
        }
        self.last_seen.insert(key, now);
        self.known_meters.insert(row.server_id.to_string(), row.server_id);
        let pk = Uuid::new_v4();
        self.readout.insert(pk, row);
        let generation = self.next_generation();
        self.notify_insert(Table::Readout, pk, generation, origin);
        Some(pk)
    }

    pub fn insert_readout_data(&self, pk: Uuid, obis: ObisCode, row: ReadoutDataRow, origin: &str) {
        self.readout_data.insert((pk, obis), row);
        let generation = self.next_generation();
        self.notify_insert(Table::ReadoutData, pk, generation, origin);
    }

    pub fn get_readout(&self, pk: Uuid) -> Option<ReadoutRow> {
        self.readout.get(&pk).map(|r| r.clone())
    }

    pub fn get_readout_data(&self, pk: Uuid, obis: ObisCode) -> Option<ReadoutDataRow> {
        self.readout_data.get(&(pk, obis)).map(|r| r.clone())
    }

    pub fn remove_readout(&self, pk: Uuid, origin: &str) {
        if self.readout.remove(&pk).is_some() {
            let generation = self.next_generation();
            self.notify_remove(Table::Readout, pk, generation, origin);
        }
    }

    pub fn clear(&self, origin: &str) {
        self.readout.clear();
        self.readout_data.clear();
        let generation = self.next_generation();
        self.notify_clear(Table::Readout, generation, origin);
        self.notify_clear(Table::ReadoutData, generation, origin);
    }

    /// The raw server-id bytes last seen for a device named `meter`, or
    /// `None` if no readout has arrived for it yet. Backs the push-job
    /// scheduler's live meter -> server-id resolution (§4.9).
    pub fn server_id_for(&self, meter: &str) -> Option<Vec<u8>> {
        self.known_meters.get(meter).map(|id| id.to_bytes().to_vec())
    }

    pub fn len(&self) -> usize {
        self.readout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readout.is_empty()
    }
}
