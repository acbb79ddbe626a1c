// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A subscribed connection must keep receiving readout notifications across
//! an HTTP->SOCKET upgrade, and must stop receiving them once removed — the
//! delivery path a gateway client actually relies on, combining C7 and C12.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use smf_core::cache::{ReadoutCache, ReadoutObserver, Table};
use smf_core::connection_manager::{ConnectionManager, SessionInfo, TableKind};
use smf_core::mbus::frame::flag_to_manufacturer;
use smf_core::mbus::ServerId;
use uuid::Uuid;

struct ChannelFanout {
    connections: Arc<ConnectionManager>,
    channel: String,
    delivered: Mutex<Vec<Uuid>>,
}

impl ReadoutObserver for ChannelFanout {
    fn on_insert(&self, _table: Table, _key: Uuid, _generation: u64, _origin: &str) {
        let mut delivered = self.delivered.lock().expect("lock");
        delivered.extend(self.connections.listeners_of(&self.channel));
    }
}

#[test]
fn subscribed_connection_keeps_receiving_readouts_across_an_upgrade_then_stops_after_removal() {
    let connections = Arc::new(ConnectionManager::new());
    let client = Uuid::new_v4();
    connections.insert(TableKind::HttpPlain, client, SessionInfo { peer: "10.0.0.5:51000".into() });
    connections.subscribe("meter-1/readouts", client);

    let fanout = Arc::new(ChannelFanout { connections: connections.clone(), channel: "meter-1/readouts".into(), delivered: Mutex::new(Vec::new()) });
    let cache = ReadoutCache::new();
    cache.subscribe(fanout.clone());

    let id = ServerId { medium: 2, manufacturer: flag_to_manufacturer("QDS").expect("QDS is a known manufacturer flag"), serial: 1, version: 1, device_type: 2 };
    let row = |seconds: i64| smf_core::cache::ReadoutRow {
        server_id: id,
        frame_type: "wmbus".into(),
        size: 4,
        payload: vec![1, 2, 3, 4],
        received_at: chrono::Utc::now() + chrono::Duration::seconds(seconds),
    };

    cache.insert_readout(row(0), Duration::from_secs(0), "lmn").expect("first insert notifies");
    assert_eq!(fanout.delivered.lock().expect("lock").len(), 1, "subscriber should have been notified once before upgrade");

    connections.upgrade(client).expect("http session should be upgradable");
    assert!(!connections.contains(TableKind::HttpPlain, client));
    assert!(connections.contains(TableKind::SocketPlain, client));

    cache.insert_readout(row(10), Duration::from_secs(0), "lmn").expect("second insert notifies");
    assert_eq!(fanout.delivered.lock().expect("lock").len(), 2, "subscription must survive the HTTP->SOCKET upgrade");

    connections.remove(client);
    cache.insert_readout(row(20), Duration::from_secs(0), "lmn").expect("third insert notifies");
    assert_eq!(fanout.delivered.lock().expect("lock").len(), 2, "no listeners should remain after remove");
}
