// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C12 — the connection manager: four session tables keyed by connection
//! UUID, a `upgrade` operation that atomically moves an entry from its HTTP
//! table to the matching SOCKET table, and a listener-by-channel multimap
//! for pub/sub (§4.11).
//!
//! §5's "Shared resources" paragraph calls for a `std::lock`-equivalent
//! paired-lock primitive here, not the lock-free `DashMap` tables used
//! elsewhere in the gateway: a session move must be visible to readers as a
//! single atomic step, which means holding both tables' locks for the
//! duration of the move.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::SmfError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    HttpPlain,
    HttpSsl,
    SocketPlain,
    SocketSsl,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub peer: String,
}

type Table = Mutex<HashMap<Uuid, SessionInfo>>;

/// Maintains the four session tables and the channel listener multimap. Lock
/// order within `upgrade` is always HTTP table first, SOCKET table second,
/// matching §5's "HTTP_PLAIN → SOCKET_PLAIN, HTTP_SSL → SOCKET_SSL" rule.
#[derive(Default)]
pub struct ConnectionManager {
    http_plain: Table,
    http_ssl: Table,
    socket_plain: Table,
    socket_ssl: Table,
    listeners: Mutex<HashMap<String, HashSet<Uuid>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: TableKind) -> &Table {
        match kind {
            TableKind::HttpPlain => &self.http_plain,
            TableKind::HttpSsl => &self.http_ssl,
            TableKind::SocketPlain => &self.socket_plain,
            TableKind::SocketSsl => &self.socket_ssl,
        }
    }

    pub fn insert(&self, kind: TableKind, id: Uuid, info: SessionInfo) {
        self.table(kind).lock().expect("connection table lock poisoned").insert(id, info);
    }

    pub fn contains(&self, kind: TableKind, id: Uuid) -> bool {
        self.table(kind).lock().expect("connection table lock poisoned").contains_key(&id)
    }

    /// Moves `id` from its HTTP table to the matching SOCKET table, holding
    /// both tables' locks for the whole operation so no reader observes the
    /// session as absent from both.
    pub fn upgrade(&self, id: Uuid) -> Result<(), SmfError> {
        {
            let mut http = self.http_plain.lock().expect("connection table lock poisoned");
            if let Some(info) = http.remove(&id) {
                let mut socket = self.socket_plain.lock().expect("connection table lock poisoned");
                socket.insert(id, info);
                return Ok(());
            }
        }
        {
            let mut http = self.http_ssl.lock().expect("connection table lock poisoned");
            if let Some(info) = http.remove(&id) {
                let mut socket = self.socket_ssl.lock().expect("connection table lock poisoned");
                socket.insert(id, info);
                return Ok(());
            }
        }
        Err(SmfError::Channel(format!("no HTTP session {id} to upgrade")))
    }

    pub fn subscribe(&self, channel: impl Into<String>, id: Uuid) {
        self.listeners.lock().expect("listener lock poisoned").entry(channel.into()).or_default().insert(id);
    }

    pub fn listeners_of(&self, channel: &str) -> Vec<Uuid> {
        self.listeners.lock().expect("listener lock poisoned").get(channel).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    /// Removes `id` from every session table and every channel's listener
    /// set — the cleanup §4.11 requires on session stop.
    pub fn remove(&self, id: Uuid) {
        for kind in [TableKind::HttpPlain, TableKind::HttpSsl, TableKind::SocketPlain, TableKind::SocketSsl] {
            self.table(kind).lock().expect("connection table lock poisoned").remove(&id);
        }
        let mut listeners = self.listeners.lock().expect("listener lock poisoned");
        listeners.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_moves_plain_http_session_to_plain_socket_table() {
        let mgr = ConnectionManager::new();
        let id = Uuid::new_v4();
        mgr.insert(TableKind::HttpPlain, id, SessionInfo { peer: "1.2.3.4:1".into() });

        mgr.upgrade(id).expect("upgrade");

        assert!(!mgr.contains(TableKind::HttpPlain, id));
        assert!(mgr.contains(TableKind::SocketPlain, id));
    }

    #[test]
    fn upgrade_moves_ssl_http_session_to_ssl_socket_table() {
        let mgr = ConnectionManager::new();
        let id = Uuid::new_v4();
        mgr.insert(TableKind::HttpSsl, id, SessionInfo { peer: "1.2.3.4:2".into() });

        mgr.upgrade(id).expect("upgrade");

        assert!(!mgr.contains(TableKind::HttpSsl, id));
        assert!(mgr.contains(TableKind::SocketSsl, id));
    }

    #[test]
    fn upgrade_of_unknown_session_fails() {
        let mgr = ConnectionManager::new();
        assert!(mgr.upgrade(Uuid::new_v4()).is_err());
    }

    #[test]
    fn remove_purges_session_and_all_listener_entries() {
        let mgr = ConnectionManager::new();
        let id = Uuid::new_v4();
        mgr.insert(TableKind::SocketPlain, id, SessionInfo { peer: "x".into() });
        mgr.subscribe("meter-1/readouts", id);
        mgr.subscribe("meter-2/readouts", id);

        mgr.remove(id);

        assert!(!mgr.contains(TableKind::SocketPlain, id));
        assert!(mgr.listeners_of("meter-1/readouts").is_empty());
        assert!(mgr.listeners_of("meter-2/readouts").is_empty());
    }

    #[test]
    fn listeners_of_returns_all_subscribed_sessions() {
        let mgr = ConnectionManager::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        mgr.subscribe("chan", a);
        mgr.subscribe("chan", b);
        let mut ids = mgr.listeners_of("chan");
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
