// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The `on-start` broker variant (§4.8): connects once at startup and stays
//! connected, reconnecting on a timer after a loss. Writes that arrive while
//! not `Connected` are dropped with a warning rather than queued.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::common::{frame_with_login, BrokerState, StateCell};
use crate::cfg::config::BrokerConfig;
use crate::error::SmfError;

/// A broker that connects immediately and keeps reconnecting until
/// cancelled. Mirrors the teacher's `ClientConnection`: a `Mutex`-guarded
/// write half, a spawned read loop, and a `cancel` token for hard shutdown.
pub struct OnStartBroker {
    cfg: BrokerConfig,
    state: StateCell,
    writer: Mutex<Option<OwnedWriteHalf>>,
    login_sent: Mutex<bool>,
    cancel: CancellationToken,
}

impl OnStartBroker {
    pub fn new(cfg: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            state: StateCell::new(BrokerState::Offline),
            writer: Mutex::new(None),
            login_sent: Mutex::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> BrokerState {
        self.state.get()
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.state.set(BrokerState::Stopped);
    }

    /// Drives the connect/reconnect loop until stopped. Intended to be
    /// spawned once per configured broker.
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                self.state.set(BrokerState::Stopped);
                return;
            }
            self.state.set(BrokerState::Connecting);
            match self.connect_once().await {
                Ok(()) => {
                    debug!(broker = %self.cfg.name, "connection lost, will reconnect");
                },
                Err(e) => {
                    warn!(broker = %self.cfg.name, error = %e, "connect failed");
                },
            }
            self.state.set(BrokerState::Offline);
            *self.writer.lock().await = None;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state.set(BrokerState::Stopped);
                    return;
                }
                _ = sleep(self.cfg.reconnect_interval) => {}
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let stream = TcpStream::connect(self.cfg.address).await?;
        stream.set_nodelay(true)?;
        let (mut r, w) = stream.into_split();
        *self.writer.lock().await = Some(w);
        *self.login_sent.lock().await = false;
        self.state.set(BrokerState::Connected);

        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = r.read(&mut buf) => {
                    match read {
                        Ok(0) => return Ok(()),
                        Ok(_n) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    /// Writes `data` if currently connected; silently drops zero-length
    /// writes; drops (with a warning) any write that cannot be dispatched
    /// immediately because the broker is not `Connected`.
    pub async fn write(&self, data: &[u8]) -> Result<(), SmfError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.state.get() != BrokerState::Connected {
            warn!(broker = %self.cfg.name, "dropping write: broker not connected");
            return Ok(());
        }
        let mut guard = self.writer.lock().await;
        let Some(w) = guard.as_mut() else {
            warn!(broker = %self.cfg.name, "dropping write: no active socket");
            return Ok(());
        };
        let mut sent = self.login_sent.lock().await;
        let framed = frame_with_login(data, self.cfg.login_sequence.as_deref(), &mut sent);
        w.write_all(&framed).await.map_err(SmfError::Io)
    }
}
