// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The `on-demand` broker variant (§4.8): idle while `Offline`, queues
//! writes FIFO while `Connecting`, drains the queue once `Connected`, and
//! closes back down to `Offline` after `write-timeout` of inactivity.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broker::common::{frame_with_login, BrokerState, StateCell};
use crate::cfg::config::BrokerConfig;
use crate::error::SmfError;

/// A broker that connects lazily on first write and idle-closes after
/// `write_timeout` without further traffic. A single background task
/// consumes the write queue, which makes FIFO ordering automatic: it is
/// the only writer to the socket.
pub struct OnDemandBroker {
    cfg: BrokerConfig,
    state: StateCell,
    queue: mpsc::UnboundedSender<Vec<u8>>,
    cancel: CancellationToken,
}

impl OnDemandBroker {
    pub fn new(cfg: BrokerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Arc::new(Self { cfg, state: StateCell::new(BrokerState::Offline), queue: tx, cancel: CancellationToken::new() });
        tokio::spawn(broker.clone().drive(rx));
        broker
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

    /// Enqueues `data` for dispatch; silently drops zero-length writes.
    /// Never blocks: the background task owns connection lifecycle.
    pub fn write(&self, data: &[u8]) -> Result<(), SmfError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.state.get() == BrokerState::Stopped {
            return Ok(());
        }
        let _ = self.queue.send(data.to_vec());
        Ok(())
    }

    async fn drive(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        loop {
            let first = tokio::select! {
                _ = self.cancel.cancelled() => return,
                item = rx.recv() => match item {
                    Some(item) => item,
                    None => return,
                },
            };

            self.state.set(BrokerState::Connecting);
            let mut pending = vec![first];
            while let Ok(more) = rx.try_recv() {
                pending.push(more);
            }

            let stream = match TcpStream::connect(self.cfg.address).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(broker = %self.cfg.name, error = %e, "connect failed, dropping queued writes");
                    self.state.set(BrokerState::Offline);
                    continue;
                },
            };
            let _ = stream.set_nodelay(true);
            let mut sock = stream;
            self.state.set(BrokerState::Connected);
            let mut login_sent = false;

            for item in pending {
                let framed = frame_with_login(&item, self.cfg.login_sequence.as_deref(), &mut login_sent);
                if let Err(e) = sock.write_all(&framed).await {
                    warn!(broker = %self.cfg.name, error = %e, "write failed");
                    break;
                }
            }

            'connected: loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.state.set(BrokerState::Stopped);
                        return;
                    }
                    item = rx.recv() => {
                        match item {
                            Some(item) => {
                                let framed = frame_with_login(&item, self.cfg.login_sequence.as_deref(), &mut login_sent);
                                if let Err(e) = sock.write_all(&framed).await {
                                    warn!(broker = %self.cfg.name, error = %e, "write failed");
                                    break 'connected;
                                }
                            },
                            None => return,
                        }
                    }
                    _ = tokio::time::sleep(self.cfg.write_timeout) => {
                        debug!(broker = %self.cfg.name, "idle timeout, closing");
                        break 'connected;
                    }
                }
            }
            self.state.set(BrokerState::Offline);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::cfg::enums::BrokerKind;

    fn cfg(address: std::net::SocketAddr, write_timeout: Duration) -> BrokerConfig {
        BrokerConfig { name: "od".into(), kind: BrokerKind::OnDemand, address, login_sequence: None, write_timeout, reconnect_interval: Duration::from_secs(30) }
    }

    #[tokio::test]
    async fn zero_length_write_is_a_silent_no_op() {
        let addr: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
        let broker = OnDemandBroker::new(cfg(addr, Duration::from_millis(50)));
        assert!(broker.write(&[]).is_ok());
        assert_eq!(broker.state(), BrokerState::Offline);
    }

    #[tokio::test]
    async fn queued_writes_drain_fifo_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = OnDemandBroker::new(cfg(addr, Duration::from_secs(5)));

        broker.write(b"one").unwrap();
        broker.write(b"two").unwrap();
        broker.write(b"three").unwrap();

        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 32];
        let mut collected = Vec::new();
        while collected.len() < b"onetwothree".len() {
            let n = sock.read(&mut buf).await.unwrap();
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"onetwothree");
    }

    #[tokio::test]
    async fn idle_timeout_closes_connection_back_to_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = OnDemandBroker::new(cfg(addr, Duration::from_millis(30)));

        broker.write(b"ping").unwrap();
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 8];
        let n = sock.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        for _ in 0..50 {
            if broker.state() == BrokerState::Offline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(broker.state(), BrokerState::Offline);
    }
}
