// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The long-lived cluster uplink (§4.10): one IPT connection to the
//! master, carrying `client_req`/`client_res` envelopes. Dispatch is a
//! `sequence -> continuation` map, exactly as the design specifies: each
//! outgoing request registers a continuation under its sequence number,
//! and the read loop resolves it on the first response that echoes that
//! sequence.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cluster::envelope::{ClusterVerb, Envelope};
use crate::ipt::codes::CLUSTER_REQ_ENVELOPE;
use crate::ipt::session::IptSession;
use crate::scramble::ScrambleKey;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ClusterSession {
    writer: Mutex<OwnedWriteHalf>,
    ipt: Mutex<IptSession>,
    pending: DashMap<u64, oneshot::Sender<ClusterVerb>>,
    seq: AtomicU64,
    cancel: CancellationToken,
}

impl ClusterSession {
    /// Connects to the cluster master and spawns the read loop that
    /// dispatches responses to their registered continuations.
    pub async fn connect(address: SocketAddr, key: ScrambleKey) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (r, w) = stream.into_split();
        let session = Arc::new(ClusterSession {
            writer: Mutex::new(w),
            ipt: Mutex::new(IptSession::new(key)),
            pending: DashMap::new(),
            seq: AtomicU64::new(1),
            cancel: CancellationToken::new(),
        });
        let reader = Arc::clone(&session);
        tokio::spawn(async move { reader.read_loop(r).await });
        Ok(session)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn read_loop(self: Arc<Self>, mut r: tokio::net::tcp::OwnedReadHalf) {
        let mut buf = [0u8; 4096];
        loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return,
                read = r.read(&mut buf) => match read {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(error = %e, "cluster session read error");
                        return;
                    }
                }
            };
            let frames = {
                let mut ipt = self.ipt.lock().await;
                match ipt.receive(&buf[..n]) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(error = %e, "cluster session framing error");
                        continue;
                    },
                }
            };
            for frame in frames {
                if frame.header.cmd != CLUSTER_REQ_ENVELOPE {
                    continue;
                }
                match Envelope::decode(&frame.payload) {
                    Ok((env, _)) => self.dispatch(env),
                    Err(e) => warn!(error = %e, "malformed cluster envelope"),
                }
            }
        }
    }

    fn dispatch(&self, env: Envelope) {
        if let Some((_, sender)) = self.pending.remove(&env.sequence) {
            let _ = sender.send(env.verb);
        } else {
            warn!(sequence = env.sequence, "cluster envelope with no matching request");
        }
    }

    async fn send_envelope(&self, sequence: u64, verb: ClusterVerb) -> Result<()> {
        let env = Envelope::new(sequence, verb);
        let payload = env.encode();
        let wire = {
            let mut ipt = self.ipt.lock().await;
            ipt.send(CLUSTER_REQ_ENVELOPE, &payload)
        };
        self.writer.lock().await.write_all(&wire).await?;
        Ok(())
    }

    /// Sends `verb` as a request and awaits the response carrying the same
    /// sequence, per §4.10's lookup-and-remove dispatch. Bounded by
    /// `request_timeout`.
    async fn request(&self, verb: ClusterVerb, request_timeout: Duration) -> Result<ClusterVerb> {
        let sequence = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(sequence, tx);
        if let Err(e) = self.send_envelope(sequence, verb).await {
            self.pending.remove(&sequence);
            return Err(e);
        }
        match timeout(request_timeout, rx).await {
            Ok(Ok(verb)) => Ok(verb),
            Ok(Err(_)) => Err(anyhow!("cluster session closed while awaiting response")),
            Err(_) => {
                self.pending.remove(&sequence);
                Err(anyhow!("cluster request timed out after {request_timeout:?}"))
            },
        }
    }

    pub async fn login(&self, name: &str, pwd: &str, scheme: &str, bag: Vec<u8>) -> Result<(bool, String, Option<String>, bool, Vec<u8>)> {
        match self.request(ClusterVerb::ReqLogin { name: name.into(), pwd: pwd.into(), scheme: scheme.into(), bag }, DEFAULT_REQUEST_TIMEOUT).await? {
            ClusterVerb::ResLogin { success, name, msg, query, bag } => Ok((success, name, msg, query, bag)),
            other => Err(anyhow!("unexpected reply to login: {other:?}")),
        }
    }

    pub async fn open_push_channel(&self, target: &str, device: &str, number: &str, version: &str, id: &str, timeout_secs: u32, bag: Vec<u8>) -> Result<(u32, u32, u32, Vec<u8>, Vec<u8>)> {
        let verb = ClusterVerb::ReqOpenPushChannel { target: target.into(), device: device.into(), number: number.into(), version: version.into(), id: id.into(), timeout_secs, bag };
        match self.request(verb, Duration::from_secs(30)).await? {
            ClusterVerb::ResOpenPushChannel { channel, source, count, options, bag } => Ok((channel, source, count, options, bag)),
            other => Err(anyhow!("unexpected reply to open.push.channel: {other:?}")),
        }
    }

    pub async fn transfer_pushdata(&self, channel: u32, source: u32, data: Vec<u8>, bag: Vec<u8>) -> Result<()> {
        match self.request(ClusterVerb::ReqTransferPushdata { channel, source, data, bag }, DEFAULT_REQUEST_TIMEOUT).await? {
            ClusterVerb::ResTransferPushdata { .. } => Ok(()),
            other => Err(anyhow!("unexpected reply to transfer.pushdata: {other:?}")),
        }
    }

    pub async fn close_push_channel(&self, channel: u32, bag: Vec<u8>) -> Result<()> {
        match self.request(ClusterVerb::ReqClosePushChannel { channel, bag }, DEFAULT_REQUEST_TIMEOUT).await? {
            ClusterVerb::ResClosePushChannel { .. } => Ok(()),
            other => Err(anyhow!("unexpected reply to close.push.channel: {other:?}")),
        }
    }

    /// Fire-and-forget operational logging; no response is expected so no
    /// continuation is registered.
    pub async fn bus_insert_msg(&self, severity: u8, text: &str) -> Result<()> {
        self.send_envelope(0, ClusterVerb::BusInsertMsg { severity, text: text.into() }).await
    }
}
