// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C10 — the push-job scheduler (§4.9): one task per configured
//! meter/profile/target binding, firing on the profile's own grid and
//! advancing a low-water-mark only once the push actually succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::broker::BrokerPool;
use crate::cache::ReadoutCache;
use crate::cfg::config::PushTargetConfig;
use crate::cluster::ClusterSession;
use crate::obis;
use crate::sml::generator::{self, TrxGenerator};
use crate::sml::message::PeriodEntry;
use crate::storage::{OpLogEntry, ProfileStorage};

/// `(meter, push-op number)` identifies one scheduled binding.
type WatermarkKey = (String, u8);

/// A `push.Target` naming this sentinel routes through the cluster
/// session's open/transfer/close push-channel exchange (§4.9 steps 3/7)
/// rather than through the named broker pool.
pub const CLUSTER_PUSH_TARGET: &str = "cluster";

const CLUSTER_PUSH_CHANNEL_TIMEOUT_SECS: u32 = 30;

/// Drives every configured push-op. Each binding gets its own spawned task;
/// the scheduler only owns the shared storage/broker handles and the
/// per-binding low-water-marks.
pub struct PushScheduler {
    storage: Arc<dyn ProfileStorage>,
    brokers: Arc<BrokerPool>,
    cluster: Option<Arc<ClusterSession>>,
    watermarks: DashMap<WatermarkKey, i64>,
    trx: TrxGenerator,
}

impl PushScheduler {
    pub fn new(storage: Arc<dyn ProfileStorage>, brokers: Arc<BrokerPool>) -> Arc<Self> {
        Arc::new(Self { storage, brokers, cluster: None, watermarks: DashMap::new(), trx: TrxGenerator::new("push") })
    }

    /// Like [`Self::new`], but also makes the cluster uplink itself
    /// available as a push destination for bindings whose `Target` is
    /// [`CLUSTER_PUSH_TARGET`].
    pub fn with_cluster(storage: Arc<dyn ProfileStorage>, brokers: Arc<BrokerPool>, cluster: Arc<ClusterSession>) -> Arc<Self> {
        Arc::new(Self { storage, brokers, cluster: Some(cluster), watermarks: DashMap::new(), trx: TrxGenerator::new("push") })
    }

    /// Spawns one task per enabled binding. Each task resolves its
    /// binding's server id from `cache` fresh on every grid tick rather
    /// than once at startup, so a push target whose meter hasn't reported
    /// a readout yet starts pushing as soon as one arrives instead of
    /// being skipped for the life of the process.
    pub fn spawn_all(self: &Arc<Self>, targets: Vec<PushTargetConfig>, cache: Arc<ReadoutCache>) {
        for target in targets {
            if !target.enabled.as_bool() {
                continue;
            }
            let scheduler = Arc::clone(self);
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { scheduler.run_binding(target, cache).await });
        }
    }

    async fn run_binding(self: Arc<Self>, target: PushTargetConfig, cache: Arc<ReadoutCache>) {
        let key: WatermarkKey = (target.meter.clone(), target.nr);
        loop {
            let now = Utc::now();
            let fire_at = target.profile.next(now) + chrono::Duration::from_std(target.delay).unwrap_or_default();
            let sleep_for = (fire_at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(sleep_for).await;

            let Some(server_id) = cache.server_id_for(&target.meter) else {
                debug!(meter = %target.meter, "no server id known for push target yet, waiting for a readout");
                continue;
            };

            let high = target.profile.index_from_ts(Utc::now());
            let low = *self.watermarks.entry(key.clone()).or_insert(high - 1);
            if high <= low {
                continue;
            }

            match self.push_window(&target, &server_id, low + 1, high).await {
                Ok(()) => {
                    self.watermarks.insert(key.clone(), high);
                },
                Err(e) => {
                    warn!(meter = %target.meter, nr = target.nr, error = %e, "push failed, low-water-mark not advanced");
                    self.storage.generate_op_log(push_failed_op_log(&target, &e));
                },
            }
        }
    }

    async fn push_window(&self, target: &PushTargetConfig, server_id: &[u8], from_idx: i64, to_idx: i64) -> anyhow::Result<()> {
        let rows = self.storage.select_window(&target.meter, target.profile, from_idx, to_idx);
        if rows.is_empty() {
            debug!(meter = %target.meter, nr = target.nr, "no rows in window, nothing to push");
            return Ok(());
        }

        let mut by_index: HashMap<i64, Vec<PeriodEntry>> = HashMap::new();
        for row in rows {
            let raw = obis::scale_reverse(&row.value, row.scaler).map_err(|e| anyhow::anyhow!("{e}"))?;
            by_index.entry(row.ts_index).or_default().push(PeriodEntry { obis: row.obis, raw, scaler: row.scaler });
        }

        let mut indices: Vec<i64> = by_index.keys().copied().collect();
        indices.sort_unstable();

        if target.target == CLUSTER_PUSH_TARGET {
            self.push_window_via_cluster(target, server_id, by_index, indices).await
        } else {
            self.push_window_via_broker(target, server_id, by_index, indices).await
        }
    }

    async fn push_window_via_broker(&self, target: &PushTargetConfig, server_id: &[u8], mut by_index: HashMap<i64, Vec<PeriodEntry>>, indices: Vec<i64>) -> anyhow::Result<()> {
        let broker = self.brokers.get(&target.target).ok_or_else(|| anyhow::anyhow!("push target broker {} not found", target.target))?;
        for idx in indices {
            let entries = by_index.remove(&idx).unwrap_or_default();
            let act_time = target.profile.ts_from_index(idx).timestamp().max(0) as u64;
            let msg = generator::get_profile_list_response(self.trx.next_trx(), server_id.to_vec(), target.profile.code(), act_time, entries);
            broker.write(&msg.encode()).await?;
        }
        Ok(())
    }

    /// Routes the window through the cluster session's push-channel verbs
    /// instead of a named broker: open once, transfer one message per
    /// ts-index group, close once (§4.9 steps 3/7 as literally specified).
    async fn push_window_via_cluster(&self, target: &PushTargetConfig, server_id: &[u8], mut by_index: HashMap<i64, Vec<PeriodEntry>>, indices: Vec<i64>) -> anyhow::Result<()> {
        let cluster = self.cluster.as_ref().ok_or_else(|| anyhow::anyhow!("push target {CLUSTER_PUSH_TARGET} configured but no cluster session is attached"))?;
        let (channel, source, _count, _options, _bag) =
            cluster.open_push_channel(&target.meter, "segw", &target.meter, env!("CARGO_PKG_VERSION"), &target.meter, CLUSTER_PUSH_CHANNEL_TIMEOUT_SECS, Vec::new()).await?;

        let mut result = Ok(());
        for idx in indices {
            let entries = by_index.remove(&idx).unwrap_or_default();
            let act_time = target.profile.ts_from_index(idx).timestamp().max(0) as u64;
            let msg = generator::get_profile_list_response(self.trx.next_trx(), server_id.to_vec(), target.profile.code(), act_time, entries);
            if let Err(e) = cluster.transfer_pushdata(channel, source, msg.encode(), Vec::new()).await {
                result = Err(e);
                break;
            }
        }
        cluster.close_push_channel(channel, Vec::new()).await?;
        result
    }
}

/// `LOG_CODE_16` — "push operation not successful" (§4.9 step-3 failure).
fn push_failed_op_log(target: &PushTargetConfig, error: &anyhow::Error) -> OpLogEntry {
    OpLogEntry {
        status: "error".into(),
        code: "LOG_CODE_16".into(),
        peer: target.target.clone(),
        server: target.meter.clone(),
        target: target.target.clone(),
        nr: target.nr,
        message: format!("push operation not successful: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::cfg::enums::YesNo;
    use crate::cluster::{ClusterVerb, Envelope};
    use crate::ipt::codes::CLUSTER_REQ_ENVELOPE;
    use crate::ipt::session::IptSession;
    use crate::obis::{well_known, Profile};
    use crate::scramble::{ScrambleKey, SCRAMBLE_KEY_LEN};
    use crate::storage::MemoryStorage;

    use super::*;

    fn target() -> PushTargetConfig {
        PushTargetConfig { meter: "meter-1".into(), nr: 1, profile: Profile::FifteenMinutes, delay: Duration::from_secs(0), target: "primary".into(), enabled: YesNo::Yes }
    }

    #[tokio::test]
    async fn push_window_groups_rows_by_ts_index_and_skips_empty_windows() {
        let storage = Arc::new(MemoryStorage::new());
        let brokers = Arc::new(BrokerPool::new(Vec::new()));
        let scheduler_inner = PushScheduler { storage: storage.clone(), brokers, cluster: None, watermarks: DashMap::new(), trx: TrxGenerator::new("push") };

        let t = target();
        // No rows yet: should be a no-op, not an error.
        assert!(scheduler_inner.push_window(&t, &[0x01], 0, 10).await.is_ok());

        storage.insert("meter-1", Profile::FifteenMinutes, 5, well_known::ACTIVE_ENERGY_IMPORT, "12.3".into(), -1, "Wh".into(), 0).unwrap();
        // No broker named "primary" registered: push must fail without panicking.
        assert!(scheduler_inner.push_window(&t, &[0x01], 0, 10).await.is_err());
    }

    #[tokio::test]
    async fn failed_push_window_produces_a_log_code_16_op_log_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let brokers = Arc::new(BrokerPool::new(Vec::new()));
        let scheduler_inner = PushScheduler { storage: storage.clone(), brokers, cluster: None, watermarks: DashMap::new(), trx: TrxGenerator::new("push") };

        let t = target();
        storage.insert("meter-1", Profile::FifteenMinutes, 5, well_known::ACTIVE_ENERGY_IMPORT, "12.3".into(), -1, "Wh".into(), 0).unwrap();
        let err = scheduler_inner.push_window(&t, &[0x01], 0, 10).await.expect_err("no broker named primary");
        storage.generate_op_log(push_failed_op_log(&t, &err));

        let log = storage.op_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].code, "LOG_CODE_16");
        assert_eq!(log[0].server, "meter-1");
    }

    #[tokio::test]
    async fn push_window_routes_through_the_cluster_session_when_target_is_cluster() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let key = ScrambleKey::new([0x11; SCRAMBLE_KEY_LEN]);

        let master = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.expect("accept");
            let mut server_ipt = IptSession::new(key);
            let mut transferred = 0usize;
            let mut buf = [0u8; 4096];
            loop {
                let n = sock.read(&mut buf).await.expect("read");
                let frames = server_ipt.receive(&buf[..n]).expect("receive");
                for frame in frames {
                    if frame.header.cmd != CLUSTER_REQ_ENVELOPE {
                        continue;
                    }
                    let (env, _) = Envelope::decode(&frame.payload).expect("decode envelope");
                    let reply = match env.verb {
                        ClusterVerb::ReqOpenPushChannel { .. } => ClusterVerb::ResOpenPushChannel { channel: 7, source: 42, count: 0, options: vec![], bag: vec![] },
                        ClusterVerb::ReqTransferPushdata { .. } => {
                            transferred += 1;
                            ClusterVerb::ResTransferPushdata { channel: 7, source: 42, bag: vec![] }
                        },
                        ClusterVerb::ReqClosePushChannel { .. } => {
                            let payload = Envelope::new(env.sequence, ClusterVerb::ResClosePushChannel { channel: 7, bag: vec![] }).encode();
                            let wire = server_ipt.send(CLUSTER_REQ_ENVELOPE, &payload);
                            sock.write_all(&wire).await.expect("write");
                            return transferred;
                        },
                        other => panic!("unexpected verb from push scheduler: {other:?}"),
                    };
                    let payload = Envelope::new(env.sequence, reply).encode();
                    let wire = server_ipt.send(CLUSTER_REQ_ENVELOPE, &payload);
                    sock.write_all(&wire).await.expect("write");
                }
            }
        });

        let cluster = crate::cluster::ClusterSession::connect(addr, key).await.expect("connect");
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("meter-1", Profile::FifteenMinutes, 5, well_known::ACTIVE_ENERGY_IMPORT, "12.3".into(), -1, "Wh".into(), 0).unwrap();
        let brokers = Arc::new(BrokerPool::new(Vec::new()));
        let scheduler = PushScheduler { storage: storage.clone(), brokers, cluster: Some(cluster.clone()), watermarks: DashMap::new(), trx: TrxGenerator::new("push") };

        let t = PushTargetConfig { meter: "meter-1".into(), nr: 1, profile: Profile::FifteenMinutes, delay: Duration::from_secs(0), target: CLUSTER_PUSH_TARGET.into(), enabled: YesNo::Yes };
        scheduler.push_window(&t, &[0x01], 0, 10).await.expect("push via cluster session");

        cluster.stop();
        let transferred = master.await.expect("master task");
        assert_eq!(transferred, 1, "exactly one ts-index group in the window");
    }
}
