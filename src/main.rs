// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use smf_core::broker::BrokerPool;
use smf_core::cache::ReadoutCache;
use smf_core::cfg::cli::resolve_config_path;
use smf_core::cfg::config::Config;
use smf_core::cfg::logger::init_logger;
use smf_core::cluster::ClusterSession;
use smf_core::push::PushScheduler;
use smf_core::scramble::ScrambleKey;
use smf_core::storage::{MemoryStorage, ProfileStorage};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "segw.yaml".to_string());
    let cfg = resolve_config_path(&config_path).and_then(Config::load_from_file).context("failed to resolve or load config")?;

    let _logger_guard = init_logger(&cfg.logging)?;
    info!(master = %cfg.ipt.master_address, "starting segment gateway");

    let cache = Arc::new(ReadoutCache::new());
    let storage: Arc<dyn ProfileStorage> = Arc::new(MemoryStorage::new());
    let brokers = Arc::new(BrokerPool::new(cfg.brokers.clone()));

    // Gateway login to the master uses the same key for both stream
    // directions at connect time; the first `ctrl.req.login.scrambled`
    // frame rekeys both sides, as described in `ipt::session`.
    let key = ScrambleKey::new([0u8; smf_core::scramble::SCRAMBLE_KEY_LEN]);
    let cluster = ClusterSession::connect(cfg.ipt.master_address, key).await.context("failed to connect to cluster master")?;
    let (success, _name, msg, _query, _bag) = cluster
        .login(&cfg.ipt.account_name, &cfg.ipt.account_pwd, if cfg.ipt.scrambled { "scrambled" } else { "public" }, Vec::new())
        .await
        .context("cluster login failed")?;
    if !success {
        anyhow::bail!("cluster login rejected: {}", msg.unwrap_or_default());
    }
    info!("cluster login accepted");

    // The cluster uplink itself is available as a push destination for any
    // binding whose `Target` is `smf_core::push::CLUSTER_PUSH_TARGET`.
    let scheduler = PushScheduler::with_cluster(storage, brokers.clone(), cluster.clone());
    // Each binding resolves its server id from `cache` fresh on every grid
    // tick (§4.6/§4.9), so a meter that hasn't reported a readout yet at
    // startup starts pushing as soon as one arrives instead of being
    // skipped for the life of the process.
    scheduler.spawn_all(cfg.push.clone(), cache);

    tokio::signal::ctrl_c().await.context("failed to wait for shutdown signal")?;
    info!("shutdown requested");
    brokers.stop_all();
    cluster.stop();
    Ok(())
}
