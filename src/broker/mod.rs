// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C9 — the broker pool (§4.8): one TCP client per configured broker,
//! either `on-start` (persistent, reconnecting) or `on-demand` (lazy,
//! idle-closing).

pub mod common;
pub mod on_demand;
pub mod on_start;

use std::collections::HashMap;
use std::sync::Arc;

use crate::cfg::config::BrokerConfig;
use crate::cfg::enums::BrokerKind;
use crate::error::SmfError;

pub use common::BrokerState;
pub use on_demand::OnDemandBroker;
pub use on_start::OnStartBroker;

/// Either broker variant, addressed uniformly by the rest of the gateway.
pub enum Broker {
    OnStart(Arc<OnStartBroker>),
    OnDemand(Arc<OnDemandBroker>),
}

impl Broker {
    pub fn new(cfg: BrokerConfig) -> Self {
        match cfg.kind {
            BrokerKind::OnStart => {
                let broker = OnStartBroker::new(cfg);
                tokio::spawn(broker.clone().run());
                Broker::OnStart(broker)
            },
            BrokerKind::OnDemand => Broker::OnDemand(OnDemandBroker::new(cfg)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Broker::OnStart(b) => b.name(),
            Broker::OnDemand(b) => b.name(),
        }
    }

    pub fn state(&self) -> BrokerState {
        match self {
            Broker::OnStart(b) => b.state(),
            Broker::OnDemand(b) => b.state(),
        }
    }

    pub fn stop(&self) {
        match self {
            Broker::OnStart(b) => b.stop(),
            Broker::OnDemand(b) => b.stop(),
        }
    }

    /// Dispatches a write through whichever variant this broker is. The
    /// `on-start` path awaits the socket write; the `on-demand` path only
    /// enqueues, so both return promptly for a caller that doesn't want to
    /// block on broker I/O.
    pub async fn write(&self, data: &[u8]) -> Result<(), SmfError> {
        match self {
            Broker::OnStart(b) => b.write(data).await,
            Broker::OnDemand(b) => b.write(data),
        }
    }
}

/// Named collection of brokers a gateway process feeds readouts to.
#[derive(Default)]
pub struct BrokerPool {
    brokers: HashMap<String, Broker>,
}

impl BrokerPool {
    pub fn new(configs: impl IntoIterator<Item = BrokerConfig>) -> Self {
        let brokers = configs.into_iter().map(|cfg| (cfg.name.clone(), Broker::new(cfg))).collect();
        Self { brokers }
    }

    pub fn get(&self, name: &str) -> Option<&Broker> {
        self.brokers.get(name)
    }

    pub fn stop_all(&self) {
        for broker in self.brokers.values() {
            broker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cfg::enums::BrokerKind;

    #[tokio::test]
    async fn pool_looks_up_brokers_by_name() {
        let cfg = BrokerConfig {
            name: "primary".into(),
            kind: BrokerKind::OnDemand,
            address: "127.0.0.1:1".parse().unwrap(),
            login_sequence: None,
            write_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(30),
        };
        let pool = BrokerPool::new(vec![cfg]);
        assert!(pool.get("primary").is_some());
        assert!(pool.get("missing").is_none());
    }
}
