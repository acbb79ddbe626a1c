// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, net::SocketAddr, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::enums::{BrokerKind, SerialMode, YesNo},
    obis::Profile,
};

/// Root configuration for a segment-gateway process.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// IPT uplink parameters (§4.2, §4.10).
    pub ipt: IptConfig,
    /// SML codec parameters (§4.3).
    pub sml: SmlConfig,
    /// LMN / M-Bus parameters (§4.5, §6).
    pub mbus: MbusConfig,
    /// Profile-storage backend selection (§4.7).
    pub storage: StorageConfig,
    /// One entry per broker this gateway feeds (§4.8).
    #[serde(default)]
    pub brokers: Vec<BrokerConfig>,
    /// One entry per push target binding (§4.9).
    #[serde(default)]
    pub push: Vec<PushTargetConfig>,
    /// Logging configuration.
    pub logging: LogConfig,
}

/// IPT master connection and login parameters.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IptConfig {
    #[serde(rename = "MasterAddress")]
    pub master_address: SocketAddr,
    #[serde(rename = "AccountName")]
    pub account_name: String,
    #[serde(rename = "AccountPwd")]
    pub account_pwd: String,
    #[serde(rename = "Scrambled", default = "default_true")]
    pub scrambled: bool,
    #[serde(rename = "LoginTimeout", with = "serde_secs", default = "default_login_timeout")]
    pub login_timeout: Duration,
    #[serde(rename = "WatchdogInterval", with = "serde_secs", default = "default_watchdog")]
    pub watchdog_interval: Duration,
}

fn default_true() -> bool {
    true
}
fn default_login_timeout() -> Duration {
    Duration::from_secs(12)
}
fn default_watchdog() -> Duration {
    Duration::from_secs(23)
}

/// SML generator/tokenizer parameters.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SmlConfig {
    #[serde(rename = "TrxPrefix", default = "default_trx_prefix")]
    pub trx_prefix: String,
    #[serde(rename = "PushChannelTimeout", with = "serde_secs", default = "default_push_timeout")]
    pub push_channel_timeout: Duration,
}

fn default_trx_prefix() -> String {
    "smf".to_string()
}
fn default_push_timeout() -> Duration {
    Duration::from_secs(30)
}

/// LMN-side parameters: serial mode and the per-meter AES key table path.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MbusConfig {
    #[serde(rename = "Mode")]
    pub mode: SerialMode,
    #[serde(rename = "AesKeyTable", default)]
    pub aes_key_table: HashMap<String, String>,
    #[serde(rename = "MaxReadoutFrequency", with = "serde_secs", default = "default_max_readout_freq")]
    pub max_readout_frequency: Duration,
}

fn default_max_readout_freq() -> Duration {
    Duration::from_secs(1)
}

/// Storage backend selector. Only the in-memory reference implementation is
/// provided by this crate; a SQLite-backed implementation is out of scope
/// (§1 non-goals).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(rename = "Backend", default = "default_backend")]
    pub backend: String,
}

fn default_backend() -> String {
    "memory".to_string()
}

/// One TCP broker target (§4.8).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BrokerConfig {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Kind")]
    pub kind: BrokerKind,
    #[serde(rename = "Address")]
    pub address: SocketAddr,
    #[serde(rename = "Login", default)]
    pub login_sequence: Option<Vec<u8>>,
    #[serde(rename = "WriteTimeout", with = "serde_secs", default = "default_write_timeout")]
    pub write_timeout: Duration,
    #[serde(rename = "ReconnectInterval", with = "serde_secs", default = "default_reconnect")]
    pub reconnect_interval: Duration,
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(2)
}
fn default_reconnect() -> Duration {
    Duration::from_secs(30)
}

/// A `push-op` row (§4.9, §6 persisted state layout).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PushTargetConfig {
    #[serde(rename = "Meter")]
    pub meter: String,
    #[serde(rename = "Nr")]
    pub nr: u8,
    #[serde(rename = "Profile")]
    pub profile: Profile,
    #[serde(rename = "Delay", with = "serde_secs", default)]
    pub delay: Duration,
    #[serde(rename = "Target")]
    pub target: String,
    #[serde(rename = "Enabled", default = "default_enabled")]
    pub enabled: YesNo,
}

fn default_enabled() -> YesNo {
    YesNo::Yes
}

/// Logging configuration (mirrors the teacher's `LogConfig` shape).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(rename = "Level", default = "default_level")]
    pub level: String,
    #[serde(rename = "Output", default)]
    pub output: LogOutput,
    #[serde(rename = "File", default)]
    pub file: Option<String>,
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.ipt.account_name.is_empty(),
            "ipt.AccountName must not be empty"
        );
        for broker in &self.brokers {
            ensure!(
                broker.write_timeout > Duration::ZERO,
                "broker {} WriteTimeout must be > 0",
                broker.name
            );
        }
        for push in &self.push {
            ensure!(
                !push.target.is_empty(),
                "push entry for meter {} has an empty target",
                push.meter
            );
        }
        if self.storage.backend.is_empty() {
            self.storage.backend = default_backend();
        }
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
ipt:
  MasterAddress: "127.0.0.1:26862"
  AccountName: "gw01"
  AccountPwd: "secret"
sml:
  TrxPrefix: "abc"
mbus:
  Mode: "wireless-mbus"
storage:
  Backend: "memory"
logging:
  Level: "debug"
"#;
        let mut cfg: Config = serde_yaml::from_str(yaml).expect("parse");
        cfg.validate_and_normalize().expect("validate");
        assert_eq!(cfg.ipt.account_name, "gw01");
        assert_eq!(cfg.ipt.login_timeout, Duration::from_secs(12));
        assert_eq!(cfg.storage.backend, "memory");
    }
}
