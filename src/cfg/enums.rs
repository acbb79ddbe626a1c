// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Boolean enumeration with string serialization support.
///
/// Mirrors the handful of spellings configuration authors tend to use for
/// switches in the push-target / broker tables ("Yes"/"No", "true"/"false",
/// "1"/"0").
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    #[serde(
        rename = "Yes",
        alias = "yes",
        alias = "YES",
        alias = "true",
        alias = "True",
        alias = "1"
    )]
    Yes,
    #[serde(
        rename = "No",
        alias = "no",
        alias = "NO",
        alias = "false",
        alias = "False",
        alias = "0"
    )]
    No,
}
impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        })
    }
}
impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}
impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

/// Broker connection strategy (§4.8).
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    #[serde(rename = "on-start", alias = "OnStart", alias = "ON_START")]
    OnStart,
    #[serde(rename = "on-demand", alias = "OnDemand", alias = "ON_DEMAND")]
    OnDemand,
}
impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrokerKind::OnStart => "on-start",
            BrokerKind::OnDemand => "on-demand",
        })
    }
}

/// Serial-line mode used on the LMN (local metrological network) side.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialMode {
    /// Wired M-Bus, 2400 baud 8E1.
    #[serde(rename = "wired-mbus")]
    WiredMBus,
    /// IEC 62056-21, 9600 8N1 or 7E2.
    #[serde(rename = "iec-62056-21")]
    Iec6205621,
    /// Wireless M-Bus over an HCI-wrapped radio adapter (iM871A-class).
    #[serde(rename = "wireless-mbus")]
    WirelessMBus,
}
