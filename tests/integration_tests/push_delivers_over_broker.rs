// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Exercises the same pipeline the push-job scheduler drives at runtime
//! (obis scaling -> SML encoding -> broker write) end to end over a real
//! loopback socket, without waiting on the scheduler's own grid timer.

use std::time::Duration;

use smf_core::broker::BrokerPool;
use smf_core::cfg::config::BrokerConfig;
use smf_core::cfg::enums::BrokerKind;
use smf_core::obis::{scale_reverse, well_known};
use smf_core::sml::generator::get_profile_list_response;
use smf_core::sml::message::{Message, PeriodEntry};

use crate::integration_tests::common;

#[tokio::test]
async fn a_pushed_profile_row_arrives_at_the_broker_peer_as_a_valid_sml_message() {
    let (addr, received) = common::spawn_single_shot_peer(4096).await;

    let brokers = BrokerPool::new(vec![BrokerConfig {
        name: "primary".into(),
        kind: BrokerKind::OnDemand,
        address: addr,
        login_sequence: None,
        write_timeout: Duration::from_secs(5),
        reconnect_interval: Duration::from_secs(30),
    }]);

    let raw = scale_reverse("14.5", -1).expect("scale_reverse");
    let entries = vec![PeriodEntry { obis: well_known::ACTIVE_ENERGY_IMPORT, raw, scaler: -1 }];
    let msg = get_profile_list_response("push-1", vec![0x05, 0x00, 0x15, 0x3B], well_known::ACTIVE_ENERGY_IMPORT, 900, entries);
    let encoded = msg.encode();

    let broker = brokers.get("primary").expect("broker registered");
    broker.write(&encoded).await.expect("write to broker");

    let bytes = tokio::time::timeout(Duration::from_secs(2), received).await.expect("peer received data in time").expect("peer task did not panic");

    let (decoded, consumed) = Message::decode(&bytes).expect("peer received a valid sml message");
    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded, msg);

    brokers.stop_all();
}
