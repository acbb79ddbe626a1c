// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use smf_core::obis::well_known;
use smf_core::sml::generator::{get_profile_list_request, get_profile_list_response, open_request, TrxGenerator};
use smf_core::sml::message::{Message, PeriodEntry};

#[test]
fn open_request_survives_encode_decode() {
    let trx = TrxGenerator::new("test");
    let msg = open_request(vec![0x01, 0x02], vec![0x05, 0x00, 0x15], b"user".to_vec(), b"pass".to_vec(), &trx);

    let encoded = msg.encode();
    let (decoded, consumed) = Message::decode(&encoded).expect("decode");

    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded, msg);
}

#[test]
fn profile_list_request_and_response_share_the_same_profile_code() {
    let trx = TrxGenerator::new("test");
    let server_id = vec![0x05, 0x00, 0x15, 0x3B];

    let request = get_profile_list_request(&trx, server_id.clone(), well_known::ACTIVE_ENERGY_IMPORT, 0, 900);
    let response = get_profile_list_response(
        trx.next_trx(),
        server_id,
        well_known::ACTIVE_ENERGY_IMPORT,
        900,
        vec![PeriodEntry { obis: well_known::ACTIVE_ENERGY_IMPORT, raw: 14521, scaler: -1 }],
    );

    let (decoded_request, _) = Message::decode(&request.encode()).expect("decode request");
    let (decoded_response, _) = Message::decode(&response.encode()).expect("decode response");

    assert_eq!(decoded_request, request);
    assert_eq!(decoded_response, response);
}
