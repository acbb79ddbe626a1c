// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The IPT session state machine. Owns one [`FrameParser`] plus a pair of
//! [`Scrambler`]s (one per direction) and reacts to `ctrl.req.login.*`
//! frames by advancing `state` and, for the scrambled variant, rekeying both
//! scramblers the instant the 32-byte key has been read.

use super::codes::{is_request, response_of, CTRL_REQ_LOGIN_PUBLIC, CTRL_REQ_LOGIN_SCRAMBLED};
use super::commands::{self, DecodedCommand};
use super::parser::{FrameParser, RawFrame};
use super::serializer::{encode_frame, SequenceRegister};
use crate::error::SmfError;
use crate::scramble::{ScrambleKey, Scrambler, SCRAMBLE_KEY_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    LoginSent,
    AuthOk,
    Closed,
}

#[derive(Debug)]
pub struct IptSession {
    pub state: SessionState,
    /// Name/password the peer presented in its most recent `ctrl.req.login.*`
    /// frame, for whatever credential check the caller wants to run before
    /// calling [`IptSession::mark_authorized`].
    pub peer_name: Option<String>,
    pub peer_pwd: Option<String>,
    /// `(cmd, seq)` of the most recently sent request still awaiting its
    /// response, so an incoming frame can be correlated to it by sequence
    /// number alone rather than by arrival order.
    pending_request: Option<(u16, u8)>,
    rx: Scrambler,
    tx: Scrambler,
    parser: FrameParser,
    seq: SequenceRegister,
}

impl IptSession {
    pub fn new(key: ScrambleKey) -> Self {
        IptSession {
            state: SessionState::Init,
            peer_name: None,
            peer_pwd: None,
            pending_request: None,
            rx: Scrambler::new(key),
            tx: Scrambler::new(key),
            parser: FrameParser::new(),
            seq: SequenceRegister::new(),
        }
    }

    /// Descrambles `wire_bytes` through the receive-direction key stream and
    /// feeds the plaintext into the frame parser, reacting to login frames
    /// as they complete. Returns every frame the chunk finished.
    pub fn receive(&mut self, wire_bytes: &[u8]) -> Result<Vec<RawFrame>, SmfError> {
        let plain = self.rx.transform_to_vec(wire_bytes);
        let mut frames = Vec::new();
        for b in plain {
            if let Some(frame) = self.parser.feed(b)? {
                self.on_frame(&frame)?;
                self.correlate(&frame);
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// True if `frame` is the response to the most recently sent request
    /// still outstanding — same sequence number, and its command is that
    /// request's response code. Clears `pending_request` either way once a
    /// frame with a matching sequence number arrives, since the peer never
    /// reuses a sequence for anything but the matching response.
    fn correlate(&mut self, frame: &RawFrame) -> bool {
        let Some((req_cmd, req_seq)) = self.pending_request else { return false };
        if frame.header.seq != req_seq {
            return false;
        }
        self.pending_request = None;
        frame.header.cmd == response_of(req_cmd)
    }

    /// The sequence number of the request this session is still waiting on
    /// a response for, if any.
    pub fn pending_request_seq(&self) -> Option<u8> {
        self.pending_request.map(|(_, seq)| seq)
    }

    fn on_frame(&mut self, frame: &RawFrame) -> Result<(), SmfError> {
        match frame.header.cmd {
            CTRL_REQ_LOGIN_PUBLIC => {
                let DecodedCommand::LoginPublic { name, pwd } = commands::decode(frame)? else {
                    return Err(SmfError::framing("ipt", "login.public frame did not decode as login.public"));
                };
                self.peer_name = Some(name);
                self.peer_pwd = Some(pwd);
                self.state = SessionState::LoginSent;
            },
            CTRL_REQ_LOGIN_SCRAMBLED => {
                let DecodedCommand::LoginScrambled { name, pwd, key } = commands::decode(frame)? else {
                    return Err(SmfError::framing("ipt", "login.scrambled frame did not decode as login.scrambled"));
                };
                self.peer_name = Some(name);
                self.peer_pwd = Some(pwd);
                self.state = SessionState::LoginSent;
                let key = ScrambleKey::new(key);
                // Rekey both directions the instant the key is read, so the
                // very next byte on the wire — in either direction — is
                // ciphered under the new key. Both peers perform this at the
                // same logical point (end of this frame's payload), which is
                // what keeps the two independent position counters in sync.
                self.rx.set(key);
                self.tx.set(key);
            },
            _ => {},
        }
        Ok(())
    }

    /// Builds a frame for `cmd`/`payload`, assigns the next outgoing
    /// sequence number, and scrambles it for the wire. Requests (the
    /// `0x8000` bit set) are tracked as the one the next [`IptSession::receive`]
    /// call should correlate a response against — a peer answering a
    /// request should use [`IptSession::send_response`] instead, so the
    /// reply echoes the request's own sequence number rather than
    /// allocating a fresh one from this session's independent counter.
    pub fn send(&mut self, cmd: u16, payload: &[u8]) -> Vec<u8> {
        let seq = self.seq.next();
        if is_request(cmd) {
            self.pending_request = Some((cmd, seq));
        }
        let plain = encode_frame(cmd, seq, payload);
        self.tx.transform_to_vec(&plain)
    }

    /// Builds a response frame carrying `seq` — the sequence number of the
    /// request it answers — instead of allocating a new one, so the
    /// requester can correlate it by sequence alone (§3).
    pub fn send_response(&mut self, cmd: u16, seq: u8, payload: &[u8]) -> Vec<u8> {
        let plain = encode_frame(cmd, seq, payload);
        self.tx.transform_to_vec(&plain)
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut out = s.as_bytes().to_vec();
        out.push(0);
        out
    }

    /// Sends `ctrl.req.login.public`: `name` then `pwd`, both NUL-terminated.
    pub fn send_login_public(&mut self, name: &str, pwd: &str) -> Vec<u8> {
        let mut payload = Self::cstr(name);
        payload.extend(Self::cstr(pwd));
        self.state = SessionState::LoginSent;
        self.send(CTRL_REQ_LOGIN_PUBLIC, &payload)
    }

    /// Sends `ctrl.req.login.scrambled`: `name` then `pwd`, both
    /// NUL-terminated, then the raw 32-byte key that rekeys both directions
    /// the instant it has been written — the same logical point the peer
    /// rekeys at upon receiving this frame.
    pub fn send_login_scrambled(&mut self, name: &str, pwd: &str, key: ScrambleKey) -> Vec<u8> {
        let mut payload = Self::cstr(name);
        payload.extend(Self::cstr(pwd));
        payload.extend_from_slice(&key.0);
        let wire = self.send(CTRL_REQ_LOGIN_SCRAMBLED, &payload);
        self.rx.set(key);
        self.tx.set(key);
        self.state = SessionState::LoginSent;
        wire
    }

    pub fn mark_authorized(&mut self) {
        self.state = SessionState::AuthOk;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipt::codes::CTRL_REQ_WATCHDOG;

    #[test]
    fn login_scrambled_frame_rekeys_both_directions_mid_stream() {
        let initial = ScrambleKey::default();
        let mut client = IptSession::new(initial);
        let mut server = IptSession::new(initial);

        let mut new_key = [0u8; SCRAMBLE_KEY_LEN];
        for (i, b) in new_key.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(13).wrapping_add(5);
        }

        let login_wire = client.send_login_scrambled("segw-1", "secret", ScrambleKey::new(new_key));
        let frames = server.receive(&login_wire).expect("receive login");
        assert_eq!(frames.len(), 1);
        assert_eq!(server.state, SessionState::LoginSent);
        assert_eq!(server.peer_name.as_deref(), Some("segw-1"));
        assert_eq!(server.peer_pwd.as_deref(), Some("secret"));

        // Both sides should now be keyed identically; prove it by having the
        // server send a frame the client can decode under the new key.
        let watchdog_wire = server.send(CTRL_REQ_WATCHDOG, b"ping");
        let frames = client.receive(&watchdog_wire).expect("receive watchdog");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"ping");
    }

    #[test]
    fn login_public_frame_is_decoded_into_peer_name_and_pwd() {
        let mut client = IptSession::new(ScrambleKey::default());
        let mut server = IptSession::new(ScrambleKey::default());

        let login_wire = client.send_login_public("segw-1", "secret");
        let frames = server.receive(&login_wire).expect("receive login");
        assert_eq!(frames.len(), 1);
        assert_eq!(server.state, SessionState::LoginSent);
        assert_eq!(server.peer_name.as_deref(), Some("segw-1"));
        assert_eq!(server.peer_pwd.as_deref(), Some("secret"));
    }

    #[test]
    fn unscrambled_session_round_trips_with_default_key() {
        let mut a = IptSession::new(ScrambleKey::default());
        let mut b = IptSession::new(ScrambleKey::default());
        let wire = a.send(CTRL_REQ_WATCHDOG, b"hi");
        let frames = b.receive(&wire).expect("receive");
        assert_eq!(frames[0].payload, b"hi");
    }

    #[test]
    fn correlates_a_response_to_the_outstanding_request_by_sequence_number() {
        use crate::ipt::codes::response_of;

        let mut client = IptSession::new(ScrambleKey::default());
        let mut server = IptSession::new(ScrambleKey::default());

        let req_wire = client.send(CTRL_REQ_WATCHDOG, b"req");
        let req_seq = client.pending_request_seq().expect("request recorded as pending");
        let received = server.receive(&req_wire).expect("receive request");
        assert_eq!(received[0].header.seq, req_seq);

        let res_wire = server.send_response(response_of(CTRL_REQ_WATCHDOG), received[0].header.seq, b"res");
        let frames = client.receive(&res_wire).expect("receive response");

        assert_eq!(frames[0].header.seq, req_seq, "response must carry the request's own sequence number");
        assert_eq!(client.pending_request_seq(), None, "matched response clears the pending request");
    }

    #[test]
    fn an_unrelated_sequence_number_does_not_clear_the_pending_request() {
        let mut client = IptSession::new(ScrambleKey::default());
        let mut other = IptSession::new(ScrambleKey::default());

        client.send(CTRL_REQ_WATCHDOG, b"req");
        let req_seq = client.pending_request_seq().expect("request recorded as pending");

        // Advance `other`'s own sequence counter so its frame doesn't
        // coincidentally land on the same number as `client`'s request.
        other.send(CTRL_REQ_WATCHDOG, b"warm up");
        let unrelated_wire = other.send(CTRL_REQ_WATCHDOG, b"unrelated");
        client.receive(&unrelated_wire).expect("receive unrelated frame");

        assert_eq!(client.pending_request_seq(), Some(req_seq), "only a frame carrying the matching sequence clears it");
    }
}
