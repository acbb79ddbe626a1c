// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C2 — the incremental IPT frame reader. Runs as a small state machine so
//! it can be fed byte-by-byte (or chunk-by-chunk) straight off a socket
//! read, without needing the whole frame buffered up front.

use super::header::{IptHeader, HEADER_LEN};
use crate::error::SmfError;

pub const MARKER: [u8; 4] = [0x1b, 0x1b, 0x1b, 0x1b];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub header: IptHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stream,
    Esc(u8),
    Head(u8),
    Data,
}

/// Byte-fed IPT frame parser: `STREAM` (scanning for the sync marker) ->
/// `ESC` (consuming the remaining marker bytes) -> `HEAD` (accumulating the
/// 8-byte header) -> `DATA` (accumulating `total_length` payload bytes).
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    head_buf: [u8; HEADER_LEN],
    header: Option<IptHeader>,
    data_buf: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser { state: State::Stream, head_buf: [0u8; HEADER_LEN], header: None, data_buf: Vec::new() }
    }

    /// Feeds one byte in. Returns a completed frame the moment its last
    /// payload byte arrives, or an error if the header just completed
    /// names a `total_length` too short to even cover itself.
    pub fn feed(&mut self, byte: u8) -> Result<Option<RawFrame>, SmfError> {
        match self.state {
            State::Stream => {
                if byte == MARKER[0] {
                    self.state = State::Esc(1);
                }
                Ok(None)
            },
            State::Esc(n) => {
                if byte == MARKER[n as usize] {
                    if n as usize + 1 == MARKER.len() {
                        self.state = State::Head(0);
                    } else {
                        self.state = State::Esc(n + 1);
                    }
                } else {
                    // Not actually the marker; resync from scratch, but a
                    // byte equal to MARKER[0] can itself restart the count.
                    self.state = if byte == MARKER[0] { State::Esc(1) } else { State::Stream };
                }
                Ok(None)
            },
            State::Head(n) => {
                self.head_buf[n as usize] = byte;
                let n = n + 1;
                if n as usize == HEADER_LEN {
                    let header = IptHeader::from_bytes(self.head_buf);
                    let body_len = header.body_len()?;
                    self.header = Some(header);
                    self.data_buf = Vec::with_capacity(body_len);
                    self.state = if body_len == 0 { State::Stream } else { State::Data };
                    if body_len == 0 {
                        self.header = None;
                        return Ok(Some(RawFrame { header, payload: Vec::new() }));
                    }
                } else {
                    self.state = State::Head(n);
                }
                Ok(None)
            },
            State::Data => {
                self.data_buf.push(byte);
                let header = self.header.expect("header set before entering Data state");
                let body_len = header.body_len()?;
                if self.data_buf.len() == body_len {
                    self.state = State::Stream;
                    self.header = None;
                    let payload = std::mem::take(&mut self.data_buf);
                    return Ok(Some(RawFrame { header, payload }));
                }
                Ok(None)
            },
        }
    }

    /// Feeds a whole chunk, returning every frame completed within it.
    pub fn feed_chunk(&mut self, chunk: &[u8]) -> Result<Vec<RawFrame>, SmfError> {
        let mut out = Vec::new();
        for &b in chunk {
            if let Some(frame) = self.feed(b)? {
                out.push(frame);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipt::codes::CTRL_REQ_WATCHDOG;

    fn encode(cmd: u16, seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MARKER);
        out.extend_from_slice(&IptHeader::for_payload(cmd, seq, payload.len()).to_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_one_frame_fed_whole() {
        let wire = encode(CTRL_REQ_WATCHDOG, 1, b"ping");
        let mut parser = FrameParser::new();
        let frames = parser.feed_chunk(&wire).expect("feed");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.cmd, CTRL_REQ_WATCHDOG);
        assert_eq!(frames[0].payload, b"ping");
    }

    #[test]
    fn parses_frame_fed_byte_by_byte() {
        let wire = encode(CTRL_REQ_WATCHDOG, 2, b"abcdef");
        let mut parser = FrameParser::new();
        let mut got = None;
        for b in wire {
            if let Some(f) = parser.feed(b).expect("feed") {
                got = Some(f);
            }
        }
        let f = got.expect("frame");
        assert_eq!(f.header.seq, 2);
        assert_eq!(f.payload, b"abcdef");
    }

    #[test]
    fn parses_zero_length_payload() {
        let wire = encode(CTRL_REQ_WATCHDOG, 3, b"");
        let mut parser = FrameParser::new();
        let frames = parser.feed_chunk(&wire).expect("feed");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn resyncs_after_garbage_before_marker() {
        let mut wire = vec![0x00, 0x1b, 0x42];
        wire.extend_from_slice(&encode(CTRL_REQ_WATCHDOG, 4, b"ok"));
        let mut parser = FrameParser::new();
        let frames = parser.feed_chunk(&wire).expect("feed");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, b"ok");
    }

    #[test]
    fn parses_back_to_back_frames() {
        let mut wire = encode(CTRL_REQ_WATCHDOG, 1, b"a");
        wire.extend_from_slice(&encode(CTRL_REQ_WATCHDOG, 2, b"bb"));
        let mut parser = FrameParser::new();
        let frames = parser.feed_chunk(&wire).expect("feed");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"a");
        assert_eq!(frames[1].payload, b"bb");
    }

    #[test]
    fn rejects_a_header_whose_total_length_is_shorter_than_the_header_itself() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&MARKER);
        wire.extend_from_slice(&IptHeader { cmd: CTRL_REQ_WATCHDOG, seq: 1, reserved: 0, total_length: 3 }.to_bytes());
        let mut parser = FrameParser::new();
        assert!(parser.feed_chunk(&wire).is_err());
    }
}
