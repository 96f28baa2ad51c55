//! Shared wiring for the integration tests: a recording multiplexer, the
//! plain header codec, and helpers to pump frames between two cores.
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use aether_h2::frame::{Head, Kind};
use aether_h2::hpack::{Encoder as _, PlainCodec};
use aether_h2::{Config, Connection, Error, Multiplexer, Role};

pub const END_STREAM: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;
pub const PADDED: u8 = 0x8;
pub const ACK: u8 = 0x1;

/// Records every frame the core hands to the connection multiplexer.
#[derive(Clone, Default)]
pub struct MockMux {
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl MockMux {
    pub fn new() -> MockMux {
        MockMux::default()
    }

    /// Drains the recorded frames, parsed into (head, payload).
    pub fn take(&self) -> Vec<(Head, Bytes)> {
        self.frames
            .lock()
            .unwrap()
            .drain(..)
            .map(|raw| (Head::parse(&raw[..9]), raw.slice(9..)))
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    /// Spins until the mux holds at least `n` frames.
    pub fn wait_for_frames(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.frame_count() < n {
            assert!(Instant::now() < deadline, "timed out waiting for frames");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Multiplexer for MockMux {
    fn send_frame(&mut self, frame: Bytes) -> io::Result<()> {
        self.frames.lock().unwrap().push(frame);
        Ok(())
    }
}

pub fn client(mux: &MockMux) -> Connection {
    conn(Role::Client, Config::default(), mux)
}

pub fn server(mux: &MockMux) -> Connection {
    conn(Role::Server, Config::default(), mux)
}

pub fn conn(role: Role, config: Config, mux: &MockMux) -> Connection {
    Connection::new(
        role,
        config,
        Box::new(mux.clone()),
        Box::new(PlainCodec::new()),
        Box::new(PlainCodec::new()),
    )
}

/// Feeds everything `from` has written into `to`, failing on any
/// connection error.
pub fn pump(from: &MockMux, to: &Connection) {
    for (head, payload) in from.take() {
        to.recv_frame(head, payload).unwrap();
    }
}

pub fn feed(conn: &Connection, frame: (Head, Bytes)) -> Result<(), Error> {
    conn.recv_frame(frame.0, frame.1)
}

/// Encodes a header list with the plain codec.
pub fn plain_block(fields: &[(&str, &str)]) -> Bytes {
    let mut block = BytesMut::new();
    let mut pairs = fields.iter().map(|&(name, value)| {
        (
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        )
    });
    PlainCodec::new().encode(&mut pairs, &mut block);
    block.freeze()
}

pub fn headers_frame(id: u32, flags: u8, fields: &[(&str, &str)]) -> (Head, Bytes) {
    (
        Head::new(Kind::Headers, flags, id.into()),
        plain_block(fields),
    )
}

pub fn data_frame(id: u32, flags: u8, payload: &[u8]) -> (Head, Bytes) {
    (
        Head::new(Kind::Data, flags, id.into()),
        Bytes::copy_from_slice(payload),
    )
}

pub fn window_update_frame(id: u32, increment: u32) -> (Head, Bytes) {
    (
        Head::new(Kind::WindowUpdate, 0, id.into()),
        Bytes::copy_from_slice(&increment.to_be_bytes()),
    )
}

pub fn reset_frame(id: u32, code: u32) -> (Head, Bytes) {
    (
        Head::new(Kind::Reset, 0, id.into()),
        Bytes::copy_from_slice(&code.to_be_bytes()),
    )
}

pub fn settings_frame(entries: &[(u16, u32)]) -> (Head, Bytes) {
    let mut payload = BytesMut::new();
    for &(id, val) in entries {
        payload.put_u16(id);
        payload.put_u32(val);
    }
    (Head::new(Kind::Settings, 0, 0.into()), payload.freeze())
}

pub fn settings_ack_frame() -> (Head, Bytes) {
    (Head::new(Kind::Settings, ACK, 0.into()), Bytes::new())
}

pub fn ping_frame(flags: u8, payload: [u8; 8]) -> (Head, Bytes) {
    (
        Head::new(Kind::Ping, flags, 0.into()),
        Bytes::copy_from_slice(&payload),
    )
}

pub fn goaway_frame(last_stream_id: u32, code: u32) -> (Head, Bytes) {
    let mut payload = BytesMut::new();
    payload.put_u32(last_stream_id);
    payload.put_u32(code);
    (Head::new(Kind::GoAway, 0, 0.into()), payload.freeze())
}

pub fn request_fields() -> Vec<(&'static str, &'static str)> {
    vec![
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "example.com"),
    ]
}
