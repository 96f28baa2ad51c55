//! Per-stream HTTP/2 protocol core.
//!
//! This crate is the frame-level heart of an HTTP/2 endpoint: the stream
//! state machine, the priority dependency tree, per-stream and
//! per-connection flow control, header-block assembly across fragmented
//! frames, and the blocking producer/consumer queues that expose received
//! headers and data to application code.
//!
//! It deliberately stops at the protocol boundary. The TCP/TLS transport,
//! the HPACK encoder and decoder, and the connection multiplexer (which
//! reads frame headers off the wire and writes framed bytes back) are
//! collaborators supplied by the embedding endpoint:
//!
//! * inbound, the multiplexer parses the 9-octet frame header into a
//!   [`frame::Head`] and hands it with the payload to
//!   [`Connection::recv_frame`];
//! * outbound, every writer serializes complete frames and pushes them
//!   through the [`Multiplexer`] sink;
//! * header compression is driven through the [`hpack::Encoder`] and
//!   [`hpack::Decoder`] traits.
//!
//! One connection confines itself to one executor: a reader thread feeds
//! `recv_frame` while application threads block on [`StreamRef`] calls,
//! every suspension point taking an optional absolute deadline.

macro_rules! proto_err {
    (conn: $($msg:tt)+) => {
        tracing::debug!("connection error PROTOCOL_ERROR -- {}", format_args!($($msg)+))
    };
    (stream: $($msg:tt)+) => {
        tracing::debug!("stream error -- {}", format_args!($($msg)+))
    };
}

mod error;
pub mod frame;
pub mod hpack;
mod proto;
mod share;

pub use crate::error::{Error, RecvError, SendError, UserError};
pub use crate::frame::{HeaderBlock, Pseudo, Reason, StreamId};
pub use crate::proto::{
    Config, Connection, Multiplexer, PingPayload, Role, StreamStats, WindowSize,
    MAX_HEADER_BUFFER_SIZE, MAX_WINDOW_SIZE,
};
pub use crate::share::StreamRef;
