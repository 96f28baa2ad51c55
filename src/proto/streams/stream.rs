use std::collections::VecDeque;
use std::sync::{Arc, Condvar};

use bytes::Bytes;

use crate::frame::{HeaderBlock, StreamId};
use crate::proto::streams::flow::FlowControl;
use crate::proto::streams::state::State;
use crate::proto::WindowSize;

/// A single stream's record: state machine, both flow ledgers, the
/// consumer-visible queues and their conditions, and the cumulative
/// counters.
#[derive(Debug)]
pub(crate) struct Stream {
    pub id: StreamId,

    pub state: State,

    /// Whether the stream is included in the connection's active count.
    pub is_counted: bool,

    /// Whether the stream was created by PUSH_PROMISE. The promised
    /// request block then occupies the first queue slot, shifting the
    /// block sequence the validator sees.
    pub is_pushed: bool,

    /// What the peer permits us to send.
    pub send_flow: FlowControl,

    /// What we permit the peer to send.
    pub recv_flow: FlowControl,

    pub pending_headers: VecDeque<HeaderBlock>,
    pub headers_cond: Arc<Condvar>,

    pub pending_chunks: VecDeque<ChunkItem>,
    pub chunks_cond: Arc<Condvar>,

    /// Signaled when `send_flow` turns positive.
    pub credit_cond: Arc<Condvar>,

    pub headers_sent: u64,
    pub headers_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,

    pub content_length: ContentLength,
}

/// One entry of the received-chunk queue.
#[derive(Debug)]
pub(crate) enum ChunkItem {
    Data(Chunk),
    /// Sentinel marking END_STREAM; follows the last real chunk.
    EndOfStream,
}

/// A unit of received DATA, post padding strip.
#[derive(Debug)]
pub(crate) struct Chunk {
    payload: Bytes,
    on_wire_len: WindowSize,
    acked: bool,
}

/// Tracks a declared `content-length` across DATA frames.
#[derive(Debug)]
pub(crate) enum ContentLength {
    Omitted,
    Remaining(u64),
}

/// The four cumulative per-stream counters.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StreamStats {
    pub headers_sent: u64,
    pub headers_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
}

impl Stream {
    pub fn new(id: StreamId, init_send_window: WindowSize, init_recv_window: WindowSize) -> Stream {
        Stream {
            id,
            state: State::default(),
            is_counted: false,
            is_pushed: false,
            send_flow: FlowControl::new(init_send_window),
            recv_flow: FlowControl::new(init_recv_window),
            pending_headers: VecDeque::new(),
            headers_cond: Arc::new(Condvar::new()),
            pending_chunks: VecDeque::new(),
            chunks_cond: Arc::new(Condvar::new()),
            credit_cond: Arc::new(Condvar::new()),
            headers_sent: 0,
            headers_recv: 0,
            bytes_sent: 0,
            bytes_recv: 0,
            content_length: ContentLength::Omitted,
        }
    }

    /// Wakes consumers of both receive queues.
    pub fn notify_recv(&self) {
        self.headers_cond.notify_all();
        self.chunks_cond.notify_all();
    }

    /// Wakes writers blocked on stream credit.
    pub fn notify_credit(&self) {
        self.credit_cond.notify_all();
    }

    /// Wakes every waiter; used when the stream closes.
    pub fn notify_all(&self) {
        self.notify_recv();
        self.notify_credit();
    }

    pub fn push_eos(&mut self) {
        self.pending_chunks.push_back(ChunkItem::EndOfStream);
    }

    pub fn dec_content_length(&mut self, len: usize) -> Result<(), ()> {
        match self.content_length {
            ContentLength::Remaining(ref mut rem) => match rem.checked_sub(len as u64) {
                Some(val) => *rem = val,
                None => return Err(()),
            },
            ContentLength::Omitted => {}
        }

        Ok(())
    }

    pub fn ensure_content_length_zero(&self) -> Result<(), ()> {
        match self.content_length {
            ContentLength::Remaining(0) => Ok(()),
            ContentLength::Remaining(_) => Err(()),
            ContentLength::Omitted => Ok(()),
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            headers_sent: self.headers_sent,
            headers_recv: self.headers_recv,
            bytes_sent: self.bytes_sent,
            bytes_recv: self.bytes_recv,
        }
    }
}

impl Chunk {
    pub fn new(payload: Bytes, on_wire_len: WindowSize) -> Chunk {
        Chunk {
            payload,
            on_wire_len,
            acked: false,
        }
    }

    /// A pseudo-chunk of zero on-wire length; its ack is a no-op. Used by
    /// `unget`.
    pub fn pseudo(payload: Bytes) -> Chunk {
        Chunk {
            payload,
            on_wire_len: 0,
            acked: true,
        }
    }

    /// Marks the window-update owed for this chunk as paid, returning the
    /// increment to emit. Idempotent: the second ack yields zero.
    pub fn ack(&mut self) -> WindowSize {
        if self.acked {
            0
        } else {
            self.acked = true;
            self.on_wire_len
        }
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
