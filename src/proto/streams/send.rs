use std::cmp;
use std::sync::{Arc, Condvar};

use bytes::{BufMut, Bytes, BytesMut};
use http::HeaderMap;

use crate::error::{SendError, UserError};
use crate::frame::{
    self, HeaderBlock, Head, Kind, Reason, StreamId, StreamIdOverflow,
    DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_LEN,
};
use crate::proto::connection::{Inner, Role};
use crate::proto::streams::{FlowControl, DEFAULT_WEIGHT};
use crate::proto::{WindowSize, MAX_WINDOW_SIZE};

const END_STREAM: u8 = 0x1;
const END_HEADERS: u8 = 0x4;

/// Send-direction connection state: the outbound connection ledger and
/// the peer-granted limits the writers honor.
#[derive(Debug)]
pub(crate) struct Send {
    /// What the peer permits us to send, connection wide.
    pub flow: FlowControl,

    /// Signaled when the connection credit turns positive.
    pub credit_cond: Arc<Condvar>,

    /// The peer's SETTINGS_INITIAL_WINDOW_SIZE, seeding new streams' send
    /// windows.
    pub init_window_sz: WindowSize,

    pub next_stream_id: Result<StreamId, StreamIdOverflow>,

    /// GOAWAY horizon: streams above this id may no longer be opened.
    pub max_stream_id: StreamId,

    /// The peer's SETTINGS_MAX_FRAME_SIZE, bounding every fragment.
    pub max_frame_size: u32,

    /// The peer's SETTINGS_ENABLE_PUSH: whether we may push at all.
    pub is_push_enabled: bool,

    /// A local SETTINGS frame awaiting the peer's ACK.
    pub pending_settings: Option<frame::Settings>,
}

/// Outcome of a single `send_data_frame` step.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum SendData {
    /// The payload (and END_STREAM, when requested) is fully on the wire.
    Done,
    /// One frame went out; payload remains.
    Progress,
    /// No stream credit; wait on the stream's credit condition.
    BlockedOnStream,
    /// No connection credit; wait on the connection's credit condition.
    BlockedOnConnection,
}

impl Send {
    pub fn new(role: Role) -> Send {
        let next_stream_id: u32 = if role.is_server() { 2 } else { 1 };

        Send {
            flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            credit_cond: Arc::new(Condvar::new()),
            init_window_sz: DEFAULT_INITIAL_WINDOW_SIZE,
            next_stream_id: Ok(next_stream_id.into()),
            max_stream_id: StreamId::MAX,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            is_push_enabled: true,
            pending_settings: None,
        }
    }
}

/// Refuses header lists carrying connection-specific headers, mirroring
/// the receive-side validation.
fn check_headers(fields: &HeaderMap) -> Result<(), UserError> {
    if fields.contains_key(http::header::CONNECTION)
        || fields.contains_key(http::header::TRANSFER_ENCODING)
        || fields.contains_key(http::header::UPGRADE)
        || fields.contains_key("keep-alive")
        || fields.contains_key("proxy-connection")
    {
        tracing::debug!("illegal connection-specific headers found");
        return Err(UserError::MalformedHeaders);
    } else if let Some(te) = fields.get(http::header::TE) {
        if te != "trailers" {
            tracing::debug!("illegal connection-specific headers found");
            return Err(UserError::MalformedHeaders);
        }
    }
    Ok(())
}

impl Inner {
    /// Sends a header block on `id`: validates local state, encodes via
    /// the shared HPACK context, fragments at SETTINGS_MAX_FRAME_SIZE.
    pub(crate) fn send_headers(
        &mut self,
        id: StreamId,
        block: &HeaderBlock,
        end_stream: bool,
    ) -> Result<(), SendError> {
        self.ensure_open_send()?;
        check_headers(&block.fields)?;

        let initial = {
            let local = self.is_local_init(id);
            let stream = self
                .store
                .get_mut(id)
                .ok_or(UserError::InactiveStreamId)?;

            if stream.state.is_idle() && local {
                if id > self.send.max_stream_id {
                    tracing::debug!(
                        "cannot open stream {:?} beyond the GOAWAY horizon {:?}",
                        id,
                        self.send.max_stream_id,
                    );
                    return Err(UserError::Rejected.into());
                }

                if !self.counts.can_open_local() {
                    tracing::debug!("cannot open stream {:?}; concurrency limit", id);
                    return Err(UserError::Rejected.into());
                }
            }

            stream.state.send_open(end_stream)?
        };

        tracing::trace!("send_headers; id={:?}; eos={}", id, end_stream);

        let mut encoded = BytesMut::new();
        self.encoder
            .encode(&mut block.field_pairs().into_iter(), &mut encoded);

        self.send_header_block(Kind::Headers, id, None, encoded.freeze(), end_stream)?;

        let closed = {
            let stream = self
                .store
                .get_mut(id)
                .ok_or(UserError::InactiveStreamId)?;
            stream.headers_sent += 1;
            stream.state.is_closed()
        };

        if initial {
            self.mark_active(id);
        }
        if closed {
            self.transition_after(id);
        }

        Ok(())
    }

    /// Reserves a new even stream and sends PUSH_PROMISE carrying the
    /// promised request headers. Returns the promised stream id.
    pub(crate) fn send_push_promise(
        &mut self,
        id: StreamId,
        block: &HeaderBlock,
    ) -> Result<StreamId, SendError> {
        self.ensure_open_send()?;

        if !self.role.is_server() {
            return Err(UserError::UnexpectedFrameType.into());
        }

        if !self.send.is_push_enabled {
            return Err(UserError::PeerDisabledServerPush.into());
        }

        check_headers(&block.fields)?;

        {
            let stream = self.store.get(id).ok_or(UserError::InactiveStreamId)?;
            if stream.state.is_idle() || stream.state.is_closed() {
                return Err(UserError::UnexpectedFrameType.into());
            }
        }

        let promised_id = match self.send.next_stream_id {
            Ok(id) => id,
            Err(StreamIdOverflow) => return Err(UserError::OverflowedStreamId.into()),
        };
        self.send.next_stream_id = promised_id.next_id();

        self.insert_stream(promised_id);
        {
            let stream = self
                .store
                .get_mut(promised_id)
                .expect("promised stream just inserted");
            stream.is_pushed = true;
            stream.headers_sent += 1;
            stream.state.reserve_local()?;
        }
        self.mark_active(promised_id);
        self.tree.reprioritize(promised_id, id, false, DEFAULT_WEIGHT);

        tracing::trace!("send_push_promise; id={:?}; promised={:?}", id, promised_id);

        let mut encoded = BytesMut::new();
        self.encoder
            .encode(&mut block.field_pairs().into_iter(), &mut encoded);

        self.send_header_block(Kind::PushPromise, id, Some(promised_id), encoded.freeze(), false)?;

        Ok(promised_id)
    }

    /// Fragments an encoded block into HEADERS/PUSH_PROMISE plus
    /// CONTINUATION frames; only the last fragment carries END_HEADERS and
    /// END_STREAM only appears on the first frame.
    fn send_header_block(
        &mut self,
        first_kind: Kind,
        id: StreamId,
        promised: Option<StreamId>,
        mut block: Bytes,
        end_stream: bool,
    ) -> Result<(), SendError> {
        let max = self.send.max_frame_size as usize;
        let promised_len = if promised.is_some() { 4 } else { 0 };

        let first_len = cmp::min(block.len(), max - promised_len);
        let first = block.split_to(first_len);

        let mut flags = 0;
        if block.is_empty() {
            flags |= END_HEADERS;
        }
        if end_stream {
            flags |= END_STREAM;
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + promised_len + first.len());
        Head::new(first_kind, flags, id).encode(first.len() + promised_len, &mut buf);
        if let Some(promised) = promised {
            buf.put_u32(promised.into());
        }
        buf.put_slice(&first);
        self.mux.send_frame(buf.freeze())?;

        while !block.is_empty() {
            let fragment = block.split_to(cmp::min(block.len(), max));
            let flags = if block.is_empty() { END_HEADERS } else { 0 };

            let mut buf = BytesMut::with_capacity(HEADER_LEN + fragment.len());
            Head::new(Kind::Continuation, flags, id).encode(fragment.len(), &mut buf);
            buf.put_slice(&fragment);
            self.mux.send_frame(buf.freeze())?;
        }

        Ok(())
    }

    /// Writes at most one DATA frame within the current stream and
    /// connection credit. Ledgers are charged only for octets actually
    /// framed and handed off.
    pub(crate) fn send_data_frame(
        &mut self,
        id: StreamId,
        payload: &mut Bytes,
        end_stream: bool,
    ) -> Result<SendData, SendError> {
        let max_frame = self.send.max_frame_size as usize;
        let conn_credit = self.send.flow.window_size() as usize;

        let n = {
            let stream = self
                .store
                .get_mut(id)
                .ok_or(UserError::InactiveStreamId)?;

            if !stream.state.is_send_streaming() {
                return Err(UserError::UnexpectedFrameType.into());
            }

            if payload.is_empty() && !end_stream {
                return Ok(SendData::Done);
            }

            let stream_credit = stream.send_flow.window_size() as usize;
            let n = cmp::min(cmp::min(payload.len(), stream_credit), cmp::min(conn_credit, max_frame));

            if n == 0 && !payload.is_empty() {
                return Ok(if stream_credit == 0 {
                    SendData::BlockedOnStream
                } else {
                    SendData::BlockedOnConnection
                });
            }

            n
        };

        let chunk = payload.split_to(n);
        let eos = end_stream && payload.is_empty();

        let mut frame = frame::Data::new(id, chunk);
        frame.set_end_stream(eos);

        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        self.mux.send_frame(buf.freeze())?;

        self.send.flow.send_data(n as WindowSize);

        let closed = {
            let stream = self
                .store
                .get_mut(id)
                .ok_or(UserError::InactiveStreamId)?;
            stream.send_flow.send_data(n as WindowSize);
            stream.bytes_sent += n as u64;
            if eos {
                stream.state.send_close();
            }
            stream.state.is_closed()
        };

        if closed {
            self.transition_after(id);
        }

        Ok(if payload.is_empty() {
            SendData::Done
        } else {
            SendData::Progress
        })
    }

    /// Emits RST_STREAM (best effort) and moves the stream to closed with
    /// the stored reason.
    pub(crate) fn send_reset(&mut self, id: StreamId, reason: Reason) {
        tracing::trace!("send_reset; id={:?}; reason={:?}", id, reason);

        let mut buf = BytesMut::new();
        frame::Reset::new(id, reason).encode(&mut buf);
        if let Err(e) = self.mux.send_frame(buf.freeze()) {
            tracing::debug!("failed to send RST_STREAM; err={:?}", e);
        }

        if let Some(stream) = self.store.get_mut(id) {
            stream.state.set_reset(reason);
            stream.notify_all();
        }

        self.transition_after(id);
    }

    /// Emits WINDOW_UPDATE frames totalling `increment` on `id` (the
    /// connection when zero), splitting past 2^31-1 per frame, and credits
    /// the inbound ledger accordingly.
    pub(crate) fn send_window_update(
        &mut self,
        id: StreamId,
        mut increment: u64,
    ) -> Result<(), SendError> {
        if let crate::proto::connection::ConnState::Closed(_) = self.state {
            // Nobody left to credit.
            return Ok(());
        }

        while increment > 0 {
            let n = cmp::min(increment, MAX_WINDOW_SIZE as u64) as WindowSize;

            let ledger = if id.is_zero() {
                self.recv.flow.inc_window(n)
            } else {
                match self.store.get_mut(id) {
                    Some(stream) => stream.recv_flow.inc_window(n),
                    None => return Err(UserError::InactiveStreamId.into()),
                }
            };
            if ledger.is_err() {
                // The grant exceeds what the ledger can represent; the
                // frames still go out, the peer is accountable for staying
                // within 2^31-1.
                tracing::debug!("window update overflows the inbound ledger; id={:?}", id);
            }

            let mut buf = BytesMut::new();
            frame::WindowUpdate::new(id, n).encode(&mut buf);
            self.mux.send_frame(buf.freeze())?;

            increment -= n as u64;
        }

        Ok(())
    }

    /// Tears the stream down: RST_STREAM with code zero (errors ignored),
    /// drain the receive queue acking each chunk without per-stream window
    /// updates, then return the freed window to the connection in one
    /// aggregate update.
    pub(crate) fn shutdown_stream(&mut self, id: StreamId) {
        let need_reset = match self.store.get(id) {
            None => return,
            Some(stream) => !stream.state.is_idle() && !stream.state.is_closed(),
        };

        if need_reset {
            let mut buf = BytesMut::new();
            frame::Reset::new(id, Reason::NO_ERROR).encode(&mut buf);
            if let Err(e) = self.mux.send_frame(buf.freeze()) {
                tracing::debug!("shutdown: failed to send RST_STREAM; err={:?}", e);
            }
        }

        let mut freed: u64 = 0;
        if let Some(stream) = self.store.get_mut(id) {
            stream.state.set_reset(Reason::CANCEL);

            while let Some(item) = stream.pending_chunks.pop_front() {
                if let crate::proto::streams::ChunkItem::Data(mut chunk) = item {
                    freed += chunk.ack() as u64;
                }
            }
            stream.pending_headers.clear();
            stream.notify_all();
        }

        if freed > 0 {
            if let Err(e) = self.send_window_update(StreamId::ZERO, freed) {
                tracing::debug!("shutdown: failed to return connection window; err={:?}", e);
            }
        }

        self.transition_after(id);
    }
}
