use bytes::Bytes;

use crate::error::RecvError;
use crate::frame::{
    self, parse_u64, BlockContext, HeaderBlock, Head, Reason, StreamId, StreamIdOverflow,
    DEFAULT_INITIAL_WINDOW_SIZE,
};
use crate::proto::assembly::{Assembly, AssemblyKind};
use crate::proto::connection::{Inner, Role};
use crate::proto::streams::{Chunk, ChunkItem, ContentLength, FlowControl, DEFAULT_WEIGHT};
use crate::proto::{Config, WindowSize};

const END_HEADERS: u8 = 0x4;

/// Receive-direction connection state: the inbound connection ledger and
/// the peer's stream-id bookkeeping.
#[derive(Debug)]
pub(crate) struct Recv {
    /// What we permit the peer to send, connection wide.
    pub flow: FlowControl,

    /// Our SETTINGS_INITIAL_WINDOW_SIZE, seeding new streams' recv
    /// windows.
    pub init_window_sz: WindowSize,

    /// The next stream id the peer may legally introduce.
    pub next_stream_id: Result<StreamId, StreamIdOverflow>,

    /// Highest peer-initiated id observed; GOAWAY frames carry it.
    pub last_processed_id: StreamId,

    /// Our ENABLE_PUSH: whether the peer may send PUSH_PROMISE at all.
    pub is_push_enabled: bool,
}

impl Recv {
    pub fn new(role: Role, config: &Config) -> Recv {
        let next_stream_id: u32 = if role.is_server() { 1 } else { 2 };

        Recv {
            flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE),
            init_window_sz: config.initial_window_size,
            next_stream_id: Ok(next_stream_id.into()),
            last_processed_id: StreamId::ZERO,
            is_push_enabled: config.push_enabled,
        }
    }
}

impl Inner {
    pub(crate) fn recv_data(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let id = head.stream_id();

        let frame = frame::Data::load(head, payload)
            .map_err(|e| RecvError::Connection(e.reason()))?;
        let sz = frame.on_wire_len();
        let eos = frame.is_end_stream();

        tracing::trace!("recv_data; id={:?}; sz={}; eos={}", id, sz, eos);

        let closed = {
            let stream = match self.store.get_mut(id) {
                Some(stream) => stream,
                None => return self.frame_on_absent_stream(id),
            };

            if !stream.state.is_recv_streaming() {
                if stream.state.is_idle() || stream.state.is_reserved_remote() {
                    proto_err!(conn: "DATA on idle stream; stream={:?}", id);
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }
                proto_err!(stream: "STREAM_CLOSED -- DATA on closed stream; stream={:?}", id);
                return Err(RecvError::Stream {
                    id,
                    reason: Reason::STREAM_CLOSED,
                });
            }

            self.recv.flow.consume(sz).map_err(RecvError::Connection)?;

            stream
                .recv_flow
                .consume(sz)
                .map_err(|reason| RecvError::Stream { id, reason })?;

            if stream.dec_content_length(frame.payload().len()).is_err() {
                proto_err!(stream: "content-length overflow; stream={:?}", id);
                return Err(RecvError::Stream {
                    id,
                    reason: Reason::PROTOCOL_ERROR,
                });
            }

            if eos {
                if stream.ensure_content_length_zero().is_err() {
                    proto_err!(stream: "content-length underflow; stream={:?}", id);
                    return Err(RecvError::Stream {
                        id,
                        reason: Reason::PROTOCOL_ERROR,
                    });
                }

                stream.state.recv_close()?;
            }

            stream.bytes_recv += sz as u64;
            stream
                .pending_chunks
                .push_back(ChunkItem::Data(Chunk::new(frame.into_payload(), sz)));
            if eos {
                stream.push_eos();
            }
            stream.chunks_cond.notify_all();

            stream.state.is_closed()
        };

        if closed {
            self.transition_after(id);
        }

        Ok(())
    }

    pub(crate) fn recv_headers_frame(
        &mut self,
        head: Head,
        payload: Bytes,
    ) -> Result<(), RecvError> {
        let id = head.stream_id();

        let (frame, fragment) = frame::Headers::load(head, payload).map_err(|e| match e {
            frame::Error::InvalidDependencyId => RecvError::Stream {
                id,
                reason: Reason::PROTOCOL_ERROR,
            },
            e => RecvError::Connection(e.reason()),
        })?;

        if !self.store.contains(id) {
            if self.is_local_init(id) {
                return self.frame_on_absent_stream(id);
            }

            let next = match self.recv.next_stream_id {
                Ok(next) => next,
                Err(StreamIdOverflow) => {
                    proto_err!(conn: "peer stream id space exhausted");
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }
            };

            if id < next {
                proto_err!(stream: "STREAM_CLOSED -- HEADERS on old stream; stream={:?}", id);
                return Err(RecvError::Stream {
                    id,
                    reason: Reason::STREAM_CLOSED,
                });
            }

            if self.role.is_client() {
                proto_err!(conn: "server cannot open a stream with HEADERS; stream={:?}", id);
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }

            self.recv.next_stream_id = id.next_id();
            if id > self.recv.last_processed_id {
                self.recv.last_processed_id = id;
            }
            self.insert_stream(id);
        }

        if let Some(dep) = frame.stream_dep() {
            self.tree
                .reprioritize(id, dep.dependency_id(), dep.is_exclusive(), dep.weight());
        }

        let assembly =
            Assembly::headers(&frame, fragment).map_err(|e| RecvError::Connection(e.reason()))?;

        if frame.is_end_headers() {
            self.finish_assembly(assembly)
        } else {
            self.assembly = Some(assembly);
            Ok(())
        }
    }

    pub(crate) fn recv_continuation(
        &mut self,
        head: Head,
        payload: Bytes,
    ) -> Result<(), RecvError> {
        let mut assembly = match self.assembly.take() {
            Some(assembly) => assembly,
            None => {
                proto_err!(conn: "CONTINUATION without an open header block");
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        };

        debug_assert_eq!(head.stream_id(), assembly.stream_id());

        assembly
            .append(&payload)
            .map_err(|e| RecvError::Connection(e.reason()))?;

        if head.flag() & END_HEADERS != 0 {
            self.finish_assembly(assembly)
        } else {
            self.assembly = Some(assembly);
            Ok(())
        }
    }

    /// END_HEADERS observed: decode the accumulated block and deliver it.
    pub(crate) fn finish_assembly(&mut self, assembly: Assembly) -> Result<(), RecvError> {
        let id = assembly.stream_id();
        let kind = assembly.kind();

        let fields = assembly
            .complete(&mut *self.decoder)
            .map_err(|e| RecvError::Connection(e.reason()))?;

        match kind {
            AssemblyKind::Headers { end_stream } => self.deliver_headers(id, end_stream, fields),
            AssemblyKind::PushPromise { promised_id } => {
                self.deliver_push_promise(promised_id, fields)
            }
        }
    }

    fn deliver_headers(
        &mut self,
        id: StreamId,
        eos: bool,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<(), RecvError> {
        let is_server = self.role.is_server();

        let (initial, closed) = {
            let stream = match self.store.get_mut(id) {
                Some(stream) => stream,
                None => return self.frame_on_absent_stream(id),
            };

            // The promised request block delivered by PUSH_PROMISE does
            // not take part in the headers/trailers sequence.
            let block_index = stream
                .headers_recv
                .saturating_sub(stream.is_pushed as u64);
            if block_index >= 2 {
                proto_err!(stream: "third header block on stream; stream={:?}", id);
                return Err(RecvError::Stream {
                    id,
                    reason: Reason::PROTOCOL_ERROR,
                });
            }

            if stream.state.is_recv_closed() && !stream.state.is_reserved_local() {
                proto_err!(stream: "STREAM_CLOSED -- HEADERS on recv-closed stream; stream={:?}", id);
                return Err(RecvError::Stream {
                    id,
                    reason: Reason::STREAM_CLOSED,
                });
            }

            let ctx = if block_index == 1 {
                if !eos {
                    proto_err!(stream: "trailers without END_STREAM; stream={:?}", id);
                    return Err(RecvError::Stream {
                        id,
                        reason: Reason::PROTOCOL_ERROR,
                    });
                }
                BlockContext::Trailers
            } else if is_server {
                BlockContext::Request
            } else {
                BlockContext::Response
            };

            let block = HeaderBlock::build(ctx, fields).map_err(|_| RecvError::Stream {
                id,
                reason: Reason::PROTOCOL_ERROR,
            })?;

            let initial = stream.state.recv_open(eos)?;

            if block_index == 0 {
                if let Some(content_length) = block.fields.get(http::header::CONTENT_LENGTH) {
                    match parse_u64(content_length.as_bytes()) {
                        Ok(val) => stream.content_length = ContentLength::Remaining(val),
                        Err(()) => {
                            proto_err!(stream: "could not parse content-length; stream={:?}", id);
                            return Err(RecvError::Stream {
                                id,
                                reason: Reason::PROTOCOL_ERROR,
                            });
                        }
                    }
                }
            }

            stream.headers_recv += 1;
            stream.pending_headers.push_back(block);
            stream.headers_cond.notify_all();

            if eos {
                stream.push_eos();
                stream.chunks_cond.notify_all();
            }

            (initial, stream.state.is_closed())
        };

        if initial {
            self.mark_active(id);

            if is_server {
                self.incoming.push_back(id);
                self.incoming_cond.notify_all();
            }
        }

        if closed {
            self.transition_after(id);
        }

        Ok(())
    }

    fn deliver_push_promise(
        &mut self,
        promised_id: StreamId,
        fields: Vec<(Bytes, Bytes)>,
    ) -> Result<(), RecvError> {
        // A promised request is validated with the request rules.
        let block =
            HeaderBlock::build(BlockContext::Request, fields).map_err(|_| RecvError::Stream {
                id: promised_id,
                reason: Reason::PROTOCOL_ERROR,
            })?;

        {
            let stream = match self.store.get_mut(promised_id) {
                Some(stream) => stream,
                None => return self.frame_on_absent_stream(promised_id),
            };

            stream.headers_recv += 1;
            stream.pending_headers.push_back(block);
            stream.headers_cond.notify_all();
        }

        self.incoming.push_back(promised_id);
        self.incoming_cond.notify_all();

        Ok(())
    }

    pub(crate) fn recv_push_promise(
        &mut self,
        head: Head,
        payload: Bytes,
    ) -> Result<(), RecvError> {
        if self.role.is_server() {
            proto_err!(conn: "server received PUSH_PROMISE");
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        if !self.recv.is_push_enabled {
            proto_err!(conn: "recv_push_promise: push is disabled");
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        let (frame, fragment) = frame::PushPromise::load(head, payload)
            .map_err(|e| RecvError::Connection(e.reason()))?;

        let id = frame.stream_id();
        let promised_id = frame.promised_id();

        match self.store.get(id) {
            Some(stream) if !stream.state.is_idle() && !stream.state.is_recv_closed() => {}
            _ => {
                proto_err!(conn: "PUSH_PROMISE on inactive stream; stream={:?}", id);
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        }

        if !promised_id.is_server_initiated() {
            proto_err!(conn: "promised stream id is not server initiated; id={:?}", promised_id);
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        let next = match self.recv.next_stream_id {
            Ok(next) => next,
            Err(StreamIdOverflow) => {
                proto_err!(conn: "peer stream id space exhausted");
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        };

        if promised_id < next {
            proto_err!(conn: "promised stream id in use; id={:?}", promised_id);
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        self.recv.next_stream_id = promised_id.next_id();
        self.insert_stream(promised_id);

        {
            let stream = self
                .store
                .get_mut(promised_id)
                .expect("promised stream just inserted");
            stream.is_pushed = true;
            stream.state.reserve_remote()?;
        }

        self.mark_active(promised_id);
        self.tree.reprioritize(promised_id, id, false, DEFAULT_WEIGHT);

        let assembly = Assembly::push_promise(&frame, fragment)
            .map_err(|e| RecvError::Connection(e.reason()))?;

        if frame.is_end_headers() {
            self.finish_assembly(assembly)
        } else {
            self.assembly = Some(assembly);
            Ok(())
        }
    }

    pub(crate) fn recv_priority(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let id = head.stream_id();

        if id.is_zero() {
            proto_err!(conn: "PRIORITY on the connection control stream");
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        let frame = frame::Priority::load(head, &payload).map_err(|e| match e {
            frame::Error::BadFrameSize => RecvError::Stream {
                id,
                reason: Reason::FRAME_SIZE_ERROR,
            },
            frame::Error::InvalidDependencyId => RecvError::Stream {
                id,
                reason: Reason::PROTOCOL_ERROR,
            },
            e => RecvError::Connection(e.reason()),
        })?;

        // Stream-state independent; an unknown dependency target simply
        // materializes an idle node.
        let dep = frame.dependency();
        self.tree
            .reprioritize(id, dep.dependency_id(), dep.is_exclusive(), dep.weight());

        Ok(())
    }

    pub(crate) fn recv_reset(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let id = head.stream_id();

        if id.is_zero() {
            proto_err!(conn: "RST_STREAM on the connection control stream");
            return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
        }

        let frame =
            frame::Reset::load(head, &payload).map_err(|e| RecvError::Connection(e.reason()))?;

        match self.store.get_mut(id) {
            None => {
                if !self.may_have_created_stream(id) {
                    proto_err!(conn: "RST_STREAM on idle stream; stream={:?}", id);
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }
                // Already released; nothing to reset.
                return Ok(());
            }
            Some(stream) => {
                if stream.state.is_idle() {
                    proto_err!(conn: "RST_STREAM on idle stream; stream={:?}", id);
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }

                stream.state.recv_reset(frame.reason());
                stream.notify_all();
            }
        }

        self.transition_after(id);
        Ok(())
    }

    pub(crate) fn recv_window_update(
        &mut self,
        head: Head,
        payload: Bytes,
    ) -> Result<(), RecvError> {
        let id = head.stream_id();

        let frame = frame::WindowUpdate::load(head, &payload).map_err(|e| match e {
            frame::Error::InvalidWindowUpdateValue if !id.is_zero() => RecvError::Stream {
                id,
                reason: Reason::PROTOCOL_ERROR,
            },
            e => RecvError::Connection(e.reason()),
        })?;

        let increment = frame.size_increment();

        if id.is_zero() {
            self.send
                .flow
                .inc_window(increment)
                .map_err(RecvError::Connection)?;
            self.send.credit_cond.notify_all();
            return Ok(());
        }

        match self.store.get_mut(id) {
            None => {
                if !self.may_have_created_stream(id) {
                    proto_err!(conn: "WINDOW_UPDATE on idle stream; stream={:?}", id);
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }
                // Late update for a released stream.
                Ok(())
            }
            Some(stream) => {
                if stream.state.is_idle() {
                    proto_err!(conn: "WINDOW_UPDATE on idle stream; stream={:?}", id);
                    return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
                }

                if stream.state.is_closed() {
                    return Ok(());
                }

                stream
                    .send_flow
                    .inc_window(increment)
                    .map_err(|reason| RecvError::Stream { id, reason })?;
                stream.credit_cond.notify_all();
                Ok(())
            }
        }
    }

    /// A stream-addressed frame arrived for an id with no record: either
    /// the stream was released (reset as STREAM_CLOSED) or it was never
    /// created, which makes the frame a connection-level violation.
    pub(crate) fn frame_on_absent_stream(&mut self, id: StreamId) -> Result<(), RecvError> {
        if self.may_have_created_stream(id) {
            proto_err!(stream: "STREAM_CLOSED -- frame on released stream; stream={:?}", id);
            Err(RecvError::Stream {
                id,
                reason: Reason::STREAM_CLOSED,
            })
        } else {
            proto_err!(conn: "frame on idle stream; stream={:?}", id);
            Err(RecvError::Connection(Reason::PROTOCOL_ERROR))
        }
    }

    pub(crate) fn may_have_created_stream(&self, id: StreamId) -> bool {
        let next = if self.is_local_init(id) {
            self.send.next_stream_id
        } else {
            self.recv.next_stream_id
        };

        match next {
            Ok(next) => id < next,
            Err(StreamIdOverflow) => true,
        }
    }
}
