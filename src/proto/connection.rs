use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::error::{Error, RecvError, UserError};
use crate::frame::{self, Head, Kind, Reason, StreamId, StreamIdOverflow};
use crate::proto::assembly::Assembly;
use crate::proto::streams;
use crate::proto::streams::{Counts, PriorityTree, Recv, Store, Stream};
use crate::proto::{lock, wait_on, PingPayload, WindowSize};
use crate::share::StreamRef;

/// The local endpoint's role; stream-id parity and header validation
/// direction both derive from it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Role::Client)
    }
}

/// The sink the core hands complete framed bytes to. The transport side of
/// the connection multiplexer implements this; writers call it under the
/// connection lock so multi-frame header blocks stay contiguous.
pub trait Multiplexer: Send + 'static {
    fn send_frame(&mut self, frame: Bytes) -> io::Result<()>;
}

/// Local endpoint configuration. These seed the core's view of our own
/// SETTINGS; the embedder remains responsible for announcing them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Our SETTINGS_INITIAL_WINDOW_SIZE.
    pub initial_window_size: WindowSize,

    /// Our SETTINGS_ENABLE_PUSH.
    pub push_enabled: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            push_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ConnState {
    Open,
    Closed(Reason),
}

pub(crate) struct PingSlot {
    pub acked: AtomicBool,
    pub cond: Condvar,
}

/// Everything a connection owns, behind one lock: the stream store, the
/// priority tree, both connection ledgers, the header-block assembler and
/// the shared HPACK contexts.
pub(crate) struct Inner {
    pub role: Role,
    pub state: ConnState,
    pub store: Store,
    pub tree: PriorityTree,
    pub counts: Counts,
    pub recv: Recv,
    pub send: streams::Send,
    pub assembly: Option<Assembly>,
    pub pings: HashMap<PingPayload, Arc<PingSlot>>,
    pub incoming: VecDeque<StreamId>,
    pub incoming_cond: Arc<Condvar>,
    pub shutdown_cond: Arc<Condvar>,
    pub mux: Box<dyn Multiplexer>,
    pub encoder: Box<dyn crate::hpack::Encoder + Send>,
    pub decoder: Box<dyn crate::hpack::Decoder + Send>,
}

/// A per-stream HTTP/2 protocol core.
///
/// The connection multiplexer feeds inbound frames through
/// [`Connection::recv_frame`]; application threads drive streams through
/// [`StreamRef`] handles. All handles share one lock, so one connection
/// must be confined to one executor at a time.
pub struct Connection {
    pub(crate) inner: Arc<Mutex<Inner>>,
}

impl Clone for Connection {
    fn clone(&self) -> Connection {
        Connection {
            inner: self.inner.clone(),
        }
    }
}

impl Connection {
    pub fn new(
        role: Role,
        config: Config,
        mux: Box<dyn Multiplexer>,
        encoder: Box<dyn crate::hpack::Encoder + Send>,
        decoder: Box<dyn crate::hpack::Decoder + Send>,
    ) -> Connection {
        let inner = Inner {
            role,
            state: ConnState::Open,
            store: Store::new(),
            tree: PriorityTree::new(),
            counts: Counts::new(),
            recv: Recv::new(role, &config),
            send: streams::Send::new(role),
            assembly: None,
            pings: HashMap::new(),
            incoming: VecDeque::new(),
            incoming_cond: Arc::new(Condvar::new()),
            shutdown_cond: Arc::new(Condvar::new()),
            mux,
            encoder,
            decoder,
        };

        Connection {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Entry point for the multiplexer: one frame, already split into its
    /// parsed header and payload bytes.
    ///
    /// Stream-level protocol errors are answered with RST_STREAM here and
    /// reported as `Ok`; connection-level errors emit GOAWAY, poison the
    /// connection and surface to the caller, which should stop feeding
    /// frames.
    pub fn recv_frame(&self, head: Head, payload: Bytes) -> Result<(), Error> {
        let mut me = lock(&self.inner);

        match me.recv_frame_inner(head, payload) {
            Ok(()) => Ok(()),
            Err(RecvError::Stream { id, reason }) => {
                me.send_reset(id, reason);
                Ok(())
            }
            Err(RecvError::Connection(reason)) => {
                me.handle_conn_error(reason);
                Err(reason.into())
            }
            Err(RecvError::Io(e)) => Err(e.into()),
        }
    }

    /// Opens a new locally-initiated stream in `idle`.
    pub fn new_stream(&self) -> Result<StreamRef, Error> {
        let mut me = lock(&self.inner);
        me.ensure_open()?;

        let id = match me.send.next_stream_id {
            Ok(id) => id,
            Err(StreamIdOverflow) => return Err(UserError::OverflowedStreamId.into()),
        };
        me.send.next_stream_id = id.next_id();
        me.insert_stream(id);

        Ok(StreamRef::new(self.inner.clone(), id))
    }

    /// Waits for the next peer-initiated stream: an inbound request
    /// (server) or a pushed stream (client).
    pub fn accept(&self, deadline: Option<Instant>) -> Result<StreamRef, Error> {
        let mut me = lock(&self.inner);
        let mut timed_out = false;

        loop {
            if let Some(id) = me.incoming.pop_front() {
                return Ok(StreamRef::new(self.inner.clone(), id));
            }

            if let ConnState::Closed(reason) = me.state {
                return Err(reason.into());
            }

            if timed_out {
                return Err(Error::timed_out());
            }

            let cond = me.incoming_cond.clone();
            let (guard, elapsed) = wait_on(&cond, me, deadline);
            me = guard;
            timed_out = elapsed;
        }
    }

    /// Sends a SETTINGS frame; at most one may be awaiting its ACK.
    pub fn write_settings(&self, settings: frame::Settings) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.ensure_open()?;

        if me.send.pending_settings.is_some() {
            return Err(UserError::SendSettingsWhilePending.into());
        }

        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        me.mux.send_frame(buf.freeze())?;
        me.send.pending_settings = Some(settings);
        Ok(())
    }

    /// Sends a PING and waits for the matching ACK.
    pub fn write_ping(&self, payload: PingPayload, deadline: Option<Instant>) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.ensure_open()?;

        if me.pings.contains_key(&payload) {
            return Err(UserError::SendPingWhilePending.into());
        }

        let slot = Arc::new(PingSlot {
            acked: AtomicBool::new(false),
            cond: Condvar::new(),
        });
        me.pings.insert(payload, slot.clone());

        let mut buf = BytesMut::new();
        frame::Ping::new(payload).encode(&mut buf);
        if let Err(e) = me.mux.send_frame(buf.freeze()) {
            me.pings.remove(&payload);
            return Err(e.into());
        }

        let mut timed_out = false;
        loop {
            if slot.acked.load(Ordering::SeqCst) {
                return Ok(());
            }

            if let ConnState::Closed(reason) = me.state {
                return Err(reason.into());
            }

            if timed_out {
                me.pings.remove(&payload);
                return Err(Error::timed_out());
            }

            let (guard, elapsed) = wait_on(&slot.cond, me, deadline);
            me = guard;
            timed_out = elapsed;
        }
    }

    /// Grants flow-control credit on a stream, or on the connection when
    /// `id` is zero. Increments past 2^31-1 are split across frames.
    pub fn write_window_update(&self, id: StreamId, increment: u64) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.ensure_open()?;
        me.send_window_update(id, increment)?;
        Ok(())
    }

    /// Starts connection shutdown: emits GOAWAY with the given reason and
    /// closes every stream.
    pub fn close(&self, reason: Reason) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.handle_conn_error(reason);
        Ok(())
    }

    /// Registers the hook fired whenever the active-stream count returns
    /// to zero.
    pub fn set_idle_hook<F>(&self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut me = lock(&self.inner);
        me.counts.set_idle_hook(Box::new(hook));
    }

    /// The lowest GOAWAY last-stream-id observed from the peer, if any.
    pub fn goaway_horizon(&self) -> Option<StreamId> {
        let me = lock(&self.inner);
        if me.send.max_stream_id == StreamId::MAX {
            None
        } else {
            Some(me.send.max_stream_id)
        }
    }

    /// Connection-level credit we currently hold for sending DATA.
    pub fn peer_flow_credits(&self) -> WindowSize {
        let me = lock(&self.inner);
        me.send.flow.window_size()
    }

    /// Whether any stream is currently active (left idle, not yet
    /// closed).
    pub fn has_active_streams(&self) -> bool {
        let me = lock(&self.inner);
        me.counts.has_streams()
    }

    /// Whether the connection has been torn down, and why.
    pub fn close_reason(&self) -> Option<Reason> {
        let me = lock(&self.inner);
        match me.state {
            ConnState::Open => None,
            ConnState::Closed(reason) => Some(reason),
        }
    }
}

impl Inner {
    pub(crate) fn recv_frame_inner(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        if let ConnState::Closed(_) = self.state {
            tracing::trace!("dropping frame on closed connection; kind={:?}", head.kind());
            return Ok(());
        }

        // While a header block is assembling, only CONTINUATION on the
        // same stream is admissible.
        if let Some(assembly) = self.assembly.as_ref() {
            if head.kind() != Kind::Continuation || head.stream_id() != assembly.stream_id() {
                proto_err!(conn: "expected CONTINUATION for stream {:?}", assembly.stream_id());
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        }

        tracing::trace!(
            "recv_frame; kind={:?}; id={:?}; flags={:#x}",
            head.kind(),
            head.stream_id(),
            head.flag(),
        );

        match head.kind() {
            Kind::Data => self.recv_data(head, payload),
            Kind::Headers => self.recv_headers_frame(head, payload),
            Kind::Priority => self.recv_priority(head, payload),
            Kind::Reset => self.recv_reset(head, payload),
            Kind::Settings => self.recv_settings(head, payload),
            Kind::PushPromise => self.recv_push_promise(head, payload),
            Kind::Ping => self.recv_ping(head, payload),
            Kind::GoAway => self.recv_go_away(head, payload),
            Kind::WindowUpdate => self.recv_window_update(head, payload),
            Kind::Continuation => self.recv_continuation(head, payload),
            Kind::Unknown => {
                tracing::trace!("ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn recv_settings(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let settings = frame::Settings::load(head, &payload)
            .map_err(|e| RecvError::Connection(e.reason()))?;

        if settings.is_ack() {
            tracing::trace!("received settings ACK");
            match self.send.pending_settings.take() {
                Some(local) => self.apply_local_settings(&local),
                None => {
                    tracing::warn!("received SETTINGS ACK with no outstanding settings");
                }
            }
            return Ok(());
        }

        self.apply_remote_settings(&settings)?;

        // ACK emission is best effort.
        let mut buf = BytesMut::new();
        frame::Settings::ack().encode(&mut buf);
        if let Err(e) = self.mux.send_frame(buf.freeze()) {
            tracing::warn!("failed to send SETTINGS ACK; err={:?}", e);
        }

        Ok(())
    }

    fn apply_remote_settings(&mut self, settings: &frame::Settings) -> Result<(), RecvError> {
        tracing::trace!("applying remote settings; {:?}", settings);

        if let Some(val) = settings.header_table_size() {
            // Cap the encoder's dynamic table and announce the change in
            // the next outgoing block.
            self.encoder.set_max_dynamic_table_size(val as usize);
            self.encoder.announce_max_size(val as usize);
        }

        if let Some(enabled) = settings.is_push_enabled() {
            if enabled && self.role.is_client() {
                proto_err!(conn: "server set ENABLE_PUSH");
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
            self.send.is_push_enabled = enabled;
        }

        self.counts.apply_remote_settings(settings);

        if let Some(val) = settings.initial_window_size() {
            // Applies to streams created from here on; live-window
            // recomputation is the embedder's concern.
            self.send.init_window_sz = val;
        }

        if let Some(val) = settings.max_frame_size() {
            self.send.max_frame_size = val;
        }

        Ok(())
    }

    fn apply_local_settings(&mut self, local: &frame::Settings) {
        tracing::trace!("local settings ACKed; {:?}", local);

        if let Some(val) = local.initial_window_size() {
            self.recv.init_window_sz = val;
        }

        if let Some(enabled) = local.is_push_enabled() {
            self.recv.is_push_enabled = enabled;
        }

        if let Some(val) = local.header_table_size() {
            self.decoder.set_max_dynamic_table_size(val as usize);
        }
    }

    fn recv_ping(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let frame =
            frame::Ping::load(head, &payload).map_err(|e| RecvError::Connection(e.reason()))?;

        if frame.is_ack() {
            match self.pings.remove(frame.payload()) {
                Some(slot) => {
                    slot.acked.store(true, Ordering::SeqCst);
                    slot.cond.notify_all();
                }
                None => {
                    tracing::warn!("received PING ack that was never sent; {:?}", frame);
                }
            }
            return Ok(());
        }

        let mut buf = BytesMut::new();
        frame::Ping::pong(frame.into_payload()).encode(&mut buf);
        self.mux.send_frame(buf.freeze())?;
        Ok(())
    }

    fn recv_go_away(&mut self, head: Head, payload: Bytes) -> Result<(), RecvError> {
        let frame =
            frame::GoAway::load(head, &payload).map_err(|e| RecvError::Connection(e.reason()))?;

        tracing::debug!(
            "received GOAWAY; last_stream_id={:?}; reason={:?}",
            frame.last_stream_id(),
            frame.reason(),
        );

        // Track the minimum shutdown horizon observed.
        if frame.last_stream_id() < self.send.max_stream_id {
            self.send.max_stream_id = frame.last_stream_id();
        }

        self.shutdown_cond.notify_all();
        Ok(())
    }

    /// A connection-level error: GOAWAY out, every stream closed, waiters
    /// woken.
    pub(crate) fn handle_conn_error(&mut self, reason: Reason) {
        if let ConnState::Closed(_) = self.state {
            return;
        }

        tracing::debug!("connection error; reason={:?}", reason);

        let mut buf = BytesMut::new();
        frame::GoAway::new(self.recv.last_processed_id, reason).encode(&mut buf);
        if let Err(e) = self.mux.send_frame(buf.freeze()) {
            tracing::debug!("failed to send GOAWAY; err={:?}", e);
        }

        self.state = ConnState::Closed(reason);
        self.assembly = None;
        self.close_streams(reason);
    }

    fn close_streams(&mut self, reason: Reason) {
        let ids = self.store.ids();
        for id in ids {
            if let Some(stream) = self.store.get_mut(id) {
                stream.state.recv_err(reason);
                stream.notify_all();
            }
            self.transition_after(id);
        }

        self.incoming_cond.notify_all();
        self.shutdown_cond.notify_all();
        self.send.credit_cond.notify_all();
        for (_, slot) in self.pings.drain() {
            slot.cond.notify_all();
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        match self.state {
            ConnState::Open => Ok(()),
            ConnState::Closed(reason) => Err(reason.into()),
        }
    }

    pub(crate) fn ensure_open_send(&self) -> Result<(), crate::error::SendError> {
        match self.state {
            ConnState::Open => Ok(()),
            ConnState::Closed(reason) => Err(crate::error::SendError::Connection(reason)),
        }
    }

    pub(crate) fn is_local_init(&self, id: StreamId) -> bool {
        match self.role {
            Role::Client => id.is_client_initiated(),
            Role::Server => id.is_server_initiated(),
        }
    }

    pub(crate) fn insert_stream(&mut self, id: StreamId) {
        let stream = Stream::new(id, self.send.init_window_sz, self.recv.init_window_sz);
        self.store.insert(stream);
        self.tree.insert(id);
    }

    /// Counts a stream that just left `idle`.
    pub(crate) fn mark_active(&mut self, id: StreamId) {
        let local = self.is_local_init(id);

        let newly = match self.store.get_mut(id) {
            Some(stream) if !stream.is_counted => {
                stream.is_counted = true;
                true
            }
            _ => false,
        };

        if newly {
            self.counts.inc_num_streams(local);
        }
    }

    /// Post-transition bookkeeping: when the stream reached `closed`, wake
    /// its waiters, detach it from the priority tree and release its slot
    /// in the active count.
    pub(crate) fn transition_after(&mut self, id: StreamId) {
        let local = self.is_local_init(id);

        let counted = match self.store.get_mut(id) {
            Some(stream) if stream.state.is_closed() => {
                stream.notify_all();
                let counted = stream.is_counted;
                stream.is_counted = false;
                counted
            }
            _ => return,
        };

        self.tree.remove(id);

        if counted {
            tracing::trace!("dec_num_streams; stream={:?}", id);
            self.counts.dec_num_streams(local);
        }
    }
}
