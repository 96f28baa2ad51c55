use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;

use crate::error::{Error, UserError};
use crate::frame::{self, HeaderBlock, Pseudo, Reason, StreamId, StreamDependency};
use crate::proto::streams::{Chunk, ChunkItem, SendData, StreamStats};
use crate::proto::{lock, wait_on, Inner};

/// A handle to one stream of a connection.
///
/// Handles are cheap to clone and may be moved to other threads; every
/// operation locks the owning connection. Waiting calls accept an
/// optional absolute deadline and return a timeout error when it elapses
/// without touching the stream's queues.
pub struct StreamRef {
    inner: Arc<Mutex<Inner>>,
    id: StreamId,
}

impl StreamRef {
    pub(crate) fn new(inner: Arc<Mutex<Inner>>, id: StreamId) -> StreamRef {
        StreamRef { inner, id }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// The stream-level credit we currently hold for sending DATA.
    pub fn peer_flow_credits(&self) -> Result<u32, Error> {
        let me = lock(&self.inner);
        me.store
            .get(self.id)
            .map(|stream| stream.send_flow.window_size())
            .ok_or_else(|| UserError::InactiveStreamId.into())
    }

    /// The stream's cumulative counters.
    pub fn stats(&self) -> Result<StreamStats, Error> {
        let me = lock(&self.inner);
        me.store
            .get(self.id)
            .map(|stream| stream.stats())
            .ok_or_else(|| UserError::InactiveStreamId.into())
    }

    /// Sends a header block, opening the stream when it is idle.
    pub fn write_headers(&self, block: HeaderBlock, end_stream: bool) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.send_headers(self.id, &block, end_stream)?;
        Ok(())
    }

    /// Sends a trailer block; trailers always carry END_STREAM.
    pub fn write_trailers(&self, fields: HeaderMap) -> Result<(), Error> {
        let block = HeaderBlock::new(Pseudo::default(), fields);
        self.write_headers(block, true)
    }

    /// Reserves a pushed stream carrying the promised request headers.
    /// Push mechanics only; whether to push is the application's call.
    pub fn write_push_promise(&self, block: HeaderBlock) -> Result<StreamRef, Error> {
        let mut me = lock(&self.inner);
        let promised_id = me.send_push_promise(self.id, &block)?;
        Ok(StreamRef::new(self.inner.clone(), promised_id))
    }

    /// Streams `payload` as DATA frames, suspending while stream or
    /// connection credit is exhausted. Frames never exceed the peer's
    /// SETTINGS_MAX_FRAME_SIZE; only the final frame carries END_STREAM.
    ///
    /// On deadline elapse the write stops cleanly: credit is only charged
    /// for octets already framed, and the remainder is simply not sent.
    pub fn write_chunk(
        &self,
        payload: Bytes,
        end_stream: bool,
        deadline: Option<Instant>,
    ) -> Result<(), Error> {
        let mut payload = payload;
        let mut me = lock(&self.inner);
        let mut timed_out = false;

        loop {
            me.ensure_open_send().map_err(Error::from)?;

            if let Some(stream) = me.store.get(self.id) {
                if let Some(reason) = stream.state.reset_reason() {
                    return Err(Error::reset(reason));
                }
            }

            let blocked = match me.send_data_frame(self.id, &mut payload, end_stream)? {
                SendData::Done => return Ok(()),
                SendData::Progress => continue,
                SendData::BlockedOnStream => true,
                SendData::BlockedOnConnection => false,
            };

            if timed_out {
                return Err(Error::timed_out());
            }

            let cond = if blocked {
                match me.store.get(self.id) {
                    Some(stream) => stream.credit_cond.clone(),
                    None => return Err(UserError::InactiveStreamId.into()),
                }
            } else {
                me.send.credit_cond.clone()
            };

            let (guard, elapsed) = wait_on(&cond, me, deadline);
            me = guard;
            timed_out = elapsed;
        }
    }

    /// Declares this stream's dependency and weight (1..=256) to the peer.
    pub fn write_priority(
        &self,
        dependency_id: StreamId,
        weight: u16,
        exclusive: bool,
    ) -> Result<(), Error> {
        assert!((1..=256).contains(&weight), "weight out of range");

        if dependency_id == self.id {
            return Err(UserError::UnexpectedFrameType.into());
        }

        let mut me = lock(&self.inner);
        me.ensure_open_send().map_err(Error::from)?;

        let dep = StreamDependency::new(dependency_id, (weight - 1) as u8, exclusive);
        let mut buf = BytesMut::new();
        frame::Priority::new(self.id, dep).encode(&mut buf);
        me.mux.send_frame(buf.freeze())?;

        me.tree
            .reprioritize(self.id, dependency_id, exclusive, weight);
        Ok(())
    }

    /// Resets the stream with `reason`.
    pub fn write_reset(&self, reason: Reason) -> Result<(), Error> {
        let mut me = lock(&self.inner);

        match me.store.get(self.id) {
            None => return Err(UserError::InactiveStreamId.into()),
            Some(stream) => {
                if stream.state.is_closed() {
                    return Ok(());
                }
                if stream.state.is_idle() {
                    return Err(UserError::UnexpectedFrameType.into());
                }
            }
        }

        me.send_reset(self.id, reason);
        Ok(())
    }

    /// Tears the stream down: RST_STREAM with code zero (errors ignored),
    /// receive queue drained without per-stream window updates, freed
    /// window returned to the connection in one aggregate update.
    pub fn shutdown(&self) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        me.shutdown_stream(self.id);
        Ok(())
    }

    /// Waits for the next received header block (headers, then possibly
    /// trailers). Returns `None` once the receive direction is cleanly
    /// closed; a stream reset surfaces the stored RST_STREAM error.
    pub fn get_headers(&self, deadline: Option<Instant>) -> Result<Option<HeaderBlock>, Error> {
        let mut me = lock(&self.inner);
        let mut timed_out = false;

        loop {
            let cond = {
                let stream = me
                    .store
                    .get_mut(self.id)
                    .ok_or(Error::from(UserError::InactiveStreamId))?;

                if let Some(block) = stream.pending_headers.pop_front() {
                    return Ok(Some(block));
                }

                if let Some(reason) = stream.state.reset_reason() {
                    return Err(Error::reset(reason));
                }

                if stream.state.is_recv_closed() {
                    return Ok(None);
                }

                if timed_out {
                    return Err(Error::timed_out());
                }

                stream.headers_cond.clone()
            };

            let (guard, elapsed) = wait_on(&cond, me, deadline);
            me = guard;
            timed_out = elapsed;
        }
    }

    /// Waits for the next received DATA chunk. Returns `None` at
    /// end-of-stream. Delivering a chunk acks it: a window update equal to
    /// its on-wire length goes out on both the stream and the connection,
    /// exactly once per chunk.
    pub fn get_next_chunk(&self, deadline: Option<Instant>) -> Result<Option<Bytes>, Error> {
        let mut me = lock(&self.inner);
        let mut timed_out = false;

        loop {
            enum Step {
                Deliver(Bytes, u32),
                Eos,
                Wait(Arc<Condvar>),
                Reset(Reason),
                TimedOut,
            }

            let step = {
                let stream = me
                    .store
                    .get_mut(self.id)
                    .ok_or(Error::from(UserError::InactiveStreamId))?;

                match stream.pending_chunks.pop_front() {
                    Some(ChunkItem::Data(mut chunk)) => {
                        let increment = chunk.ack();
                        Step::Deliver(chunk.into_payload(), increment)
                    }
                    Some(ChunkItem::EndOfStream) => Step::Eos,
                    None => {
                        if let Some(reason) = stream.state.reset_reason() {
                            Step::Reset(reason)
                        } else if stream.state.is_recv_closed() {
                            Step::Eos
                        } else if timed_out {
                            Step::TimedOut
                        } else {
                            Step::Wait(stream.chunks_cond.clone())
                        }
                    }
                }
            };

            match step {
                Step::Deliver(payload, increment) => {
                    if increment > 0 {
                        me.send_window_update(self.id, increment as u64)?;
                        me.send_window_update(StreamId::ZERO, increment as u64)?;
                    }
                    return Ok(Some(payload));
                }
                Step::Eos => return Ok(None),
                Step::Reset(reason) => return Err(Error::reset(reason)),
                Step::TimedOut => return Err(Error::timed_out()),
                Step::Wait(cond) => {
                    let (guard, elapsed) = wait_on(&cond, me, deadline);
                    me = guard;
                    timed_out = elapsed;
                }
            }
        }
    }

    /// Pushes unconsumed bytes back to the front of the chunk queue as a
    /// pseudo-chunk of zero on-wire length, so its ack is a no-op.
    pub fn unget(&self, bytes: Bytes) -> Result<(), Error> {
        let mut me = lock(&self.inner);
        let stream = me
            .store
            .get_mut(self.id)
            .ok_or(Error::from(UserError::InactiveStreamId))?;

        stream
            .pending_chunks
            .push_front(ChunkItem::Data(Chunk::pseudo(bytes)));
        Ok(())
    }
}

impl Clone for StreamRef {
    fn clone(&self) -> StreamRef {
        StreamRef {
            inner: self.inner.clone(),
            id: self.id,
        }
    }
}

impl fmt::Debug for StreamRef {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("StreamRef").field("id", &self.id).finish()
    }
}
