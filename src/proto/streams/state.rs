use crate::error::{RecvError, UserError};
use crate::frame::Reason;

use self::Inner::*;

/// The state of a single stream, per section 5.1 of RFC 7540.
///
/// States carry an integer rank (idle=1, open and both reserved states=2,
/// half-closed=3, closed=4) and every transition must be rank
/// non-decreasing; a regression is a programming error and panics.
#[derive(Debug, Clone, Copy)]
pub struct State {
    inner: Inner,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed(Cause),
}

#[derive(Debug, Clone, Copy)]
enum Cause {
    EndStream,
    Proto(Reason),
    LocallyReset(Reason),
}

fn rank(inner: Inner) -> u8 {
    match inner {
        Idle => 1,
        ReservedLocal | ReservedRemote | Open => 2,
        HalfClosedLocal | HalfClosedRemote => 3,
        Closed(_) => 4,
    }
}

impl State {
    fn set(&mut self, next: Inner) {
        assert!(
            rank(next) >= rank(self.inner),
            "stream state regression: {:?} -> {:?}",
            self.inner,
            next,
        );
        self.inner = next;
    }

    /// The local endpoint sends a header block. Returns true when the
    /// stream leaves `idle` (the transition that counts it active).
    pub fn send_open(&mut self, eos: bool) -> Result<bool, UserError> {
        let initial = matches!(self.inner, Idle);

        let next = match self.inner {
            Idle => {
                if eos {
                    HalfClosedLocal
                } else {
                    Open
                }
            }
            ReservedLocal => {
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedRemote
                }
            }
            Open => {
                if eos {
                    HalfClosedLocal
                } else {
                    Open
                }
            }
            HalfClosedRemote => {
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedRemote
                }
            }
            _ => {
                return Err(UserError::UnexpectedFrameType);
            }
        };

        self.set(next);
        Ok(initial)
    }

    /// The remote endpoint's header block completed. Returns true when the
    /// stream leaves `idle`.
    pub fn recv_open(&mut self, eos: bool) -> Result<bool, RecvError> {
        let initial = matches!(self.inner, Idle);

        let next = match self.inner {
            Idle => {
                if eos {
                    HalfClosedRemote
                } else {
                    Open
                }
            }
            ReservedRemote => {
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedLocal
                }
            }
            Open => {
                if eos {
                    HalfClosedRemote
                } else {
                    Open
                }
            }
            HalfClosedLocal => {
                if eos {
                    Closed(Cause::EndStream)
                } else {
                    HalfClosedLocal
                }
            }
            state => {
                proto_err!(conn: "recv_open: in unexpected state {:?}", state);
                return Err(RecvError::Connection(Reason::PROTOCOL_ERROR));
            }
        };

        self.set(next);
        Ok(initial)
    }

    pub fn reserve_remote(&mut self) -> Result<(), RecvError> {
        match self.inner {
            Idle => {
                self.set(ReservedRemote);
                Ok(())
            }
            state => {
                proto_err!(conn: "reserve_remote: in unexpected state {:?}", state);
                Err(RecvError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    pub fn reserve_local(&mut self) -> Result<(), UserError> {
        match self.inner {
            Idle => {
                self.set(ReservedLocal);
                Ok(())
            }
            _ => Err(UserError::UnexpectedFrameType),
        }
    }

    /// END_STREAM observed on the receive direction.
    pub fn recv_close(&mut self) -> Result<(), RecvError> {
        match self.inner {
            Open => {
                tracing::trace!("recv_close: Open => HalfClosedRemote");
                self.set(HalfClosedRemote);
                Ok(())
            }
            HalfClosedLocal => {
                tracing::trace!("recv_close: HalfClosedLocal => Closed");
                self.set(Closed(Cause::EndStream));
                Ok(())
            }
            state => {
                proto_err!(conn: "recv_close: in unexpected state {:?}", state);
                Err(RecvError::Connection(Reason::PROTOCOL_ERROR))
            }
        }
    }

    /// END_STREAM sent on the send direction.
    pub fn send_close(&mut self) {
        match self.inner {
            Open => {
                tracing::trace!("send_close: Open => HalfClosedLocal");
                self.set(HalfClosedLocal);
            }
            HalfClosedRemote => {
                tracing::trace!("send_close: HalfClosedRemote => Closed");
                self.set(Closed(Cause::EndStream));
            }
            state => panic!("send_close: unexpected state {:?}", state),
        }
    }

    /// A RST_STREAM arrived; already-closed streams keep their first cause.
    pub fn recv_reset(&mut self, reason: Reason) {
        match self.inner {
            Closed(..) => {}
            state => {
                tracing::trace!("recv_reset; reason={:?}; state={:?}", reason, state);
                self.set(Closed(Cause::Proto(reason)));
            }
        }
    }

    /// The local endpoint reset the stream.
    pub fn set_reset(&mut self, reason: Reason) {
        match self.inner {
            Closed(..) => {}
            _ => self.set(Closed(Cause::LocallyReset(reason))),
        }
    }

    /// The connection is going down; fold the reason into every stream.
    pub fn recv_err(&mut self, reason: Reason) {
        match self.inner {
            Closed(..) => {}
            state => {
                tracing::trace!("recv_err; reason={:?}; state={:?}", reason, state);
                self.set(Closed(Cause::LocallyReset(reason)));
            }
        }
    }

    /// The stored RST_STREAM code, when the stream closed abnormally.
    pub fn reset_reason(&self) -> Option<Reason> {
        match self.inner {
            Closed(Cause::Proto(reason)) | Closed(Cause::LocallyReset(reason)) => Some(reason),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.inner, Idle)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.inner, Closed(_))
    }

    /// No further frames will arrive on the receive direction.
    pub fn is_recv_closed(&self) -> bool {
        matches!(self.inner, Closed(..) | HalfClosedRemote | ReservedLocal)
    }

    /// DATA is admissible from the peer in this state.
    pub fn is_recv_streaming(&self) -> bool {
        matches!(self.inner, Open | HalfClosedLocal)
    }

    /// DATA may be sent by the local endpoint in this state.
    pub fn is_send_streaming(&self) -> bool {
        matches!(self.inner, Open | HalfClosedRemote)
    }

    pub fn is_reserved_remote(&self) -> bool {
        matches!(self.inner, ReservedRemote)
    }

    pub fn is_reserved_local(&self) -> bool {
        matches!(self.inner, ReservedLocal)
    }
}

impl Default for State {
    fn default() -> State {
        State { inner: Inner::Idle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_response_lifecycle() {
        // Server side of a simple request: HEADERS w/ END_STREAM in,
        // HEADERS out, DATA w/ END_STREAM out.
        let mut state = State::default();
        assert!(state.recv_open(true).unwrap());
        assert!(state.is_recv_closed());

        assert!(!state.send_open(false).unwrap());
        state.send_close();
        assert!(state.is_closed());
        assert_eq!(state.reset_reason(), None);
    }

    #[test]
    fn reserved_local_lifecycle() {
        let mut state = State::default();
        state.reserve_local().unwrap();
        assert!(!state.send_open(false).unwrap());
        assert!(state.is_send_streaming());
        state.send_close();
        assert!(state.is_closed());
    }

    #[test]
    fn reserved_remote_lifecycle() {
        let mut state = State::default();
        state.reserve_remote().unwrap();
        assert!(!state.recv_open(false).unwrap());
        assert!(state.is_recv_streaming());
        state.recv_close().unwrap();
        assert!(state.is_closed());
    }

    #[test]
    fn reset_is_sticky() {
        let mut state = State::default();
        state.recv_open(false).unwrap();
        state.recv_reset(Reason::CANCEL);
        assert_eq!(state.reset_reason(), Some(Reason::CANCEL));

        // A second reset does not overwrite the stored cause.
        state.recv_reset(Reason::PROTOCOL_ERROR);
        assert_eq!(state.reset_reason(), Some(Reason::CANCEL));
    }

    #[test]
    fn data_not_admissible_after_recv_close() {
        let mut state = State::default();
        state.recv_open(true).unwrap();
        assert!(!state.is_recv_streaming());
    }

    #[test]
    fn recv_open_after_close_is_protocol_error() {
        let mut state = State::default();
        state.recv_open(true).unwrap();
        state.send_open(true).unwrap();
        assert!(state.is_closed());
        assert!(state.recv_open(false).is_err());
    }
}
