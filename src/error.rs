use std::{error, fmt, io};

use crate::frame::{Reason, StreamId};

/// Errors raised while processing a received frame.
///
/// The variant is the severity: a `Stream` error resets one stream and the
/// connection continues, a `Connection` error tears the connection down
/// via GOAWAY.
#[derive(Debug)]
pub enum RecvError {
    Connection(Reason),
    Stream { id: StreamId, reason: Reason },
    Io(io::Error),
}

/// Errors raised on the write path.
#[derive(Debug)]
pub enum SendError {
    User(UserError),
    Connection(Reason),
    Io(io::Error),
}

/// Errors caused by the local application misusing the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserError {
    /// The referenced stream is unknown or already released.
    InactiveStreamId,

    /// The operation is not legal in the stream's current state.
    UnexpectedFrameType,

    /// The stream cannot be opened: concurrency limit or GOAWAY horizon.
    Rejected,

    /// The stream ID space is exhausted.
    OverflowedStreamId,

    /// The header list carries connection-specific headers.
    MalformedHeaders,

    /// A ping with the same opaque payload is still in flight.
    SendPingWhilePending,

    /// A local SETTINGS frame is still awaiting its ACK.
    SendSettingsWhilePending,

    /// The peer disabled server push.
    PeerDisabledServerPush,
}

/// The error type surfaced by the public API.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    /// A connection-level protocol error, local or remote.
    Proto(Reason),

    /// The stream was reset; carries the stored RST_STREAM code.
    Reset(Reason),

    User(UserError),

    /// A waiter's deadline elapsed.
    TimedOut,

    Io(io::Error),
}

impl Error {
    pub(crate) fn timed_out() -> Error {
        Error {
            kind: Kind::TimedOut,
        }
    }

    pub(crate) fn reset(reason: Reason) -> Error {
        Error {
            kind: Kind::Reset(reason),
        }
    }

    /// The HTTP/2 error code, for protocol and reset errors.
    pub fn reason(&self) -> Option<Reason> {
        match self.kind {
            Kind::Proto(reason) | Kind::Reset(reason) => Some(reason),
            _ => None,
        }
    }

    /// True if the stream was closed by a RST_STREAM.
    pub fn is_reset(&self) -> bool {
        matches!(self.kind, Kind::Reset(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, Kind::TimedOut)
    }

    pub fn is_io(&self) -> bool {
        matches!(self.kind, Kind::Io(_))
    }

    pub fn user_error(&self) -> Option<UserError> {
        match self.kind {
            Kind::User(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Reason> for Error {
    fn from(src: Reason) -> Error {
        Error {
            kind: Kind::Proto(src),
        }
    }
}

impl From<UserError> for Error {
    fn from(src: UserError) -> Error {
        Error {
            kind: Kind::User(src),
        }
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        Error {
            kind: Kind::Io(src),
        }
    }
}

impl From<SendError> for Error {
    fn from(src: SendError) -> Error {
        match src {
            SendError::User(e) => e.into(),
            SendError::Connection(reason) => reason.into(),
            SendError::Io(e) => e.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::Kind::*;

        match self.kind {
            Proto(ref reason) => write!(fmt, "protocol error: {}", reason),
            Reset(ref reason) => write!(fmt, "stream reset: {}", reason),
            User(ref e) => write!(fmt, "user error: {}", e),
            TimedOut => fmt.write_str("deadline elapsed"),
            Io(ref e) => fmt::Display::fmt(e, fmt),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for RecvError {
    fn from(src: io::Error) -> Self {
        RecvError::Io(src)
    }
}

impl error::Error for RecvError {}

impl fmt::Display for RecvError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::RecvError::*;

        match *self {
            Connection(ref reason) => reason.fmt(fmt),
            Stream { ref reason, .. } => reason.fmt(fmt),
            Io(ref e) => e.fmt(fmt),
        }
    }
}

impl error::Error for SendError {}

impl fmt::Display for SendError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::SendError::*;

        match *self {
            User(ref e) => e.fmt(fmt),
            Connection(ref reason) => reason.fmt(fmt),
            Io(ref e) => e.fmt(fmt),
        }
    }
}

impl From<io::Error> for SendError {
    fn from(src: io::Error) -> Self {
        SendError::Io(src)
    }
}

impl From<UserError> for SendError {
    fn from(src: UserError) -> Self {
        SendError::User(src)
    }
}

impl error::Error for UserError {}

impl fmt::Display for UserError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        use self::UserError::*;

        fmt.write_str(match *self {
            InactiveStreamId => "inactive stream",
            UnexpectedFrameType => "unexpected frame type",
            Rejected => "stream cannot be opened",
            OverflowedStreamId => "stream ID overflowed",
            MalformedHeaders => "malformed headers",
            SendPingWhilePending => "send_ping before received previous pong",
            SendSettingsWhilePending => "sending SETTINGS before received previous ACK",
            PeerDisabledServerPush => "sending PUSH_PROMISE to peer who disabled server push",
        })
    }
}
