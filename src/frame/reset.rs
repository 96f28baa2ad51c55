use bytes::{BufMut, BytesMut};

use crate::frame::{Error, Head, Kind, Reason, StreamId};

/// A RST_STREAM frame: abruptly terminates a single stream.
#[derive(Debug, Eq, PartialEq)]
pub struct Reset {
    stream_id: StreamId,
    error_code: Reason,
}

impl Reset {
    pub fn new(stream_id: StreamId, error: Reason) -> Reset {
        Reset {
            stream_id,
            error_code: error,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn reason(&self) -> Reason {
        self.error_code
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Reset, Error> {
        if payload.len() != 4 {
            return Err(Error::BadFrameSize);
        }

        let error_code = unpack_octets_4!(payload, 0, u32);

        // Unknown codes are stored as INTERNAL_ERROR.
        Ok(Reset {
            stream_id: head.stream_id(),
            error_code: Reason::load(error_code),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        tracing::trace!("encoding RESET; id={:?} code={:?}", self.stream_id, self.error_code);
        let head = Head::new(Kind::Reset, 0, self.stream_id);
        dst.reserve(head.encode_len() + 4);
        head.encode(4, dst);
        dst.put_u32(self.error_code.into());
    }
}
