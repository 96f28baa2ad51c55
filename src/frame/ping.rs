use bytes::{BufMut, BytesMut};

use crate::frame::{Error, Head, Kind, StreamId};

pub type Payload = [u8; 8];

/// A PING frame: measures round-trip time or keeps a connection alive.
///
/// The 8-octet opaque payload identifies the ping; an ACK must echo it
/// unchanged.
#[derive(Debug, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: Payload,
}

const ACK_FLAG: u8 = 0x1;

impl Ping {
    pub fn new(payload: Payload) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: Payload) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    pub fn load(head: Head, bytes: &[u8]) -> Result<Ping, Error> {
        debug_assert_eq!(head.kind(), Kind::Ping);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if bytes.len() != 8 {
            return Err(Error::BadFrameSize);
        }

        let mut payload = [0; 8];
        payload.copy_from_slice(bytes);

        let ack = head.flag() & ACK_FLAG != 0;

        Ok(Ping { ack, payload })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let flags = if self.ack { ACK_FLAG } else { 0 };
        let head = Head::new(Kind::Ping, flags, StreamId::zero());

        dst.reserve(head.encode_len() + 8);
        head.encode(8, dst);
        dst.put_slice(&self.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_echoes_payload() {
        let payload = *b"8bytes!!";
        let ping = Ping::new(payload);
        let pong = Ping::pong(ping.into_payload());

        assert!(pong.is_ack());
        assert_eq!(pong.payload(), &payload);
    }

    #[test]
    fn load_rejects_short_payload() {
        let head = Head::new(Kind::Ping, 0, StreamId::zero());
        assert_eq!(Ping::load(head, &[0; 7]), Err(Error::BadFrameSize));
    }

    #[test]
    fn load_rejects_nonzero_stream() {
        let head = Head::new(Kind::Ping, 0, 1.into());
        assert_eq!(Ping::load(head, &[0; 8]), Err(Error::InvalidStreamId));
    }
}
