use bytes::{BufMut, BytesMut};

use crate::frame::{Error, Head, Kind, StreamId};

const SIZE_INCREMENT_MASK: u32 = 1 << 31;

/// A WINDOW_UPDATE frame: grants flow-control credit on one stream, or on
/// the connection when the stream id is zero.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WindowUpdate {
    stream_id: StreamId,
    size_increment: u32,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, size_increment: u32) -> WindowUpdate {
        debug_assert!(size_increment & SIZE_INCREMENT_MASK == 0);
        WindowUpdate {
            stream_id,
            size_increment,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn size_increment(&self) -> u32 {
        self.size_increment
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, Error> {
        debug_assert_eq!(head.kind(), Kind::WindowUpdate);
        if payload.len() != 4 {
            return Err(Error::BadFrameSize);
        }

        // The top bit is reserved; receivers ignore it.
        let size_increment = unpack_octets_4!(payload, 0, u32) & !SIZE_INCREMENT_MASK;

        if size_increment == 0 {
            return Err(Error::InvalidWindowUpdateValue);
        }

        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            size_increment,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        tracing::trace!("encoding WINDOW_UPDATE; id={:?}", self.stream_id);
        let head = Head::new(Kind::WindowUpdate, 0, self.stream_id);
        dst.reserve(head.encode_len() + 4);
        head.encode(4, dst);
        dst.put_u32(self.size_increment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_zero_increment() {
        let head = Head::new(Kind::WindowUpdate, 0, 1.into());
        assert_eq!(
            WindowUpdate::load(head, &[0; 4]),
            Err(Error::InvalidWindowUpdateValue)
        );
    }

    #[test]
    fn load_masks_reserved_bit() {
        let head = Head::new(Kind::WindowUpdate, 0, 1.into());
        let frame = WindowUpdate::load(head, &[0x80, 0, 0, 1]).unwrap();
        assert_eq!(frame.size_increment(), 1);
    }

    #[test]
    fn load_rejects_wrong_size() {
        let head = Head::new(Kind::WindowUpdate, 0, 1.into());
        assert_eq!(WindowUpdate::load(head, &[0; 3]), Err(Error::BadFrameSize));
    }
}
