use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use crate::frame::{util, Error, Head, Kind, StreamId};

/// A DATA frame.
///
/// `on_wire_len` preserves the full payload length as it appeared on the
/// wire, including the pad-length octet and the padding. Flow-control
/// accounting always uses this length, never the stripped payload.
#[derive(Eq, PartialEq)]
pub struct Data {
    stream_id: StreamId,
    data: Bytes,
    flags: DataFlags,
    pad_len: Option<u8>,
    on_wire_len: u32,
}

#[derive(Copy, Clone, Default, Eq, PartialEq)]
struct DataFlags(u8);

const END_STREAM: u8 = 0x1;
const PADDED: u8 = 0x8;
const ALL: u8 = END_STREAM | PADDED;

impl Data {
    pub fn new(stream_id: StreamId, payload: Bytes) -> Self {
        assert!(!stream_id.is_zero());

        let on_wire_len = payload.len() as u32;

        Data {
            stream_id,
            data: payload,
            flags: DataFlags::default(),
            pad_len: None,
            on_wire_len,
        }
    }

    pub(crate) fn load(head: Head, mut payload: Bytes) -> Result<Self, Error> {
        let flags = DataFlags::load(head.flag());

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        let on_wire_len = payload.len() as u32;

        let pad_len = if flags.is_padded() {
            let len = util::strip_padding(&mut payload)?;
            Some(len)
        } else {
            None
        };

        Ok(Data {
            stream_id: head.stream_id(),
            data: payload,
            flags,
            pad_len,
            on_wire_len,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn set_end_stream(&mut self, val: bool) {
        if val {
            self.flags.set_end_stream();
        } else {
            self.flags.unset_end_stream();
        }
    }

    /// Length of the payload as framed, including any padding.
    pub fn on_wire_len(&self) -> u32 {
        self.on_wire_len
    }

    pub fn payload(&self) -> &Bytes {
        &self.data
    }

    pub fn into_payload(self) -> Bytes {
        self.data
    }

    fn head(&self) -> Head {
        Head::new(Kind::Data, self.flags.into(), self.stream_id)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.data.len();

        dst.reserve(len + self.head().encode_len());
        self.head().encode(len, dst);
        dst.put_slice(&self.data);
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let mut f = fmt.debug_struct("Data");
        f.field("stream_id", &self.stream_id);
        if !self.flags.is_empty() {
            f.field("flags", &self.flags);
        }
        if let Some(ref pad_len) = self.pad_len {
            f.field("pad_len", pad_len);
        }
        f.finish()
    }
}

impl DataFlags {
    fn load(bits: u8) -> DataFlags {
        DataFlags(bits & ALL)
    }

    fn is_empty(&self) -> bool {
        self.0 == 0
    }

    fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    fn set_end_stream(&mut self) {
        self.0 |= END_STREAM
    }

    fn unset_end_stream(&mut self) {
        self.0 &= !END_STREAM
    }

    fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }
}

impl From<DataFlags> for u8 {
    fn from(src: DataFlags) -> u8 {
        src.0
    }
}

impl fmt::Debug for DataFlags {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_strips_padding_and_keeps_wire_length() {
        let head = Head::new(Kind::Data, PADDED | END_STREAM, 1.into());
        let frame = Data::load(head, Bytes::from_static(&[3, b'h', b'i', 0, 0, 0])).unwrap();

        assert_eq!(&frame.payload()[..], b"hi");
        assert_eq!(frame.on_wire_len(), 6);
        assert!(frame.is_end_stream());
    }

    #[test]
    fn load_rejects_pad_len_equal_to_payload() {
        let head = Head::new(Kind::Data, PADDED, 1.into());
        let err = Data::load(head, Bytes::from_static(&[5, 0, 0, 0, 0])).unwrap_err();
        assert_eq!(err, Error::TooMuchPadding);
    }

    #[test]
    fn load_rejects_stream_zero() {
        let head = Head::new(Kind::Data, 0, StreamId::zero());
        let err = Data::load(head, Bytes::from_static(b"x")).unwrap_err();
        assert_eq!(err, Error::InvalidStreamId);
    }
}
