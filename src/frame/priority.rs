use bytes::{BufMut, BytesMut};

use crate::frame::{Error, Head, Kind, StreamId};

/// A PRIORITY frame: re-declares the dependency of `stream_id`.
#[derive(Debug, Eq, PartialEq)]
pub struct Priority {
    stream_id: StreamId,
    dependency: StreamDependency,
}

/// The 5-octet priority block carried by PRIORITY frames and by HEADERS
/// frames with the PRIORITY flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StreamDependency {
    /// The ID of the stream dependency target
    dependency_id: StreamId,

    /// The weight for the stream, on the wire scale (actual weight minus
    /// one, so 0..=255 encodes 1..=256)
    weight: u8,

    /// True if the stream dependency is exclusive.
    is_exclusive: bool,
}

impl Priority {
    pub fn new(stream_id: StreamId, dependency: StreamDependency) -> Self {
        Priority {
            stream_id,
            dependency,
        }
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Self, Error> {
        if payload.len() != 5 {
            return Err(Error::BadFrameSize);
        }

        let dependency = StreamDependency::load(payload)?;

        if dependency.dependency_id() == head.stream_id() {
            return Err(Error::InvalidDependencyId);
        }

        Ok(Priority {
            stream_id: head.stream_id(),
            dependency,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn dependency(&self) -> &StreamDependency {
        &self.dependency
    }

    fn head(&self) -> Head {
        Head::new(Kind::Priority, 0, self.stream_id)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let head = self.head();
        dst.reserve(head.encode_len() + 5);
        head.encode(5, dst);
        self.dependency.encode(dst);
    }
}

impl StreamDependency {
    pub fn new(dependency_id: StreamId, weight: u8, is_exclusive: bool) -> Self {
        StreamDependency {
            dependency_id,
            weight,
            is_exclusive,
        }
    }

    pub fn load(src: &[u8]) -> Result<Self, Error> {
        if src.len() != 5 {
            return Err(Error::BadFrameSize);
        }

        let (dependency_id, is_exclusive) = StreamId::parse(src);
        let weight = src[4];

        Ok(StreamDependency::new(dependency_id, weight, is_exclusive))
    }

    pub fn dependency_id(&self) -> StreamId {
        self.dependency_id
    }

    /// The declared weight, on the protocol scale of 1..=256.
    pub fn weight(&self) -> u16 {
        self.weight as u16 + 1
    }

    pub fn is_exclusive(&self) -> bool {
        self.is_exclusive
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        let mut id: u32 = self.dependency_id.into();
        if self.is_exclusive {
            id |= 1 << 31;
        }
        dst.put_u32(id);
        dst.put_u8(self.weight);
    }
}
