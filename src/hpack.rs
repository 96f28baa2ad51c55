//! The header-compression collaborator contract.
//!
//! The protocol core treats HPACK as an opaque service: an encoder turns a
//! field list into a header-block fragment, a decoder turns a complete
//! block back into fields. Both contexts are stateful across blocks and
//! must only be driven from the connection's executor; the connection
//! keeps them behind its lock.

use bytes::{Bytes, BytesMut};
use std::fmt;

/// Stateful header-block encoder.
pub trait Encoder {
    /// Appends the encoded representation of `headers` to `dst`, in order.
    fn encode(&mut self, headers: &mut dyn Iterator<Item = (Bytes, Bytes)>, dst: &mut BytesMut);

    /// Caps the encoder's dynamic table.
    fn set_max_dynamic_table_size(&mut self, size: usize);

    /// Schedules an explicit dynamic-table size update to be emitted at
    /// the start of the next encoded block.
    fn announce_max_size(&mut self, size: usize);
}

/// Stateful header-block decoder.
pub trait Decoder {
    /// Decodes a complete header block, returning the decoded fields and
    /// the number of octets consumed. The caller treats a short consume as
    /// a compression error.
    fn decode(&mut self, src: &[u8]) -> Result<(Vec<(Bytes, Bytes)>, usize), DecoderError>;

    /// Caps the decoder's dynamic table.
    fn set_max_dynamic_table_size(&mut self, size: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderError {
    /// The block contains an octet sequence the decoder cannot interpret.
    InvalidRepresentation,

    /// The block ends mid-field.
    UnexpectedEndOfBlock,
}

impl fmt::Display for DecoderError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DecoderError::InvalidRepresentation => fmt.write_str("invalid field representation"),
            DecoderError::UnexpectedEndOfBlock => fmt.write_str("header block ends mid-field"),
        }
    }
}

impl std::error::Error for DecoderError {}

/// A non-compressing codec: each field is framed as two length-prefixed
/// octet strings. Useful for tests and loopback wiring; real endpoints
/// plug in an actual HPACK implementation.
#[derive(Debug, Default)]
pub struct PlainCodec;

impl PlainCodec {
    pub fn new() -> PlainCodec {
        PlainCodec
    }
}

impl Encoder for PlainCodec {
    fn encode(&mut self, headers: &mut dyn Iterator<Item = (Bytes, Bytes)>, dst: &mut BytesMut) {
        use bytes::BufMut;

        for (name, value) in headers {
            debug_assert!(name.len() <= u16::MAX as usize);
            debug_assert!(value.len() <= u16::MAX as usize);

            dst.put_u16(name.len() as u16);
            dst.put_slice(&name);
            dst.put_u16(value.len() as u16);
            dst.put_slice(&value);
        }
    }

    fn set_max_dynamic_table_size(&mut self, _size: usize) {}

    fn announce_max_size(&mut self, _size: usize) {}
}

impl Decoder for PlainCodec {
    fn decode(&mut self, src: &[u8]) -> Result<(Vec<(Bytes, Bytes)>, usize), DecoderError> {
        fn take<'a>(src: &'a [u8], pos: &mut usize) -> Result<&'a [u8], DecoderError> {
            if src.len() - *pos < 2 {
                return Err(DecoderError::UnexpectedEndOfBlock);
            }
            let len = ((src[*pos] as usize) << 8) | src[*pos + 1] as usize;
            *pos += 2;

            if src.len() - *pos < len {
                return Err(DecoderError::UnexpectedEndOfBlock);
            }
            let out = &src[*pos..*pos + len];
            *pos += len;
            Ok(out)
        }

        let mut fields = Vec::new();
        let mut pos = 0;

        while pos < src.len() {
            let name = Bytes::copy_from_slice(take(src, &mut pos)?);
            let value = Bytes::copy_from_slice(take(src, &mut pos)?);
            fields.push((name, value));
        }

        Ok((fields, pos))
    }

    fn set_max_dynamic_table_size(&mut self, _size: usize) {}
}
