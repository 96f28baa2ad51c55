use bytes::{Bytes, BytesMut};

use crate::frame::{self, util, StreamId};
use crate::hpack;
use crate::proto::MAX_HEADER_BUFFER_SIZE;

/// An in-progress header block: a HEADERS or PUSH_PROMISE frame without
/// END_HEADERS, plus the CONTINUATION frames that follow it.
///
/// The accumulator holds the raw fragments past the flags-dependent prefix
/// octets; the padding declared by the first fragment stays in place and
/// is stripped (and zero-verified) only once the block is complete, so the
/// guarded length is the pre-strip payload total.
#[derive(Debug)]
pub(crate) struct Assembly {
    stream_id: StreamId,
    kind: AssemblyKind,
    buf: BytesMut,
    pad_len: u8,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AssemblyKind {
    Headers { end_stream: bool },
    PushPromise { promised_id: StreamId },
}

impl Assembly {
    pub fn headers(frame: &frame::Headers, fragment: Bytes) -> Result<Assembly, frame::Error> {
        Assembly::start(
            frame.stream_id(),
            AssemblyKind::Headers {
                end_stream: frame.is_end_stream(),
            },
            frame.pad_len(),
            fragment,
        )
    }

    pub fn push_promise(
        frame: &frame::PushPromise,
        fragment: Bytes,
    ) -> Result<Assembly, frame::Error> {
        Assembly::start(
            frame.stream_id(),
            AssemblyKind::PushPromise {
                promised_id: frame.promised_id(),
            },
            frame.pad_len(),
            fragment,
        )
    }

    fn start(
        stream_id: StreamId,
        kind: AssemblyKind,
        pad_len: u8,
        fragment: Bytes,
    ) -> Result<Assembly, frame::Error> {
        if fragment.len() > MAX_HEADER_BUFFER_SIZE {
            tracing::debug!("header block exceeds assembly buffer; stream={:?}", stream_id);
            return Err(frame::Error::HeaderBlockTooBig);
        }

        let mut buf = BytesMut::with_capacity(fragment.len());
        buf.extend_from_slice(&fragment);

        Ok(Assembly {
            stream_id,
            kind,
            buf,
            pad_len,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn kind(&self) -> AssemblyKind {
        self.kind
    }

    /// Appends a CONTINUATION fragment.
    pub fn append(&mut self, fragment: &[u8]) -> Result<(), frame::Error> {
        if self.buf.len() + fragment.len() > MAX_HEADER_BUFFER_SIZE {
            tracing::debug!(
                "header block exceeds assembly buffer; stream={:?}; len={}",
                self.stream_id,
                self.buf.len() + fragment.len(),
            );
            return Err(frame::Error::HeaderBlockTooBig);
        }

        self.buf.extend_from_slice(fragment);
        Ok(())
    }

    /// END_HEADERS observed: strip the padding, then run the block through
    /// the decoder, which must consume it exactly.
    pub fn complete(
        self,
        decoder: &mut dyn hpack::Decoder,
    ) -> Result<Vec<(Bytes, Bytes)>, frame::Error> {
        let mut buf = self.buf;
        let pad_len = self.pad_len as usize;

        debug_assert!(pad_len <= buf.len());

        util::verify_zero_padding(&buf[buf.len() - pad_len..])?;
        buf.truncate(buf.len() - pad_len);

        let (fields, consumed) = decoder.decode(&buf)?;

        if consumed != buf.len() {
            tracing::debug!(
                "header block not fully consumed; stream={:?}; consumed={}; len={}",
                self.stream_id,
                consumed,
                buf.len(),
            );
            return Err(frame::Error::UnconsumedHeaderBlock);
        }

        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Head, Kind};
    use crate::hpack::{Decoder as _, Encoder as _, PlainCodec};

    fn headers_frame(flags: u8, payload: &'static [u8]) -> (frame::Headers, Bytes) {
        let head = Head::new(Kind::Headers, flags, 1.into());
        frame::Headers::load(head, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn single_fragment_block() {
        let mut codec = PlainCodec::new();
        let mut block = BytesMut::new();
        codec.encode(
            &mut std::iter::once((Bytes::from_static(b"a"), Bytes::from_static(b"b"))),
            &mut block,
        );

        let head = Head::new(Kind::Headers, 0x4, 1.into());
        let (frame, fragment) = frame::Headers::load(head, block.freeze()).unwrap();
        let assembly = Assembly::headers(&frame, fragment).unwrap();

        let fields = assembly.complete(&mut codec).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(&fields[0].0[..], b"a");
    }

    #[test]
    fn padding_stripped_after_reassembly() {
        // PADDED + END_HEADERS; pad length 2.
        let (frame, fragment) = headers_frame(0x8 | 0x4, &[2, 0, 1, b'n', 0, 1, b'v', 0, 0]);
        let assembly = Assembly::headers(&frame, fragment).unwrap();

        let mut codec = PlainCodec::new();
        let fields = assembly.complete(&mut codec).unwrap();
        assert_eq!(fields, vec![(Bytes::from_static(b"n"), Bytes::from_static(b"v"))]);
    }

    #[test]
    fn nonzero_padding_rejected() {
        let (frame, fragment) = headers_frame(0x8 | 0x4, &[1, 0, 1, b'n', 0, 1, b'v', 9]);
        let assembly = Assembly::headers(&frame, fragment).unwrap();

        let mut codec = PlainCodec::new();
        assert_eq!(
            assembly.complete(&mut codec).unwrap_err(),
            frame::Error::NonZeroPadding
        );
    }

    #[test]
    fn oversized_block_rejected() {
        let (frame, fragment) = headers_frame(0, &[0, 1, b'n']);
        let mut assembly = Assembly::headers(&frame, fragment).unwrap();

        let big = vec![0u8; MAX_HEADER_BUFFER_SIZE];
        assert_eq!(
            assembly.append(&big).unwrap_err(),
            frame::Error::HeaderBlockTooBig
        );
    }

    #[test]
    fn partial_decoder_consume_is_an_error() {
        struct Half;
        impl hpack::Decoder for Half {
            fn decode(
                &mut self,
                src: &[u8],
            ) -> Result<(Vec<(Bytes, Bytes)>, usize), hpack::DecoderError> {
                Ok((Vec::new(), src.len() / 2))
            }
            fn set_max_dynamic_table_size(&mut self, _size: usize) {}
        }

        let (frame, fragment) = headers_frame(0x4, &[0, 1, b'n', 0, 1, b'v']);
        let assembly = Assembly::headers(&frame, fragment).unwrap();
        assert_eq!(
            assembly.complete(&mut Half).unwrap_err(),
            frame::Error::UnconsumedHeaderBlock
        );
    }
}
