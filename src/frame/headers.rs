use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use std::fmt;

use crate::frame::{util, Error, Head, StreamDependency, StreamId};

/// The non-payload portion of a HEADERS frame: the prefix octets are
/// consumed here, the header-block fragment (padding still attached) goes
/// to the assembler.
#[derive(Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,
    stream_dep: Option<StreamDependency>,
    flags: HeadersFlag,
    pad_len: u8,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct HeadersFlag(u8);

/// The non-payload portion of a PUSH_PROMISE frame.
#[derive(Eq, PartialEq)]
pub struct PushPromise {
    stream_id: StreamId,
    promised_id: StreamId,
    flags: PushPromiseFlag,
    pad_len: u8,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct PushPromiseFlag(u8);

/// The pseudo-header fields of a single header block.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Pseudo {
    pub method: Option<Method>,
    pub scheme: Option<String>,
    pub authority: Option<String>,
    pub path: Option<String>,

    pub status: Option<StatusCode>,
}

/// A complete, validated header block as surfaced to consumers: the
/// pseudo-headers plus the regular fields in arrival order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HeaderBlock {
    pub pseudo: Pseudo,
    pub fields: HeaderMap,
}

/// How a received block is validated: by the local role and by its
/// position on the stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum BlockContext {
    Request,
    Response,
    Trailers,
}

const END_STREAM: u8 = 0x1;
const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;
const ALL: u8 = END_STREAM | END_HEADERS | PADDED | PRIORITY;

impl Headers {
    /// Parses the flags-dependent prefix, returning the frame and the
    /// fragment. Declared padding is verified to fit but is not stripped;
    /// the assembler strips it once the block is complete.
    pub fn load(head: Head, mut payload: Bytes) -> Result<(Self, Bytes), Error> {
        let flags = HeadersFlag::load(head.flag());
        let mut pad = 0;

        tracing::trace!("loading headers; flags={:?}", flags);

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if flags.is_padded() {
            if payload.is_empty() {
                return Err(Error::MalformedMessage);
            }
            pad = payload[0] as usize;

            let _ = payload.split_to(1);
        }

        let stream_dep = if flags.is_priority() {
            if payload.len() < 5 {
                return Err(Error::MalformedMessage);
            }
            let stream_dep = StreamDependency::load(&payload[..5])?;

            if stream_dep.dependency_id() == head.stream_id() {
                return Err(Error::InvalidDependencyId);
            }

            let _ = payload.split_to(5);

            Some(stream_dep)
        } else {
            None
        };

        if pad > payload.len() {
            return Err(Error::TooMuchPadding);
        }

        let headers = Headers {
            stream_id: head.stream_id(),
            stream_dep,
            flags,
            pad_len: pad as u8,
        };

        Ok((headers, payload))
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn stream_dep(&self) -> Option<&StreamDependency> {
        self.stream_dep.as_ref()
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags.is_end_stream()
    }

    pub fn pad_len(&self) -> u8 {
        self.pad_len
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Headers");
        builder
            .field("stream_id", &self.stream_id)
            .field("flags", &self.flags);

        if let Some(ref dep) = self.stream_dep {
            builder.field("stream_dep", dep);
        }

        builder.finish()
    }
}

impl PushPromise {
    pub fn load(head: Head, mut payload: Bytes) -> Result<(Self, Bytes), Error> {
        let flags = PushPromiseFlag::load(head.flag());
        let mut pad = 0;

        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if flags.is_padded() {
            if payload.is_empty() {
                return Err(Error::MalformedMessage);
            }

            pad = payload[0] as usize;

            let _ = payload.split_to(1);
        }

        if payload.len() < 4 {
            return Err(Error::MalformedMessage);
        }

        let (promised_id, _) = StreamId::parse(&payload[..4]);
        let _ = payload.split_to(4);

        if pad > payload.len() {
            return Err(Error::TooMuchPadding);
        }

        let frame = PushPromise {
            stream_id: head.stream_id(),
            promised_id,
            flags,
            pad_len: pad as u8,
        };

        Ok((frame, payload))
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags.is_end_headers()
    }

    pub fn pad_len(&self) -> u8 {
        self.pad_len
    }
}

impl fmt::Debug for PushPromise {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PushPromise")
            .field("stream_id", &self.stream_id)
            .field("promised_id", &self.promised_id)
            .field("flags", &self.flags)
            .finish()
    }
}

impl Pseudo {
    pub fn request(method: Method, scheme: &str, authority: &str, path: &str) -> Self {
        Pseudo {
            method: Some(method),
            scheme: Some(scheme.to_owned()),
            authority: Some(authority.to_owned()),
            path: Some(path.to_owned()),
            status: None,
        }
    }

    pub fn response(status: StatusCode) -> Self {
        Pseudo {
            status: Some(status),
            ..Pseudo::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.scheme.is_none()
            && self.authority.is_none()
            && self.path.is_none()
            && self.status.is_none()
    }
}

impl HeaderBlock {
    pub fn new(pseudo: Pseudo, fields: HeaderMap) -> Self {
        HeaderBlock { pseudo, fields }
    }

    /// Flattens the block back into wire-order (name, value) pairs for the
    /// encoder: pseudo-headers first, regular fields after.
    pub(crate) fn field_pairs(&self) -> Vec<(Bytes, Bytes)> {
        let mut pairs = Vec::with_capacity(self.fields.len() + 5);

        if let Some(ref method) = self.pseudo.method {
            pairs.push((
                Bytes::from_static(b":method"),
                Bytes::copy_from_slice(method.as_str().as_bytes()),
            ));
        }
        if let Some(ref scheme) = self.pseudo.scheme {
            pairs.push((
                Bytes::from_static(b":scheme"),
                Bytes::copy_from_slice(scheme.as_bytes()),
            ));
        }
        if let Some(ref authority) = self.pseudo.authority {
            pairs.push((
                Bytes::from_static(b":authority"),
                Bytes::copy_from_slice(authority.as_bytes()),
            ));
        }
        if let Some(ref path) = self.pseudo.path {
            pairs.push((
                Bytes::from_static(b":path"),
                Bytes::copy_from_slice(path.as_bytes()),
            ));
        }
        if let Some(status) = self.pseudo.status {
            pairs.push((
                Bytes::from_static(b":status"),
                Bytes::copy_from_slice(status.as_str().as_bytes()),
            ));
        }

        for (name, value) in self.fields.iter() {
            pairs.push((
                Bytes::copy_from_slice(name.as_str().as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            ));
        }

        pairs
    }

    /// Builds a validated block out of the decoded field list, applying
    /// the pseudo-header ordering and role rules.
    pub(crate) fn build(ctx: BlockContext, decoded: Vec<(Bytes, Bytes)>) -> Result<Self, Error> {
        let mut pseudo = Pseudo::default();
        let mut fields = HeaderMap::new();
        let mut reg = false;

        macro_rules! set_pseudo {
            ($field:ident, $val:expr) => {{
                if pseudo.$field.is_some() {
                    tracing::trace!("malformed header block -- repeated pseudo");
                    return Err(Error::MalformedMessage);
                }
                pseudo.$field = Some($val);
            }};
        }

        for (name, value) in decoded {
            if name.first() == Some(&b':') {
                if reg {
                    tracing::trace!("malformed header block -- pseudo not at head of block");
                    return Err(Error::MalformedMessage);
                }

                if ctx == BlockContext::Trailers {
                    tracing::trace!("malformed header block -- pseudo in trailers");
                    return Err(Error::MalformedMessage);
                }

                let request = ctx == BlockContext::Request;

                match &name[..] {
                    b":method" if request => {
                        let method = Method::from_bytes(&value)
                            .map_err(|_| Error::MalformedMessage)?;
                        set_pseudo!(method, method);
                    }
                    b":scheme" if request => {
                        let scheme = string_field(&value)?;
                        set_pseudo!(scheme, scheme);
                    }
                    b":authority" if request => {
                        let authority = string_field(&value)?;
                        set_pseudo!(authority, authority);
                    }
                    b":path" if request => {
                        let path = string_field(&value)?;
                        set_pseudo!(path, path);
                    }
                    b":status" if !request => {
                        let status = StatusCode::from_bytes(&value)
                            .map_err(|_| Error::MalformedMessage)?;
                        set_pseudo!(status, status);
                    }
                    _ => {
                        tracing::trace!(
                            "malformed header block -- pseudo {:?} invalid here",
                            name
                        );
                        return Err(Error::MalformedMessage);
                    }
                }
            } else {
                reg = true;

                if is_connection_specific(&name) {
                    tracing::trace!("malformed header block -- connection-specific header");
                    return Err(Error::MalformedMessage);
                }

                if &name[..] == b"te" && &value[..] != b"trailers" {
                    tracing::trace!("malformed header block -- TE not set to trailers");
                    return Err(Error::MalformedMessage);
                }

                let name =
                    HeaderName::from_bytes(&name).map_err(|_| Error::MalformedMessage)?;
                let value =
                    HeaderValue::from_bytes(&value).map_err(|_| Error::MalformedMessage)?;

                fields.append(name, value);
            }
        }

        match ctx {
            BlockContext::Request => {
                let method = match pseudo.method {
                    Some(ref method) => method,
                    None => {
                        tracing::trace!("malformed request -- missing :method");
                        return Err(Error::MalformedMessage);
                    }
                };

                if *method == Method::CONNECT {
                    if pseudo.scheme.is_some() || pseudo.path.is_some() {
                        tracing::trace!("malformed CONNECT -- :scheme or :path present");
                        return Err(Error::MalformedMessage);
                    }
                } else {
                    let scheme = match pseudo.scheme {
                        Some(ref scheme) => scheme,
                        None => {
                            tracing::trace!("malformed request -- missing :scheme");
                            return Err(Error::MalformedMessage);
                        }
                    };

                    let path = match pseudo.path {
                        Some(ref path) => path,
                        None => {
                            tracing::trace!("malformed request -- missing :path");
                            return Err(Error::MalformedMessage);
                        }
                    };

                    if (scheme == "http" || scheme == "https") && path.is_empty() {
                        tracing::trace!("malformed request -- empty :path");
                        return Err(Error::MalformedMessage);
                    }
                }
            }
            BlockContext::Response => {
                if pseudo.status.is_none() {
                    tracing::trace!("malformed response -- missing :status");
                    return Err(Error::MalformedMessage);
                }
            }
            BlockContext::Trailers => {}
        }

        Ok(HeaderBlock { pseudo, fields })
    }
}

/// Parses a decimal integer field such as `content-length`.
pub fn parse_u64(src: &[u8]) -> Result<u64, ()> {
    if src.len() > 19 {
        // At danger for overflow...
        return Err(());
    }

    let mut ret = 0;

    for &d in src {
        if !d.is_ascii_digit() {
            return Err(());
        }

        ret *= 10;
        ret += (d - b'0') as u64;
    }

    Ok(ret)
}

fn string_field(value: &Bytes) -> Result<String, Error> {
    std::str::from_utf8(value)
        .map(str::to_owned)
        .map_err(|_| Error::MalformedMessage)
}

fn is_connection_specific(name: &Bytes) -> bool {
    matches!(
        &name[..],
        b"connection" | b"transfer-encoding" | b"upgrade" | b"keep-alive" | b"proxy-connection"
    )
}

impl HeadersFlag {
    pub fn load(bits: u8) -> HeadersFlag {
        HeadersFlag(bits & ALL)
    }

    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM == END_STREAM
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }

    pub fn is_priority(&self) -> bool {
        self.0 & PRIORITY == PRIORITY
    }
}

impl From<HeadersFlag> for u8 {
    fn from(src: HeadersFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for HeadersFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_end_stream(), "END_STREAM")
            .flag_if(self.is_padded(), "PADDED")
            .flag_if(self.is_priority(), "PRIORITY")
            .finish()
    }
}

impl PushPromiseFlag {
    pub fn load(bits: u8) -> PushPromiseFlag {
        PushPromiseFlag(bits & (END_HEADERS | PADDED))
    }

    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS == END_HEADERS
    }

    pub fn is_padded(&self) -> bool {
        self.0 & PADDED == PADDED
    }
}

impl From<PushPromiseFlag> for u8 {
    fn from(src: PushPromiseFlag) -> u8 {
        src.0
    }
}

impl fmt::Debug for PushPromiseFlag {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        util::debug_flags(fmt, self.0)
            .flag_if(self.is_end_headers(), "END_HEADERS")
            .flag_if(self.is_padded(), "PADDED")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Kind;

    fn pair(name: &'static [u8], value: &'static [u8]) -> (Bytes, Bytes) {
        (Bytes::from_static(name), Bytes::from_static(value))
    }

    #[test]
    fn build_request() {
        let block = HeaderBlock::build(
            BlockContext::Request,
            vec![
                pair(b":method", b"GET"),
                pair(b":scheme", b"https"),
                pair(b":path", b"/"),
                pair(b":authority", b"example.com"),
                pair(b"accept", b"*/*"),
            ],
        )
        .unwrap();

        assert_eq!(block.pseudo.method, Some(Method::GET));
        assert_eq!(block.pseudo.scheme.as_deref(), Some("https"));
        assert_eq!(block.fields.len(), 1);
    }

    #[test]
    fn pseudo_after_regular_is_malformed() {
        let err = HeaderBlock::build(
            BlockContext::Request,
            vec![
                pair(b":method", b"GET"),
                pair(b":scheme", b"https"),
                pair(b"accept", b"*/*"),
                pair(b":path", b"/"),
            ],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);
    }

    #[test]
    fn response_pseudo_in_request_is_malformed() {
        let err = HeaderBlock::build(
            BlockContext::Request,
            vec![pair(b":status", b"200"), pair(b":method", b"GET")],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);
    }

    #[test]
    fn connect_must_omit_scheme_and_path() {
        let err = HeaderBlock::build(
            BlockContext::Request,
            vec![
                pair(b":method", b"CONNECT"),
                pair(b":scheme", b"https"),
                pair(b":authority", b"example.com:443"),
            ],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);

        let block = HeaderBlock::build(
            BlockContext::Request,
            vec![
                pair(b":method", b"CONNECT"),
                pair(b":authority", b"example.com:443"),
            ],
        )
        .unwrap();
        assert_eq!(block.pseudo.method, Some(Method::CONNECT));
    }

    #[test]
    fn empty_path_rejected_for_http_schemes() {
        let err = HeaderBlock::build(
            BlockContext::Request,
            vec![
                pair(b":method", b"GET"),
                pair(b":scheme", b"https"),
                pair(b":path", b""),
            ],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);
    }

    #[test]
    fn connection_header_rejected() {
        let err = HeaderBlock::build(
            BlockContext::Response,
            vec![pair(b":status", b"200"), pair(b"connection", b"close")],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);
    }

    #[test]
    fn te_must_be_trailers() {
        let err = HeaderBlock::build(
            BlockContext::Response,
            vec![pair(b":status", b"200"), pair(b"te", b"gzip")],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);

        let block = HeaderBlock::build(
            BlockContext::Response,
            vec![pair(b":status", b"200"), pair(b"te", b"trailers")],
        )
        .unwrap();
        assert_eq!(block.fields.len(), 1);
    }

    #[test]
    fn trailers_refuse_pseudo() {
        let err = HeaderBlock::build(
            BlockContext::Trailers,
            vec![pair(b":status", b"200")],
        )
        .unwrap_err();
        assert_eq!(err, Error::MalformedMessage);

        let block =
            HeaderBlock::build(BlockContext::Trailers, vec![pair(b"grpc-status", b"0")]).unwrap();
        assert!(block.pseudo.is_empty());
    }

    #[test]
    fn response_requires_status() {
        let err =
            HeaderBlock::build(BlockContext::Response, vec![pair(b"server", b"h2")]).unwrap_err();
        assert_eq!(err, Error::MalformedMessage);
    }

    #[test]
    fn load_keeps_padding_in_fragment() {
        let head = Head::new(Kind::Headers, PADDED | END_HEADERS, 1.into());
        let payload = Bytes::from_static(&[2, b'a', b'b', 0, 0]);
        let (frame, fragment) = Headers::load(head, payload).unwrap();

        assert_eq!(frame.pad_len(), 2);
        assert!(frame.is_end_headers());
        assert_eq!(&fragment[..], &[b'a', b'b', 0, 0]);
    }

    #[test]
    fn load_parses_priority_prefix() {
        let head = Head::new(Kind::Headers, PRIORITY, 3.into());
        let payload = Bytes::from_static(&[0x80, 0, 0, 1, 42, b'x']);
        let (frame, fragment) = Headers::load(head, payload).unwrap();

        let dep = frame.stream_dep().unwrap();
        assert_eq!(dep.dependency_id(), StreamId::from(1));
        assert!(dep.is_exclusive());
        assert_eq!(dep.weight(), 43);
        assert_eq!(&fragment[..], b"x");
    }

    #[test]
    fn load_rejects_self_dependency() {
        let head = Head::new(Kind::Headers, PRIORITY, 3.into());
        let payload = Bytes::from_static(&[0, 0, 0, 3, 42]);
        assert_eq!(
            Headers::load(head, payload).unwrap_err(),
            Error::InvalidDependencyId
        );
    }
}
