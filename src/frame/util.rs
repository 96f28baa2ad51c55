use bytes::Bytes;
use std::fmt;

use super::Error;

/// Strips the padding declared by the pad-length octet at the start of
/// `payload`, returning the declared length.
///
/// The pad-length octet itself counts against the payload, so a declared
/// length equal to or exceeding the remaining octets is an error. Trailing
/// padding must consist of zero octets.
pub fn strip_padding(payload: &mut Bytes) -> Result<u8, Error> {
    let payload_len = payload.len();
    if payload_len == 0 {
        return Err(Error::TooMuchPadding);
    }

    let pad_len = payload[0] as usize;

    if pad_len >= payload_len {
        return Err(Error::TooMuchPadding);
    }

    verify_zero_padding(&payload[payload_len - pad_len..])?;

    let _ = payload.split_to(1);
    let _ = payload.split_off(payload_len - pad_len - 1);

    Ok(pad_len as u8)
}

pub fn verify_zero_padding(padding: &[u8]) -> Result<(), Error> {
    if padding.iter().any(|&b| b != 0) {
        return Err(Error::NonZeroPadding);
    }
    Ok(())
}

pub(super) fn debug_flags<'a, 'f: 'a>(
    fmt: &'a mut fmt::Formatter<'f>,
    bits: u8,
) -> DebugFlags<'a, 'f> {
    let result = write!(fmt, "({:#x}", bits);
    DebugFlags {
        fmt,
        result,
        started: false,
    }
}

pub(super) struct DebugFlags<'a, 'f: 'a> {
    fmt: &'a mut fmt::Formatter<'f>,
    result: fmt::Result,
    started: bool,
}

impl<'a, 'f: 'a> DebugFlags<'a, 'f> {
    pub(super) fn flag_if(&mut self, enabled: bool, name: &str) -> &mut Self {
        if enabled {
            self.result = self.result.and_then(|()| {
                let prefix = if self.started {
                    " | "
                } else {
                    self.started = true;
                    ": "
                };

                write!(self.fmt, "{}{}", prefix, name)
            });
        }
        self
    }

    pub(super) fn finish(&mut self) -> fmt::Result {
        self.result.and_then(|()| write!(self.fmt, ")"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_padding_boundary() {
        // pad length equal to the remaining payload is rejected; the
        // pad-length octet itself counts.
        let mut payload = Bytes::from_static(&[2, 0, 0]);
        assert_eq!(strip_padding(&mut payload), Err(Error::TooMuchPadding));

        let mut payload = Bytes::from_static(&[2, b'x', 0, 0]);
        assert_eq!(strip_padding(&mut payload), Ok(2));
        assert_eq!(&payload[..], b"x");
    }

    #[test]
    fn strip_padding_rejects_nonzero() {
        let mut payload = Bytes::from_static(&[1, b'x', 7]);
        assert_eq!(strip_padding(&mut payload), Err(Error::NonZeroPadding));
    }

    #[test]
    fn strip_padding_empty_payload() {
        let mut payload = Bytes::new();
        assert_eq!(strip_padding(&mut payload), Err(Error::TooMuchPadding));
    }
}
