use std::io::Cursor;
use std::string::FromUtf8Error;
use std::{fmt, str};

use bytes::{Buf, BufMut, BytesMut};

/// Largest payload a frame can carry: the length prefix is an unsigned
/// 16-bit big-endian integer.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const LEN_PREFIX: usize = 2;

/// One message on the wire: `[u16 BE byte count][UTF-8 payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: String,
}

#[derive(Debug)]
pub enum Error {
    /// Not enough data buffered to hold a whole frame.
    Incomplete,
    TooLarge(usize),
    Other(crate::Error),
}

impl Frame {
    pub fn new(payload: impl Into<String>) -> Result<Frame, Error> {
        let payload = payload.into();

        if payload.len() > MAX_PAYLOAD {
            return Err(Error::TooLarge(payload.len()));
        }

        Ok(Frame { payload })
    }

    pub fn as_str(&self) -> &str {
        &self.payload
    }

    pub fn into_string(self) -> String {
        self.payload
    }

    /// Checks whether a whole frame is available in `src`, advancing the
    /// cursor past it when it is.
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<(), Error> {
        let len = get_len(src)?;

        skip(src, len)
    }

    /// Parses a frame that has already been validated with [`Frame::check`].
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Frame, Error> {
        let len = get_len(src)?;

        if src.remaining() < len {
            return Err(Error::Incomplete);
        }

        let bytes = src.chunk()[..len].to_vec();
        src.advance(len);

        let payload = String::from_utf8(bytes)?;

        Ok(Frame { payload })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(LEN_PREFIX + self.payload.len());
        // `new` keeps the payload within u16 range
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(self.payload.as_bytes());
    }
}

fn get_len(src: &mut Cursor<&[u8]>) -> Result<usize, Error> {
    if src.remaining() < LEN_PREFIX {
        return Err(Error::Incomplete);
    }

    Ok(src.get_u16() as usize)
}

fn skip(src: &mut Cursor<&[u8]>, n: usize) -> Result<(), Error> {
    if src.remaining() < n {
        return Err(Error::Incomplete);
    }

    src.advance(n);
    Ok(())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.payload.fmt(f)
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src.into())
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "protocol error; frame payload is not valid UTF-8".into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Incomplete => "stream ended early".fmt(fmt),
            Error::TooLarge(len) => write!(
                fmt,
                "frame payload of {} bytes exceeds the {} byte limit",
                len, MAX_PAYLOAD
            ),
            Error::Other(err) => err.fmt(fmt),
        }
    }
}

impl std::error::Error for Error {}
