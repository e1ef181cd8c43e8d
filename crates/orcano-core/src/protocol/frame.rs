use crate::{Error, protocol::RawValue};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use core::fmt;
use tokio_util::codec::{Decoder, Encoder};

/// Size of a frame header: 4-byte tag plus 4-byte big-endian length.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted from (or sent to) a backend.
///
/// Legitimate frames are a few hundred bytes at most; anything larger means
/// the stream is desynchronised or hostile.
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// A 4-byte ASCII message tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    /// Frontend -> backend: the client's command line.
    pub const REQUEST: Self = Self(*b"RQST");
    /// Backend -> frontend: terminal response line.
    pub const RESPONSE: Self = Self(*b"RESP");
    /// Backend -> frontend: register or verify a user key.
    pub const AUTH_QUERY: Self = Self(*b"USRQ");
    /// Frontend -> backend: answer to [`Tag::AUTH_QUERY`].
    pub const AUTH_ANSWER: Self = Self(*b"USRA");
    /// Backend -> frontend: read a numbered slot.
    pub const GET_VALUE: Self = Self(*b"GETN");
    /// Frontend -> backend: answer to [`Tag::GET_VALUE`].
    pub const VALUE_ANSWER: Self = Self(*b"GETA");
    /// Backend -> frontend: write a numbered slot.
    pub const SET_VALUE: Self = Self(*b"SETN");
    /// Backend -> frontend: lock a numbered slot.
    pub const LOCK: Self = Self(*b"LCKN");
    /// Backend -> frontend: emit an inspect line.
    pub const INSPECT: Self = Self(*b"INSQ");
    /// Backend -> frontend: operator diagnostics.
    pub const LOG: Self = Self(*b"LOGQ");
    /// Backend -> frontend: abort the exchange.
    pub const ERROR: Self = Self(*b"EROR");
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.escape_ascii())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// One raw protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// The initiating frame of an exchange.
    pub fn request(line: impl Into<Bytes>) -> Self {
        Self::new(Tag::REQUEST, line)
    }

    /// Answer to an auth query: `1` if the key was accepted, `0` otherwise.
    pub fn auth_answer(accepted: bool) -> Self {
        let flag = u32::from(accepted);
        Self::new(Tag::AUTH_ANSWER, Bytes::copy_from_slice(&flag.to_be_bytes()))
    }

    /// Answer to a get-value query carrying the 8 stored bytes.
    pub fn value_answer(value: RawValue) -> Self {
        Self::new(Tag::VALUE_ANSWER, Bytes::copy_from_slice(value.as_bytes()))
    }
}

/// Length-prefixed codec for [`Frame`]s.
///
/// Rejects oversized payloads in both directions with
/// [`Error::FrameTooLarge`] instead of buffering them.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    max_payload: usize,
}

impl FrameCodec {
    pub const fn new() -> Self {
        Self {
            max_payload: MAX_FRAME_PAYLOAD,
        }
    }

    pub const fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if len > self.max_payload {
            return Err(Error::FrameTooLarge {
                len,
                limit: self.max_payload,
            });
        }

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let tag = Tag([src[0], src[1], src[2], src[3]]);
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { tag, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        let len = frame.payload.len();
        if len > self.max_payload {
            return Err(Error::FrameTooLarge {
                len,
                limit: self.max_payload,
            });
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_slice(&frame.tag.0);
        // Bounded by `max_payload` above.
        dst.put_u32(len as u32);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
