use crate::{
    Error, Result,
    protocol::{Frame, RawValue, Tag, VALUE_LEN, Value},
};
use bytes::{Buf, Bytes};
use core::fmt;

const UID_LEN: usize = 8;
const KEY_LEN: usize = 4;
const SLOT_LEN: usize = UID_LEN + 4;
/// `USRQ` carries the image's `{ int uid; int pass; }`: a 32-bit uid.
const AUTH_LEN: usize = 4 + KEY_LEN;

/// Opaque user identifier namespacing all persisted records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Uid(pub u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Fixed-width user secret. First key stored for a [`Uid`] wins.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AuthKey(pub [u8; KEY_LEN]);

impl AuthKey {
    pub const LEN: usize = KEY_LEN;
}

/// Address of one numbered slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SlotKey {
    pub uid: Uid,
    pub idx: u32,
}

impl SlotKey {
    pub const fn new(uid: Uid, idx: u32) -> Self {
        Self { uid, idx }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:08x}", self.uid, self.idx)
    }
}

/// A frame sent by the backend during an exchange, decoded by tag.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendMessage {
    /// Terminal response line; completes the exchange.
    Response(Bytes),
    /// Register `key` for `uid`, or check it against the stored key.
    AuthQuery { uid: Uid, key: AuthKey },
    /// Read a slot; must be answered with a value frame.
    GetValue(SlotKey),
    /// Write a slot unless it is locked.
    SetValue { slot: SlotKey, value: RawValue },
    /// Freeze a slot.
    Lock(SlotKey),
    /// Values to render as an `inspect:` line.
    Inspect(Vec<Value>),
    /// Operator diagnostics; never shown to the client.
    Log(Bytes),
    /// The backend gave up on the request.
    Fault(Bytes),
}

impl TryFrom<Frame> for BackendMessage {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self> {
        let Frame { tag, payload } = frame;
        let message = match tag {
            Tag::RESPONSE => Self::Response(payload),
            Tag::LOG => Self::Log(payload),
            Tag::ERROR => Self::Fault(payload),
            Tag::AUTH_QUERY => {
                let mut buf = exact(tag, payload, AUTH_LEN)?;
                let uid = Uid(u64::from(buf.get_u32()));
                let mut key = [0; KEY_LEN];
                buf.copy_to_slice(&mut key);
                Self::AuthQuery {
                    uid,
                    key: AuthKey(key),
                }
            }
            Tag::GET_VALUE => {
                let mut buf = exact(tag, payload, SLOT_LEN)?;
                Self::GetValue(read_slot(&mut buf))
            }
            Tag::SET_VALUE => {
                let mut buf = exact(tag, payload, SLOT_LEN + VALUE_LEN)?;
                let slot = read_slot(&mut buf);
                let mut value = [0; VALUE_LEN];
                buf.copy_to_slice(&mut value);
                Self::SetValue {
                    slot,
                    value: RawValue::new(value),
                }
            }
            Tag::LOCK => {
                let mut buf = exact(tag, payload, SLOT_LEN)?;
                Self::Lock(read_slot(&mut buf))
            }
            Tag::INSPECT => Self::Inspect(decode_inspect(payload)?),
            other => return Err(Error::UnknownTag(other)),
        };
        Ok(message)
    }
}

fn exact(tag: Tag, payload: Bytes, len: usize) -> Result<Bytes> {
    if payload.len() != len {
        return Err(Error::malformed(
            tag,
            format!("expected {len} bytes, got {}", payload.len()),
        ));
    }
    Ok(payload)
}

fn read_slot(buf: &mut Bytes) -> SlotKey {
    let uid = Uid(buf.get_u64());
    let idx = buf.get_u32();
    SlotKey { uid, idx }
}

fn decode_inspect(mut payload: Bytes) -> Result<Vec<Value>> {
    let tag = Tag::INSPECT;
    if payload.len() < 4 {
        return Err(Error::malformed(tag, "missing value count"));
    }

    let count = payload.get_i32();
    let count = usize::try_from(count)
        .map_err(|_| Error::malformed(tag, format!("negative value count {count}")))?;
    let expected = count.checked_mul(VALUE_LEN);
    if expected != Some(payload.len()) {
        return Err(Error::malformed(
            tag,
            format!("{count} values need {count}x{VALUE_LEN} bytes, got {}", payload.len()),
        ));
    }

    payload
        .chunks_exact(VALUE_LEN)
        .map(|chunk| {
            let raw = RawValue::from_slice(chunk).unwrap_or_default();
            raw.decode()
                .map_err(|ty| Error::malformed(tag, format!("unknown value type {ty}")))
        })
        .collect()
}
