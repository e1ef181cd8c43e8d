use core::fmt;

/// Size of a tagged value on the wire and on disk.
pub const VALUE_LEN: usize = 8;

const TYPE_INT: u32 = 0;
const TYPE_FLOAT: u32 = 1;

/// An opaque 8-byte tagged value exactly as the backend sent it.
///
/// Slot storage never interprets these bytes; only inspect rendering decodes
/// them into a [`Value`]. The all-zero value is the integer `0` and is what an
/// unwritten slot reads as.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawValue([u8; VALUE_LEN]);

impl RawValue {
    pub const ZERO: Self = Self([0; VALUE_LEN]);

    pub const fn new(bytes: [u8; VALUE_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns `None` unless `bytes` is exactly [`VALUE_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub const fn as_bytes(&self) -> &[u8; VALUE_LEN] {
        &self.0
    }

    /// Decodes the type word. Unknown type codes are returned as the error.
    pub fn decode(&self) -> Result<Value, u32> {
        let [t0, t1, t2, t3, v0, v1, v2, v3] = self.0;
        let value = [v0, v1, v2, v3];
        match u32::from_be_bytes([t0, t1, t2, t3]) {
            TYPE_INT => Ok(Value::Int(i32::from_be_bytes(value))),
            TYPE_FLOAT => Ok(Value::Float(f32::from_be_bytes(value))),
            other => Err(other),
        }
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Ok(value) => write!(f, "RawValue({value})"),
            Err(_) => write!(f, "RawValue({:02x?})", self.0),
        }
    }
}

/// A decoded stack value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
}

impl Value {
    pub fn encode(self) -> RawValue {
        let (ty, value) = match self {
            Self::Int(v) => (TYPE_INT, v.to_be_bytes()),
            Self::Float(v) => (TYPE_FLOAT, v.to_be_bytes()),
        };
        let mut out = [0; VALUE_LEN];
        out[..4].copy_from_slice(&ty.to_be_bytes());
        out[4..].copy_from_slice(&value);
        RawValue(out)
    }
}

/// Renders `i<int>` or `f<float>`.
///
/// Floats stay `f32` all the way into the formatter, whose `Debug` output is
/// the shortest text that parses back to the identical `f32` and always has a
/// fractional part or exponent.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "i{v}"),
            Self::Float(v) => write!(f, "f{v:?}"),
        }
    }
}

/// Formats one `inspect:` line (without line break).
pub fn format_inspect(values: &[Value]) -> String {
    let mut line = String::from("inspect: ");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(&value.to_string());
    }
    line
}
