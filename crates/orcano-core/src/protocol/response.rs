use bytes::{BufMut, Bytes, BytesMut};

/// Append-only buffer of response lines for one exchange.
///
/// Every line is terminated by exactly one `\n`, whichever code path produced
/// it: a single trailing `\n` (or `\r\n`) on the input is dropped before the
/// terminator is added.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buf: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &[u8]) {
        let line = match line.strip_suffix(b"\n") {
            Some(line) => line.strip_suffix(b"\r").unwrap_or(line),
            None => line,
        };
        self.buf.reserve(line.len() + 1);
        self.buf.put_slice(line);
        self.buf.put_u8(b'\n');
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}
