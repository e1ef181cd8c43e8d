//! Error types for the Orcano frontend.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the frontend can observe while talking to a backend instance or touching
//! persisted state. None of these details are ever shown to a client: a failed
//! exchange is always reported with the same generic internal-error line.
//!
//! ## Error Cases
//! - `Io`: The control connection failed (reset, refused, closed mid-write).
//! - `UnexpectedEof`: The backend closed the control connection mid-exchange.
//! - `FrameTooLarge`: A frame declared a payload above the protocol limit.
//! - `UnknownTag`: The backend sent a tag that is not part of the protocol.
//! - `MalformedPayload`: A known tag carried a payload of the wrong shape.
//! - `BackendReported`: The backend aborted the exchange with an error frame.
//! - `ExchangeTimeout`: The exchange exceeded its wall-clock bound.
//! - `StartupTimeout`: The backend never accepted a control connection.
//! - `BackendExited`: The backend process exited on its own.
//! - `Storage`: Reading or writing a persisted record failed.
//! - `QueueClosed`: The admission queue has no consumers or producers left.
//! - `PortsClosed`: The port allocator stopped handing out ports.

use crate::protocol::Tag;
use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the Orcano frontend.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failure on the backend control connection.
    #[error("Control connection error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend closed the control connection before finishing.
    #[error("Backend closed the control connection mid-exchange")]
    UnexpectedEof,

    /// A frame header declared a payload larger than allowed.
    #[error("Frame payload of {len} bytes exceeds limit of {limit}")]
    FrameTooLarge { len: usize, limit: usize },

    /// The backend sent a frame with a tag outside the protocol.
    #[error("Unknown message tag {0}")]
    UnknownTag(Tag),

    /// A known message carried an invalid payload.
    #[error("Malformed {tag} payload: {reason}")]
    MalformedPayload { tag: Tag, reason: String },

    /// The backend aborted the exchange with an `EROR` frame.
    #[error("Backend reported error: {0}")]
    BackendReported(String),

    /// The exchange did not finish in time.
    #[error("Exchange timed out after {0:?}")]
    ExchangeTimeout(Duration),

    /// The backend never accepted a control connection.
    #[error("Backend on port {port} did not accept a connection within {timeout:?}")]
    StartupTimeout { port: u16, timeout: Duration },

    /// The backend process is gone.
    #[error("Backend process exited (code: {code:?})")]
    BackendExited { code: Option<i32> },

    /// A persisted record could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[source] std::io::Error),

    /// The admission queue was closed.
    #[error("Admission queue closed")]
    QueueClosed,

    /// No more control ports will be handed out.
    #[error("Port allocator closed")]
    PortsClosed,
}

impl Error {
    pub(crate) fn malformed(tag: Tag, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            tag,
            reason: reason.into(),
        }
    }
}
