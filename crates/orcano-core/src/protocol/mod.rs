//! # Backend control protocol
//!
//! Every backend instance is reached over a private TCP connection carrying
//! binary frames:
//!
//! ```text
//! +---------+------------------+-----------------+
//! | tag [4] | len: u32 (BE)    | payload [len]   |
//! +---------+------------------+-----------------+
//! ```
//!
//! One exchange per client request: the frontend sends a single `RQST`
//! frame, then services the backend's storage and diagnostic frames until a
//! terminating `RESP` (success) or `EROR` (fault) arrives. Queries that need
//! an answer (`USRQ`, `GETN`) are answered inline before the backend sends
//! anything else, so the exchange stays strictly request/response on one
//! connection.
//!
//! ## Submodules
//!
//! - [`frame`] - Tags, raw frames and the `tokio_util` codec.
//! - [`message`] - Typed decoding of backend-originated frames.
//! - [`value`] - 8-byte tagged numeric values and their text rendering.
//! - [`response`] - Append-only line buffer assembling a client response.

pub mod frame;
pub mod message;
pub mod response;
pub mod value;

pub use frame::{Frame, FrameCodec, HEADER_LEN, MAX_FRAME_PAYLOAD, Tag};
pub use message::{AuthKey, BackendMessage, SlotKey, Uid};
pub use response::ResponseBuffer;
pub use value::{RawValue, VALUE_LEN, Value, format_inspect};
