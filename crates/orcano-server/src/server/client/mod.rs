//! Client-facing line protocol.

pub mod handler;

pub use handler::{GREETING, PROMPT, TOO_LARGE, handle_client};
