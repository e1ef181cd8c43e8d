//! Backend process management and the control-protocol bridge.
//!
//! - [`launcher`] spawns backend processes bound to a control port.
//! - [`session`] owns one running instance and drives request exchanges
//!   against it, servicing storage callbacks inline.

pub mod launcher;
pub mod session;

pub use launcher::{BackendProcess, EmulatorLauncher, EmulatorProcess, Launcher};
pub use session::BackendSession;
