//! Supervised pool of backend workers.
//!
//! - [`worker`] runs one backend session against the admission queue.
//! - [`manager`] keeps `N` workers alive and tracks each slot's state.

pub mod manager;
pub mod worker;

pub use manager::{SlotStatus, WorkerPool, WorkerState};
pub use worker::{INTERNAL_ERROR, WorkerContext, WorkerExit, worker_loop};
