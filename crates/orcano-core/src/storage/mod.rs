//! # File-backed record storage
//!
//! Persists three disjoint namespaces on behalf of the backends:
//!
//! - **auth** - one record per [`Uid`](crate::protocol::Uid) holding the first
//!   key ever presented for it.
//! - **num** - one 8-byte tagged value per [`SlotKey`](crate::protocol::SlotKey).
//! - **lock** - one empty marker per slot; once present the slot is frozen.
//!
//! Records are individually addressable files; there are no cross-record
//! transactions. State lives outside the backend processes, so restarting an
//! instance never loses data.
//!
//! Check-then-write operations (`put_auth_if_absent`, `set_value`, `lock`)
//! run under a per-key shard mutex, making the write-once guarantees atomic
//! with respect to concurrent workers in this process.

mod file;
mod shards;

pub use file::FileStore;

/// Result of reading one persisted record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The record exists and is well formed.
    Found(T),
    /// No record has been written.
    Missing,
    /// The record exists but has the wrong size.
    Corrupt,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(v) => Some(v),
            Self::Missing | Self::Corrupt => None,
        }
    }
}

/// Outcome of [`FileStore::put_auth_if_absent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// First observation of the uid; the key is now stored.
    Registered,
    /// The presented key equals the stored one.
    Matched,
    /// A different key is stored (or the record is unreadable).
    Rejected,
}

impl AuthOutcome {
    pub const fn accepted(self) -> bool {
        matches!(self, Self::Registered | Self::Matched)
    }
}

/// Outcome of [`FileStore::set_value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    Written,
    /// The slot is locked; nothing changed.
    Ignored,
}
