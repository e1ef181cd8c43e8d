use crate::protocol::{SlotKey, Uid};
use core::hash::{Hash, Hasher};
use std::hash::DefaultHasher;
use tokio::sync::{Mutex, MutexGuard};

const SHARD_COUNT: usize = 64;

#[derive(Clone, Copy, Hash)]
pub(crate) enum RecordKey {
    Auth(Uid),
    Slot(SlotKey),
}

/// Fixed pool of async mutexes; a key always maps to the same shard.
pub(crate) struct KeyedLocks {
    shards: Box<[Mutex<()>]>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index(&self, key: RecordKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub(crate) async fn lock(&self, key: RecordKey) -> MutexGuard<'_, ()> {
        self.shards[self.index(key)].lock().await
    }
}
