use super::{
    AuthOutcome, Lookup, SetOutcome,
    shards::{KeyedLocks, RecordKey},
};
use crate::{
    Error, Result,
    protocol::{AuthKey, RawValue, SlotKey, Uid},
};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;

const AUTH_DIR: &str = "auth";
const VALUE_DIR: &str = "num";
const LOCK_DIR: &str = "lock";

/// Durable store for user keys, slot values and slot locks.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct FileStore {
    root: PathBuf,
    locks: KeyedLocks,
}

impl FileStore {
    /// Opens (and creates, if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [AUTH_DIR, VALUE_DIR, LOCK_DIR] {
            fs::create_dir_all(root.join(dir))
                .await
                .map_err(Error::Storage)?;
        }

        tracing::debug!("Opened storage at {}", root.display());
        Ok(Self {
            root,
            locks: KeyedLocks::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn auth_path(&self, uid: Uid) -> PathBuf {
        self.root.join(AUTH_DIR).join(uid.to_string())
    }

    fn value_path(&self, slot: SlotKey) -> PathBuf {
        self.root.join(VALUE_DIR).join(slot.to_string())
    }

    fn lock_path(&self, slot: SlotKey) -> PathBuf {
        self.root.join(LOCK_DIR).join(slot.to_string())
    }

    pub async fn get_auth(&self, uid: Uid) -> Result<Lookup<AuthKey>> {
        let lookup = match read_record(&self.auth_path(uid)).await? {
            None => Lookup::Missing,
            Some(bytes) => match <[u8; AuthKey::LEN]>::try_from(bytes.as_slice()) {
                Ok(key) => Lookup::Found(AuthKey(key)),
                Err(_) => Lookup::Corrupt,
            },
        };
        Ok(lookup)
    }

    /// Stores `key` for `uid` if nothing is stored yet; otherwise compares.
    ///
    /// Never overwrites an existing record, including a corrupt one.
    pub async fn put_auth_if_absent(&self, uid: Uid, key: AuthKey) -> Result<AuthOutcome> {
        let _guard = self.locks.lock(RecordKey::Auth(uid)).await;

        let outcome = match self.get_auth(uid).await? {
            Lookup::Missing => {
                write_record(&self.auth_path(uid), &key.0).await?;
                AuthOutcome::Registered
            }
            Lookup::Found(stored) if stored == key => AuthOutcome::Matched,
            Lookup::Found(_) => AuthOutcome::Rejected,
            Lookup::Corrupt => {
                tracing::warn!("Auth record for uid {uid} is corrupt, rejecting");
                AuthOutcome::Rejected
            }
        };
        Ok(outcome)
    }

    pub async fn read_value(&self, slot: SlotKey) -> Result<Lookup<RawValue>> {
        let lookup = match read_record(&self.value_path(slot)).await? {
            None => Lookup::Missing,
            Some(bytes) => match RawValue::from_slice(&bytes) {
                Some(value) => Lookup::Found(value),
                None => Lookup::Corrupt,
            },
        };
        Ok(lookup)
    }

    /// Reads a slot, defaulting to [`RawValue::ZERO`] when missing or corrupt.
    pub async fn get_value(&self, slot: SlotKey) -> Result<RawValue> {
        Ok(self.read_value(slot).await?.found().unwrap_or_default())
    }

    /// Writes a slot unless it is locked, in which case this is a no-op.
    pub async fn set_value(&self, slot: SlotKey, value: RawValue) -> Result<SetOutcome> {
        let _guard = self.locks.lock(RecordKey::Slot(slot)).await;

        if self.is_locked(slot).await? {
            tracing::debug!("Ignoring write to locked slot {slot}");
            return Ok(SetOutcome::Ignored);
        }

        write_record(&self.value_path(slot), value.as_bytes()).await?;
        Ok(SetOutcome::Written)
    }

    /// Creates the lock marker for `slot`. Locking twice is the same as once.
    pub async fn lock(&self, slot: SlotKey) -> Result<()> {
        let _guard = self.locks.lock(RecordKey::Slot(slot)).await;

        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(slot))
            .await
            .map_err(Error::Storage)?;
        Ok(())
    }

    pub async fn is_locked(&self, slot: SlotKey) -> Result<bool> {
        fs::try_exists(self.lock_path(slot))
            .await
            .map_err(Error::Storage)
    }
}

async fn read_record(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Storage(e)),
    }
}

/// Writes to a sibling temp file and renames it over `path`.
///
/// Callers hold the key's shard lock, so the temp name cannot be shared with
/// a concurrent writer.
async fn write_record(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await.map_err(Error::Storage)?;
    fs::rename(&tmp, path).await.map_err(Error::Storage)
}
