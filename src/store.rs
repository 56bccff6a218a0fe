//! Durable persistence for checkpoint state
//!
//! The subsystem persists two values: the active checkpoint hash and the
//! authority public key it was established under. Writes are followed by an
//! explicit flush before the in-memory state is allowed to change, so the
//! durable value never lags a promoted checkpoint.

use std::path::Path;
use std::sync::Mutex;

use sled::{Db, Tree};

use crate::error::StoreError;
use crate::hash::Hash256;

const CHECKPOINT_TREE: &str = "checkpoint_metadata";

const SYNC_CHECKPOINT_KEY: &[u8] = b"sync_checkpoint";
const AUTHORITY_KEY_KEY: &[u8] = b"checkpoint_pubkey";

/// Durable key-value persistence consumed by the checkpoint state manager
pub trait CheckpointStore: Send + Sync {
    /// Read the persisted active checkpoint hash, if one was ever written
    fn read_checkpoint_hash(&self) -> Result<Option<Hash256>, StoreError>;

    /// Persist the active checkpoint hash
    fn write_checkpoint_hash(&self, hash: &Hash256) -> Result<(), StoreError>;

    /// Read the persisted authority public key
    fn read_authority_key(&self) -> Result<Option<String>, StoreError>;

    /// Persist the authority public key
    fn write_authority_key(&self, key: &str) -> Result<(), StoreError>;

    /// Flush pending writes to durable storage
    fn flush(&self) -> Result<(), StoreError>;
}

/// Checkpoint store backed by a sled metadata tree
pub struct SledCheckpointStore {
    db: Db,
    metadata: Tree,
}

impl SledCheckpointStore {
    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// Wrap an already-open database handle, using its checkpoint
    /// metadata tree
    pub fn with_db(db: Db) -> Result<Self, StoreError> {
        let metadata = db.open_tree(CHECKPOINT_TREE)?;
        Ok(Self { db, metadata })
    }
}

impl CheckpointStore for SledCheckpointStore {
    fn read_checkpoint_hash(&self) -> Result<Option<Hash256>, StoreError> {
        match self.metadata.get(SYNC_CHECKPOINT_KEY)? {
            Some(value) => {
                if value.len() != 32 {
                    return Err(StoreError::Corrupt("sync_checkpoint".to_string()));
                }
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&value);
                Ok(Some(hash))
            }
            None => Ok(None),
        }
    }

    fn write_checkpoint_hash(&self, hash: &Hash256) -> Result<(), StoreError> {
        self.metadata.insert(SYNC_CHECKPOINT_KEY, &hash[..])?;
        Ok(())
    }

    fn read_authority_key(&self) -> Result<Option<String>, StoreError> {
        match self.metadata.get(AUTHORITY_KEY_KEY)? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|_| StoreError::Corrupt("checkpoint_pubkey".to_string())),
            None => Ok(None),
        }
    }

    fn write_authority_key(&self, key: &str) -> Result<(), StoreError> {
        self.metadata.insert(AUTHORITY_KEY_KEY, key.as_bytes())?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.metadata.flush()?;
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory checkpoint store for embedders without durable storage and
/// for tests
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    checkpoint_hash: Option<Hash256>,
    authority_key: Option<String>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn read_checkpoint_hash(&self) -> Result<Option<Hash256>, StoreError> {
        Ok(self.lock().checkpoint_hash)
    }

    fn write_checkpoint_hash(&self, hash: &Hash256) -> Result<(), StoreError> {
        self.lock().checkpoint_hash = Some(*hash);
        Ok(())
    }

    fn read_authority_key(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock().authority_key.clone())
    }

    fn write_authority_key(&self, key: &str) -> Result<(), StoreError> {
        self.lock().authority_key = Some(key.to_string());
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
