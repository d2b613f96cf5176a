use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::stream::{self, BoxStream};

use latch_storage::error::StorageError;
use latch_storage::info::{LockInformation, Version};
use latch_storage::storage::{CasPredicate, LockStorage};
use latch_storage::time::{SystemTimeProvider, TimeProvider};

/// What the map actually stores: the indexed attributes next to the JSON
/// blob, mirroring the columns a relational adapter would keep.
#[derive(Debug, Clone)]
struct StoredLock {
    version: Version,
    owner_id: String,
    json: String,
}

impl StoredLock {
    fn matches(&self, predicate: &CasPredicate) -> bool {
        self.version == predicate.version
            && predicate
                .owner_id
                .as_ref()
                .is_none_or(|owner| *owner == self.owner_id)
    }
}

/// [`LockStorage`] backed by a [`DashMap`].
///
/// The per-shard locks of the map make every operation atomic; entry-level
/// access gives the compare-and-swap semantics the contract requires. The
/// clock defaults to the process clock, which is fine here because every
/// participant lives in the same process.
pub struct MemoryLockStorage {
    locks: DashMap<String, StoredLock>,
    clock: Arc<dyn TimeProvider>,
}

impl MemoryLockStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::with_time_provider(Arc::new(SystemTimeProvider))
    }

    /// Use an explicit time source instead of the process clock.
    #[must_use]
    pub fn with_time_provider(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            locks: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryLockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStorage for MemoryLockStorage {
    fn name(&self) -> &str {
        "memory-storage"
    }

    async fn init(&self) -> Result<(), StorageError> {
        // The map is ready from construction.
        Ok(())
    }

    async fn get(&self, lock_id: &str) -> Result<Option<String>, StorageError> {
        Ok(self.locks.get(lock_id).map(|entry| entry.json.clone()))
    }

    async fn create_with_version(
        &self,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        match self.locks.entry(lock_id.to_owned()) {
            Entry::Occupied(_) => Err(StorageError::LockAlreadyExists(lock_id.to_owned())),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredLock {
                    version,
                    owner_id: info.owner_id.clone(),
                    json: info.to_json()?,
                });
                Ok(())
            }
        }
    }

    async fn update_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError> {
        match self.locks.entry(lock_id.to_owned()) {
            Entry::Vacant(_) => Err(StorageError::LockNotFound(lock_id.to_owned())),
            Entry::Occupied(mut occupied) => {
                if !occupied.get().matches(expected) {
                    return Err(StorageError::version_miss(lock_id, expected.version));
                }
                occupied.insert(StoredLock {
                    version: new_version,
                    owner_id: info.owner_id.clone(),
                    json: info.to_json()?,
                });
                Ok(())
            }
        }
    }

    async fn delete_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        _info: &LockInformation,
    ) -> Result<(), StorageError> {
        match self.locks.entry(lock_id.to_owned()) {
            Entry::Vacant(_) => Err(StorageError::LockNotFound(lock_id.to_owned())),
            Entry::Occupied(occupied) => {
                if !occupied.get().matches(expected) {
                    return Err(StorageError::version_miss(lock_id, expected.version));
                }
                occupied.remove();
                Ok(())
            }
        }
    }

    async fn get_time(&self) -> Result<DateTime<Utc>, StorageError> {
        self.clock.now().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn list(
        &self,
    ) -> Result<BoxStream<'_, Result<LockInformation, StorageError>>, StorageError> {
        let records: Vec<Result<LockInformation, StorageError>> = self
            .locks
            .iter()
            .map(|entry| LockInformation::from_json(&entry.json))
            .collect();
        Ok(Box::pin(stream::iter(records)))
    }
}
