use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::StorageError;
use crate::info::{LockInformation, Version};

/// Predicate for a conditional write against a stored lock record.
///
/// The version is always matched. The owner is matched in addition when the
/// caller supplies one: in-owner mutations (reentry, lease refresh, unlock)
/// pin the record to its current holder, while reclaims of released or
/// expired records match on version alone because they change the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CasPredicate {
    /// The version the stored record must carry for the write to apply.
    pub version: Version,

    /// When present, the stored record's owner must also match.
    pub owner_id: Option<String>,
}

impl CasPredicate {
    /// Match on version alone (reclaim paths).
    #[must_use]
    pub fn version(version: Version) -> Self {
        Self {
            version,
            owner_id: None,
        }
    }

    /// Match on version and current owner (in-owner mutations).
    #[must_use]
    pub fn owned(version: Version, owner_id: impl Into<String>) -> Self {
        Self {
            version,
            owner_id: Some(owner_id.into()),
        }
    }
}

/// Pluggable persistence for lock records, plus the shared time source the
/// protocol depends on.
///
/// Implementations must be safe for concurrent use; the storage is the
/// serialization point of the whole protocol. Cancellation is Rust-native:
/// dropping a pending future abandons the call, and callers that need a
/// deadline wrap individual operations in [`tokio::time::timeout`].
#[async_trait]
pub trait LockStorage: Send + Sync {
    /// Identifier of this backend, used to tag emitted events. Must be
    /// non-empty.
    fn name(&self) -> &str;

    /// Prepare the backend for use (create tables, collections,
    /// directories). Must be idempotent; called once per storage
    /// construction but safe to call again.
    async fn init(&self) -> Result<(), StorageError>;

    /// Read the latest committed record for `lock_id` as its JSON wire form.
    /// `None` means no record exists.
    async fn get(&self, lock_id: &str) -> Result<Option<String>, StorageError>;

    /// Insert the first record for `lock_id` at the given version
    /// (conventionally [`Version::INITIAL`]).
    ///
    /// Must fail with [`StorageError::LockAlreadyExists`] (or
    /// [`StorageError::VersionMiss`]) if any record for this lock id is
    /// already present, typically via a unique-key constraint.
    async fn create_with_version(
        &self,
        lock_id: &str,
        version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// Atomically replace the record iff it matches `expected`, bumping it
    /// to `new_version`. A predicate mismatch yields
    /// [`StorageError::VersionMiss`].
    async fn update_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        new_version: Version,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// Atomically delete the record iff it matches `expected`. A predicate
    /// mismatch yields [`StorageError::VersionMiss`]. The protocol does not
    /// delete on normal release; this exists for administrative cleanup.
    async fn delete_with_version(
        &self,
        lock_id: &str,
        expected: &CasPredicate,
        info: &LockInformation,
    ) -> Result<(), StorageError>;

    /// The storage-side clock, monotone relative to its own issued
    /// timestamps. This is the single authoritative time source for every
    /// protocol comparison; clients never consult their own wall clock.
    async fn get_time(&self) -> Result<DateTime<Utc>, StorageError>;

    /// Release backend resources.
    async fn close(&self) -> Result<(), StorageError>;

    /// All records held by this storage, as a finite, non-restartable
    /// stream. Diagnostics only.
    async fn list(&self)
    -> Result<BoxStream<'_, Result<LockInformation, StorageError>>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Object safety: the lock core holds adapters as `Arc<dyn LockStorage>`.
    fn _assert_dyn_lock_storage(_: &dyn LockStorage) {}

    #[test]
    fn cas_predicate_constructors() {
        let p = CasPredicate::version(Version::new(4));
        assert_eq!(p.version, Version::new(4));
        assert!(p.owner_id.is_none());

        let p = CasPredicate::owned(Version::new(4), "me");
        assert_eq!(p.owner_id.as_deref(), Some("me"));
    }
}
