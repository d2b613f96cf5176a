//! Conformance test suite for storage adapters.
//!
//! Call [`run_storage_conformance_tests`] from your backend's test module
//! with a fresh, initialized storage instance. Every adapter in this
//! workspace runs the same suite; out-of-tree adapters should too.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;

use crate::error::StorageError;
use crate::info::{LockInformation, Version};
use crate::storage::{CasPredicate, LockStorage};
use crate::time::TimeProvider;

/// A hand-cranked clock for tests.
///
/// Storage adapters that take an injected [`TimeProvider`] can be driven
/// through lease-expiry scenarios without real waiting.
pub struct ManualTimeProvider {
    now: Mutex<DateTime<Utc>>,
}

impl ManualTimeProvider {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if `delta` overflows the representable time range.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += chrono::TimeDelta::from_std(delta).expect("delta out of range");
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl TimeProvider for ManualTimeProvider {
    async fn now(&self) -> Result<DateTime<Utc>, StorageError> {
        Ok(*self.now.lock().expect("clock mutex poisoned"))
    }
}

async fn sample_info(
    storage: &dyn LockStorage,
    lock_id: &str,
    owner_id: &str,
    version: Version,
) -> Result<LockInformation, StorageError> {
    let now = storage.get_time().await?;
    Ok(LockInformation {
        lock_id: lock_id.to_owned(),
        owner_id: owner_id.to_owned(),
        version,
        lock_count: 1,
        lock_begin_time: now,
        lease_expire_time: now + chrono::TimeDelta::seconds(300),
    })
}

async fn stored(
    storage: &dyn LockStorage,
    lock_id: &str,
) -> Result<Option<LockInformation>, StorageError> {
    match storage.get(lock_id).await? {
        Some(json) => Ok(Some(LockInformation::from_json(&json)?)),
        None => Ok(None),
    }
}

/// Run the full storage conformance test suite.
///
/// # Errors
///
/// Returns an error if any storage operation fails unexpectedly.
///
/// # Panics
///
/// Panics when the adapter violates the storage contract.
pub async fn run_storage_conformance_tests(
    storage: &dyn LockStorage,
) -> Result<(), StorageError> {
    assert!(!storage.name().is_empty(), "storage name must be non-empty");

    test_init_is_idempotent(storage).await?;
    test_get_missing(storage).await?;
    test_create_and_get(storage).await?;
    test_create_duplicate_rejected(storage).await?;
    test_update_with_matching_predicate(storage).await?;
    test_update_with_stale_version(storage).await?;
    test_update_with_wrong_owner(storage).await?;
    test_reclaim_changes_owner(storage).await?;
    test_delete_with_version(storage).await?;
    test_time_moves_forward(storage).await?;
    test_list_contains_created(storage).await?;
    Ok(())
}

async fn test_init_is_idempotent(storage: &dyn LockStorage) -> Result<(), StorageError> {
    storage.init().await?;
    storage.init().await?;
    Ok(())
}

async fn test_get_missing(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let record = storage.get("conformance-missing").await?;
    assert!(record.is_none(), "get on a missing lock should return None");
    Ok(())
}

async fn test_create_and_get(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let info = sample_info(storage, "conformance-create", "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version("conformance-create", Version::INITIAL, &info)
        .await?;

    let back = stored(storage, "conformance-create")
        .await?
        .expect("created record should be readable");
    assert_eq!(back, info, "stored record should round-trip");
    Ok(())
}

async fn test_create_duplicate_rejected(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let info = sample_info(storage, "conformance-dup", "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version("conformance-dup", Version::INITIAL, &info)
        .await?;

    let err = storage
        .create_with_version("conformance-dup", Version::INITIAL, &info)
        .await
        .expect_err("second create for the same lock id must fail");
    assert!(
        err.is_retryable(),
        "duplicate create must surface as a retryable race, got: {err}"
    );
    Ok(())
}

async fn test_update_with_matching_predicate(
    storage: &dyn LockStorage,
) -> Result<(), StorageError> {
    let lock_id = "conformance-update";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    let mut updated = info.clone();
    updated.version = info.version.next();
    updated.lock_count = 2;
    storage
        .update_with_version(
            lock_id,
            &CasPredicate::owned(info.version, "owner-a"),
            updated.version,
            &updated,
        )
        .await?;

    let back = stored(storage, lock_id).await?.expect("record exists");
    assert_eq!(back.version, Version::new(2));
    assert_eq!(back.lock_count, 2);
    Ok(())
}

async fn test_update_with_stale_version(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let lock_id = "conformance-stale";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    let mut updated = info.clone();
    updated.version = Version::new(9);
    let err = storage
        .update_with_version(
            lock_id,
            &CasPredicate::version(Version::new(8)),
            updated.version,
            &updated,
        )
        .await
        .expect_err("stale version must not update");
    assert!(
        matches!(err, StorageError::VersionMiss { .. }),
        "expected VersionMiss, got: {err}"
    );

    let back = stored(storage, lock_id).await?.expect("record exists");
    assert_eq!(back.version, Version::INITIAL, "record must be unchanged");
    Ok(())
}

async fn test_update_with_wrong_owner(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let lock_id = "conformance-wrong-owner";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    let mut updated = info.clone();
    updated.version = info.version.next();
    let err = storage
        .update_with_version(
            lock_id,
            &CasPredicate::owned(info.version, "owner-b"),
            updated.version,
            &updated,
        )
        .await
        .expect_err("owner mismatch must not update");
    assert!(
        matches!(err, StorageError::VersionMiss { .. }),
        "expected VersionMiss, got: {err}"
    );
    Ok(())
}

async fn test_reclaim_changes_owner(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let lock_id = "conformance-reclaim";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    // A reclaim matches on version alone and installs a new owner.
    let mut reclaimed = sample_info(storage, lock_id, "owner-b", info.version.next()).await?;
    reclaimed.lock_count = 1;
    storage
        .update_with_version(
            lock_id,
            &CasPredicate::version(info.version),
            reclaimed.version,
            &reclaimed,
        )
        .await?;

    let back = stored(storage, lock_id).await?.expect("record exists");
    assert_eq!(back.owner_id, "owner-b");
    Ok(())
}

async fn test_delete_with_version(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let lock_id = "conformance-delete";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    let err = storage
        .delete_with_version(lock_id, &CasPredicate::version(Version::new(5)), &info)
        .await
        .expect_err("stale version must not delete");
    assert!(matches!(err, StorageError::VersionMiss { .. }));

    storage
        .delete_with_version(
            lock_id,
            &CasPredicate::owned(info.version, "owner-a"),
            &info,
        )
        .await?;
    assert!(
        storage.get(lock_id).await?.is_none(),
        "deleted record should be gone"
    );
    Ok(())
}

async fn test_time_moves_forward(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let first = storage.get_time().await?;
    let second = storage.get_time().await?;
    assert!(
        second >= first,
        "storage time must be monotone relative to its own answers"
    );
    Ok(())
}

async fn test_list_contains_created(storage: &dyn LockStorage) -> Result<(), StorageError> {
    let lock_id = "conformance-list";
    let info = sample_info(storage, lock_id, "owner-a", Version::INITIAL).await?;
    storage
        .create_with_version(lock_id, Version::INITIAL, &info)
        .await?;

    let records: Vec<LockInformation> = storage.list().await?.try_collect().await?;
    assert!(
        records.iter().any(|r| r.lock_id == lock_id),
        "list should include the created record"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_advances() {
        let clock = ManualTimeProvider::default();
        let a = clock.now().await.unwrap();
        clock.advance(Duration::from_secs(90));
        let b = clock.now().await.unwrap();
        assert_eq!(b - a, chrono::TimeDelta::seconds(90));
    }
}
