//! End-to-end protocol tests against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use latch::error::LockError;
use latch::event::CollectingEventListener;
use latch::event::actions;
use latch::lock::StorageLock;
use latch::options::StorageLockOptions;
use latch::watchdog::{FnWatchDogFactory, WatchDog, WatchDogFactory};
use latch_storage::error::StorageError;
use latch_storage::info::{LockInformation, Version};
use latch_storage::storage::LockStorage;
use latch_storage::testing::ManualTimeProvider;
use latch_storage_memory::MemoryLockStorage;

struct NoopWatchDog;

#[async_trait]
impl WatchDog for NoopWatchDog {
    fn name(&self) -> &str {
        "noop-watch-dog"
    }
    fn id(&self) -> &str {
        "noop-watch-dog-0"
    }
    async fn start(&self) -> Result<(), LockError> {
        Ok(())
    }
    async fn stop(&self) -> Result<(), LockError> {
        Ok(())
    }
}

/// A factory for tests that need acquisitions without lease renewal.
fn noop_factory() -> Arc<dyn WatchDogFactory> {
    Arc::new(FnWatchDogFactory::new("noop-watch-dog", |_event, _context| {
        Box::pin(async { Ok(Box::new(NoopWatchDog) as Box<dyn WatchDog>) })
    }))
}

async fn stored(storage: &MemoryLockStorage, lock_id: &str) -> LockInformation {
    let json = storage
        .get(lock_id)
        .await
        .expect("get should succeed")
        .expect("record should exist");
    LockInformation::from_json(&json).expect("stored record should parse")
}

#[tokio::test]
async fn lifecycle_matches_protocol() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock = StorageLock::with_lock_id(Arc::clone(&storage) as _, "resource")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    // Fresh acquisition.
    lock.lock(&cancel, "a").await.unwrap();
    let info = stored(&storage, "resource").await;
    assert_eq!(info.owner_id, "a");
    assert_eq!(info.version, Version::new(1));
    assert_eq!(info.lock_count, 1);

    // Reentry by the same owner.
    lock.lock(&cancel, "a").await.unwrap();
    let info = stored(&storage, "resource").await;
    assert_eq!(info.version, Version::new(2));
    assert_eq!(info.lock_count, 2);

    // Two releases: the second writes the tombstone.
    lock.unlock(&cancel, "a").await.unwrap();
    lock.unlock(&cancel, "a").await.unwrap();
    let info = stored(&storage, "resource").await;
    assert_eq!(info.version, Version::new(4));
    assert_eq!(info.lock_count, 0);
    assert_eq!(info.owner_id, "a", "tombstone keeps the last owner");

    // A different owner reclaims the released slot via CAS update.
    let lock_b = StorageLock::with_lock_id(Arc::clone(&storage) as _, "resource")
        .await
        .unwrap();
    lock_b.lock(&cancel, "b").await.unwrap();
    let info = stored(&storage, "resource").await;
    assert_eq!(info.version, Version::new(5));
    assert_eq!(info.owner_id, "b");
    assert_eq!(info.lock_count, 1);
}

#[tokio::test]
async fn nested_holds_balance_out() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock = StorageLock::with_lock_id(Arc::clone(&storage) as _, "nested")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let depth = 4;
    for _ in 0..depth {
        lock.lock(&cancel, "a").await.unwrap();
    }
    for _ in 0..depth {
        lock.unlock(&cancel, "a").await.unwrap();
    }

    let info = stored(&storage, "nested").await;
    assert_eq!(info.lock_count, 0);
    assert_eq!(
        info.version,
        Version::new(2 * depth),
        "every lock/unlock pair costs exactly two versions"
    );
}

#[tokio::test]
async fn busy_foreign_lock_is_surfaced() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock_a = StorageLock::with_lock_id(Arc::clone(&storage) as _, "busy")
        .await
        .unwrap();
    let lock_b = StorageLock::with_lock_id(Arc::clone(&storage) as _, "busy")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock_a.lock(&cancel, "a").await.unwrap();
    let err = lock_b.lock(&cancel, "b").await.unwrap_err();
    assert!(matches!(err, LockError::Busy));

    // The holder is unaffected.
    let info = stored(&storage, "busy").await;
    assert_eq!(info.owner_id, "a");
    assert_eq!(info.lock_count, 1);
}

#[tokio::test]
async fn unlock_by_non_owner_is_rejected() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock_a = StorageLock::with_lock_id(Arc::clone(&storage) as _, "owned")
        .await
        .unwrap();
    let lock_b = StorageLock::with_lock_id(Arc::clone(&storage) as _, "owned")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock_a.lock(&cancel, "a").await.unwrap();
    let before = stored(&storage, "owned").await;

    let err = lock_b.unlock(&cancel, "b").await.unwrap_err();
    assert!(matches!(err, LockError::NotOwner));

    let after = stored(&storage, "owned").await;
    assert_eq!(before, after, "a failed unlock must not change state");
}

#[tokio::test]
async fn expired_lease_is_reclaimable() {
    let clock = Arc::new(ManualTimeProvider::default());
    let storage = Arc::new(MemoryLockStorage::with_time_provider(
        Arc::clone(&clock) as _
    ));
    let cancel = CancellationToken::new();

    // No renewal: the holder's lease must be allowed to lapse.
    let options = StorageLockOptions::new("expiring")
        .with_lease_expire_after(Duration::from_secs(3))
        .with_lease_refresh_interval(Duration::from_secs(1))
        .with_watch_dog_factory(noop_factory());
    let lock_a = StorageLock::new(Arc::clone(&storage) as _, options.clone())
        .await
        .unwrap();
    lock_a.lock(&cancel, "a").await.unwrap();

    clock.advance(Duration::from_secs(5));

    let lock_b = StorageLock::new(Arc::clone(&storage) as _, options)
        .await
        .unwrap();
    lock_b.lock(&cancel, "b").await.unwrap();

    let info = stored(&storage, "expiring").await;
    assert_eq!(info.owner_id, "b", "expired lease is anyone's to take");
    assert_eq!(info.version, Version::new(2));

    // The previous holder lost ownership along with the lease.
    let err = lock_a.unlock(&cancel, "a").await.unwrap_err();
    assert!(matches!(err, LockError::NotOwner));
}

#[tokio::test]
async fn racing_acquirers_yield_exactly_one_winner() {
    let storage = Arc::new(MemoryLockStorage::new());
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for owner in ["a", "b", "c", "d", "e"] {
        let storage = Arc::clone(&storage);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let lock = StorageLock::with_lock_id(storage as _, "contested")
                .await
                .unwrap();
            lock.lock(&cancel, owner).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(()) => winners += 1,
            Err(LockError::Busy | LockError::Storage(_)) => {}
            Err(other) => panic!("unexpected loser error: {other}"),
        }
    }
    assert_eq!(winners, 1, "mutual exclusion must hold under contention");

    let info = stored(&storage, "contested").await;
    assert_eq!(info.lock_count, 1);
}

#[tokio::test]
async fn double_release_reports_nothing_to_release() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock = StorageLock::with_lock_id(Arc::clone(&storage) as _, "double")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock.lock(&cancel, "a").await.unwrap();
    lock.unlock(&cancel, "a").await.unwrap();

    let err = lock.unlock(&cancel, "a").await.unwrap_err();
    assert!(matches!(
        err,
        LockError::Storage(StorageError::LockNotFound(_))
    ));
}

#[tokio::test]
async fn unlock_of_never_taken_lock_is_not_found() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock = StorageLock::with_lock_id(storage as _, "ghost")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let err = lock.unlock(&cancel, "a").await.unwrap_err();
    assert!(matches!(
        err,
        LockError::Storage(StorageError::LockNotFound(_))
    ));
}

#[tokio::test]
async fn empty_owner_id_is_rejected() {
    let storage = Arc::new(MemoryLockStorage::new());
    let lock = StorageLock::with_lock_id(storage as _, "no-owner")
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    assert!(matches!(
        lock.lock(&cancel, "").await.unwrap_err(),
        LockError::OwnerIdEmpty
    ));
    assert!(matches!(
        lock.unlock(&cancel, "").await.unwrap_err(),
        LockError::OwnerIdEmpty
    ));
}

#[tokio::test]
async fn watch_dog_failure_rolls_the_acquisition_back() {
    let storage = Arc::new(MemoryLockStorage::new());
    let failing_factory: Arc<dyn WatchDogFactory> =
        Arc::new(FnWatchDogFactory::new("failing-factory", |_event, _context| {
            Box::pin(async { Err(LockError::WatchDog("construction refused".to_owned())) })
        }));
    let options = StorageLockOptions::new("rollback").with_watch_dog_factory(failing_factory);
    let lock = StorageLock::new(Arc::clone(&storage) as _, options)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let err = lock.lock(&cancel, "a").await.unwrap_err();
    assert!(matches!(err, LockError::WatchDog(_)));

    // The just-written record was rolled back to a released tombstone, so
    // another owner can take the lock immediately.
    let info = stored(&storage, "rollback").await;
    assert_eq!(info.lock_count, 0);

    let healthy = StorageLock::with_lock_id(Arc::clone(&storage) as _, "rollback")
        .await
        .unwrap();
    healthy.lock(&cancel, "b").await.unwrap();
    assert_eq!(stored(&storage, "rollback").await.owner_id, "b");
}

#[tokio::test(start_paused = true)]
async fn watch_dog_keeps_the_lease_alive() {
    let storage = Arc::new(MemoryLockStorage::new());
    let options = StorageLockOptions::new("renewed")
        .with_lease_expire_after(Duration::from_secs(3))
        .with_lease_refresh_interval(Duration::from_secs(1));
    let lock = StorageLock::new(Arc::clone(&storage) as _, options)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock.lock(&cancel, "a").await.unwrap();
    let at_acquisition = stored(&storage, "renewed").await;

    // Let several renewal beats pass.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let renewed = stored(&storage, "renewed").await;
    assert!(
        renewed.version > at_acquisition.version,
        "renewals must bump the version"
    );
    assert!(
        renewed.lease_expire_time > at_acquisition.lease_expire_time,
        "renewals must push the lease deadline out"
    );
    assert_eq!(renewed.lock_count, 1, "renewals never touch the hold depth");
    assert_eq!(renewed.owner_id, "a");

    lock.unlock(&cancel, "a").await.unwrap();
}

#[tokio::test]
async fn reentrant_unlock_keeps_the_watch_dog() {
    let listener = Arc::new(CollectingEventListener::new());
    let storage = Arc::new(MemoryLockStorage::new());
    let options = StorageLockOptions::new("staged")
        .with_event_listener(Arc::clone(&listener) as _);
    let lock = StorageLock::new(Arc::clone(&storage) as _, options)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock.lock(&cancel, "a").await.unwrap();
    lock.lock(&cancel, "a").await.unwrap();

    lock.unlock(&cancel, "a").await.unwrap();
    let names = listener.action_names().await;
    assert!(
        !names.iter().any(|n| n == actions::WATCH_DOG_STOP),
        "stepping down one level must not stop the watch dog"
    );

    lock.unlock(&cancel, "a").await.unwrap();
    let names = listener.action_names().await;
    assert!(
        names.iter().any(|n| n == actions::WATCH_DOG_STOP),
        "the final release must stop the watch dog"
    );
}

#[tokio::test]
async fn event_stream_tracks_an_acquisition() {
    let listener = Arc::new(CollectingEventListener::new());
    let storage = Arc::new(MemoryLockStorage::new());
    let options = StorageLockOptions::new("observed")
        .with_event_listener(Arc::clone(&listener) as _);
    let lock = StorageLock::new(Arc::clone(&storage) as _, options)
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    lock.lock(&cancel, "a").await.unwrap();

    let names = listener.action_names().await;
    for expected in [
        actions::LOCK_BEGIN,
        actions::LOCK_TRY_BEGIN,
        actions::LOCK_NOT_EXISTS,
        actions::STORAGE_CREATE,
        actions::LOCK_SUCCESS,
        actions::LOCK_FINISH,
    ] {
        assert!(
            names.iter().any(|n| n == expected),
            "missing action {expected} in {names:?}"
        );
    }

    // Every event in the stream belongs to this lock and storage.
    for event in listener.events().await {
        assert_eq!(event.lock_id, "observed");
        assert_eq!(event.storage_name, "memory-storage");
    }
}

#[tokio::test]
async fn cancelled_caller_stops_retrying() {
    let clock = Arc::new(ManualTimeProvider::default());
    let storage = Arc::new(MemoryLockStorage::with_time_provider(
        Arc::clone(&clock) as _
    ));
    let cancel = CancellationToken::new();

    // Owner a holds the lock; its lease stays live for the whole test.
    let lock_a = StorageLock::with_lock_id(Arc::clone(&storage) as _, "held")
        .await
        .unwrap();
    lock_a.lock(&cancel, "a").await.unwrap();

    // A deadline-bounded attempt against a busy lock comes back Busy
    // without waiting for the deadline; busy is the caller's problem.
    let lock_b = StorageLock::with_lock_id(Arc::clone(&storage) as _, "held")
        .await
        .unwrap();
    let err = lock_b
        .lock_with_timeout("b", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Busy));
}
