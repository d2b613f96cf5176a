//! Acquisition: the `lock` entry point and its decision branches.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use latch_storage::error::StorageError;
use latch_storage::info::{LockInformation, Version};
use latch_storage::storage::CasPredicate;

use crate::error::LockError;
use crate::event::{Action, Event, actions};
use crate::watchdog::RefreshContext;

use super::StorageLock;

impl StorageLock {
    /// Acquire the lock on behalf of `owner_id`.
    ///
    /// Blocks (asynchronously) until the lock is acquired, a non-retryable
    /// error occurs, or `cancel` fires. Version misses are absorbed and
    /// retried with jittered backoff; a lock held by another unexpired
    /// owner surfaces as [`LockError::Busy`] for the caller to apply its
    /// own wait policy.
    ///
    /// Reentrant: a second `lock` by the current owner deepens the hold
    /// instead of blocking, and must be matched by one `unlock` per
    /// acquisition.
    pub async fn lock(&self, cancel: &CancellationToken, owner_id: &str) -> Result<(), LockError> {
        if owner_id.is_empty() {
            return Err(LockError::OwnerIdEmpty);
        }

        let root = self.root_event(crate::event::EventType::Lock, Some(owner_id));
        root.emit(Action::new(actions::LOCK_BEGIN)).await;

        let mut version_miss_count: u64 = 0;
        let result = loop {
            match self.try_lock(&root, owner_id).await {
                Ok(()) => {
                    root.emit(
                        Action::new(actions::LOCK_SUCCESS)
                            .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
                    )
                    .await;
                    break Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    root.emit(
                        Action::new(actions::LOCK_ERROR)
                            .with_error(&err)
                            .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
                    )
                    .await;
                    break Err(err);
                }
                Err(err) => {
                    version_miss_count += 1;
                    debug!(
                        lock_id = %self.options.lock_id,
                        owner_id,
                        version_miss_count,
                        "acquisition lost a CAS race, backing off"
                    );
                    root.emit(
                        Action::new(actions::LOCK_VERSION_MISS)
                            .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
                    )
                    .await;

                    let sleep = self.retry_sleep();
                    root.emit(Action::new(actions::SLEEP).with_payload(
                        actions::PAYLOAD_SLEEP_MICROS,
                        u64::try_from(sleep.as_micros()).unwrap_or(u64::MAX),
                    ))
                    .await;
                    tokio::select! {
                        () = cancel.cancelled() => {}
                        () = tokio::time::sleep(sleep) => {}
                    }

                    if cancel.is_cancelled() {
                        root.emit(
                            Action::new(actions::TIMEOUT).with_payload(
                                actions::PAYLOAD_VERSION_MISS_COUNT,
                                version_miss_count,
                            ),
                        )
                        .await;
                        break Err(err);
                    }
                    root.emit(
                        Action::new(actions::SLEEP_RETRY)
                            .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
                    )
                    .await;
                }
            }
        };

        root.emit(
            Action::new(actions::LOCK_FINISH)
                .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
        )
        .await;
        result
    }

    /// One acquisition attempt: read, classify, commit with a single CAS.
    async fn try_lock(&self, root: &Event, owner_id: &str) -> Result<(), LockError> {
        let e = root.fork();
        e.emit(Action::new(actions::LOCK_TRY_BEGIN)).await;

        match self.lock_information(&e).await? {
            Some(info) => self.lock_exists(&e, owner_id, info).await,
            None => self.lock_not_exists(&e, owner_id).await,
        }
    }

    async fn lock_exists(
        &self,
        e: &Event,
        owner_id: &str,
        info: LockInformation,
    ) -> Result<(), LockError> {
        let e = e.fork().with_lock_information(info.clone());
        e.emit(Action::new(actions::LOCK_EXISTS)).await;

        let storage_time = self.executor.get_time(&e).await?;

        // A cleanly released record is the common fast path and takes
        // priority over the expiry check, which in turn precedes the
        // reentry check.
        if info.lock_count == 0 {
            return self
                .reclaim(&e, owner_id, storage_time, &info, actions::LOCK_RELEASED)
                .await;
        }
        if storage_time > info.lease_expire_time {
            return self
                .reclaim(&e, owner_id, storage_time, &info, actions::LOCK_EXPIRED)
                .await;
        }
        if info.owner_id == owner_id {
            return self.reenter(&e, owner_id, &info).await;
        }

        // Held by someone else with a live lease. No sleeping here; the
        // caller decides how to wait for a busy foreign lock.
        e.emit(Action::new(actions::LOCK_BUSY)).await;
        Err(LockError::Busy)
    }

    /// Take over a released or expired record. The storage write is the
    /// same either way; `classification` only labels the event. Two
    /// contenders concluding "expired" at once cannot both win: the CAS on
    /// the observed version rejects the loser.
    async fn reclaim(
        &self,
        e: &Event,
        owner_id: &str,
        storage_time: DateTime<Utc>,
        observed: &LockInformation,
        classification: &'static str,
    ) -> Result<(), LockError> {
        let info = LockInformation {
            lock_id: self.options.lock_id.clone(),
            owner_id: owner_id.to_owned(),
            version: observed.version.next(),
            lock_count: 1,
            lock_begin_time: storage_time,
            lease_expire_time: storage_time + self.lease_delta(),
        };
        e.fork()
            .with_lock_information(info.clone())
            .action(Action::new(classification))
            .publish()
            .await;

        self.executor
            .update_with_version(
                e,
                &self.options.lock_id,
                &CasPredicate::version(observed.version),
                info.version,
                &info,
            )
            .await?;
        self.install_watch_dog(e, owner_id, &info).await
    }

    /// Deepen a hold we already own: bump the count, refresh the lease.
    async fn reenter(
        &self,
        e: &Event,
        owner_id: &str,
        observed: &LockInformation,
    ) -> Result<(), LockError> {
        e.emit(Action::new(actions::LOCK_REENTRY)).await;

        let expire_time = self.lease_expire_time(e).await?;
        let mut info = observed.clone();
        info.version = observed.version.next();
        info.lock_count = observed.lock_count + 1;
        info.lease_expire_time = expire_time;

        self.executor
            .update_with_version(
                e,
                &self.options.lock_id,
                &CasPredicate::owned(observed.version, owner_id),
                info.version,
                &info,
            )
            .await?;
        Ok(())
    }

    /// First acquisition of a lock id that has no record yet.
    async fn lock_not_exists(&self, e: &Event, owner_id: &str) -> Result<(), LockError> {
        e.emit(Action::new(actions::LOCK_NOT_EXISTS)).await;

        let storage_time = self.executor.get_time(e).await?;
        let info = LockInformation {
            lock_id: self.options.lock_id.clone(),
            owner_id: owner_id.to_owned(),
            version: Version::INITIAL,
            lock_count: 1,
            lock_begin_time: storage_time,
            lease_expire_time: storage_time + self.lease_delta(),
        };

        self.executor
            .create_with_version(e, &self.options.lock_id, info.version, &info)
            .await
            .map_err(|err| match err {
                // The record appeared between our read and our create;
                // re-classify on the next attempt.
                StorageError::LockAlreadyExists(_) => {
                    StorageError::version_miss(&self.options.lock_id, Version::INITIAL)
                }
                other => other,
            })?;
        self.install_watch_dog(e, owner_id, &info).await
    }

    /// Start the lease renewer for a record we just wrote. A stale handle
    /// from a previous acquisition is stopped first; a factory or start
    /// failure rolls the acquisition back before surfacing.
    async fn install_watch_dog(
        &self,
        e: &Event,
        owner_id: &str,
        info: &LockInformation,
    ) -> Result<(), LockError> {
        self.stop_resident_watch_dog(e).await;

        let context = RefreshContext {
            executor: self.executor.clone(),
            lock_id: self.options.lock_id.clone(),
            owner_id: owner_id.to_owned(),
            lease_expire_after: self.options.lease_expire_after,
            lease_refresh_interval: self.options.lease_refresh_interval,
        };

        let dog = match self.options.watch_dog_factory.create(e, context).await {
            Ok(dog) => {
                e.fork()
                    .with_watch_dog_id(dog.id())
                    .action(Action::new(actions::WATCH_DOG_CREATE_SUCCESS))
                    .publish()
                    .await;
                dog
            }
            Err(err) => {
                e.emit(Action::new(actions::WATCH_DOG_CREATE_ERROR).with_error(&err))
                    .await;
                self.rollback(e, owner_id, info).await;
                return Err(err);
            }
        };

        if let Err(err) = dog.start().await {
            e.emit(Action::new(actions::WATCH_DOG_START_ERROR).with_error(&err))
                .await;
            self.rollback(e, owner_id, info).await;
            return Err(err);
        }
        e.fork()
            .with_watch_dog_id(dog.id())
            .action(Action::new(actions::WATCH_DOG_START_SUCCESS))
            .publish()
            .await;

        self.set_watch_dog(dog).await;
        Ok(())
    }

    /// Best-effort release of a record we just wrote but cannot keep. If
    /// the write fails the record simply expires on its own.
    async fn rollback(&self, e: &Event, owner_id: &str, info: &LockInformation) {
        e.emit(Action::new(actions::LOCK_ROLLBACK)).await;

        let mut released = info.clone();
        released.version = info.version.next();
        released.lock_count = 0;

        let result = self
            .executor
            .update_with_version(
                e,
                &self.options.lock_id,
                &CasPredicate::owned(info.version, owner_id),
                released.version,
                &released,
            )
            .await;
        match result {
            Ok(()) => e.emit(Action::new(actions::LOCK_ROLLBACK_SUCCESS)).await,
            Err(err) => {
                e.emit(Action::new(actions::LOCK_ROLLBACK_ERROR).with_error(&err))
                    .await;
            }
        }
    }
}
