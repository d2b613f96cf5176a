//! Release: the `unlock` entry point and its two variants.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use latch_storage::error::StorageError;
use latch_storage::info::LockInformation;
use latch_storage::storage::CasPredicate;

use crate::error::LockError;
use crate::event::{Action, Event, EventType, actions};

use super::StorageLock;

impl StorageLock {
    /// Release one level of the hold on behalf of `owner_id`.
    ///
    /// A reentrant hold steps down one level and keeps the lease (and the
    /// watch dog) alive; releasing the last level marks the record released
    /// and stops the watch dog. Only version misses are retried; unlocking
    /// a lock held by someone else fails with [`LockError::NotOwner`] and
    /// is never retried.
    pub async fn unlock(
        &self,
        cancel: &CancellationToken,
        owner_id: &str,
    ) -> Result<(), LockError> {
        if owner_id.is_empty() {
            return Err(LockError::OwnerIdEmpty);
        }

        let root = self.root_event(EventType::Unlock, Some(owner_id));
        root.emit(Action::new(actions::UNLOCK_BEGIN)).await;

        let mut version_miss_count: u64 = 0;
        let result = loop {
            match self.try_unlock(&root, owner_id).await {
                Ok(()) => {
                    root.emit(
                        Action::new(actions::UNLOCK_SUCCESS)
                            .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
                    )
                    .await;
                    break Ok(());
                }
                Err(err) if !err.is_retryable() => {
                    root.emit(
                        Action::new(actions::UNLOCK_ERROR)
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
                        "release lost a CAS race, backing off"
                    );
                    root.emit(
                        Action::new(actions::UNLOCK_VERSION_MISS)
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
            Action::new(actions::UNLOCK_FINISH)
                .with_payload(actions::PAYLOAD_VERSION_MISS_COUNT, version_miss_count),
        )
        .await;
        result
    }

    /// One release attempt.
    async fn try_unlock(&self, root: &Event, owner_id: &str) -> Result<(), LockError> {
        let e = root.fork();

        let info = self
            .lock_information(&e)
            .await?
            .ok_or_else(|| StorageError::LockNotFound(self.options.lock_id.clone()))?;
        let e = e.fork().with_lock_information(info.clone());

        if info.owner_id != owner_id {
            e.emit(Action::new(actions::NOT_LOCK_OWNER)).await;
            return Err(LockError::NotOwner);
        }

        // A tombstone still names its last owner, so a double release lands
        // here rather than in the owner check. There is nothing left to
        // release.
        if info.lock_count == 0 {
            e.emit(Action::new(actions::LOCK_NOT_FOUND)).await;
            return Err(StorageError::LockNotFound(self.options.lock_id.clone()).into());
        }

        let mut updated = info.clone();
        updated.version = info.version.next();
        updated.lock_count = info.lock_count - 1;

        if updated.lock_count > 0 {
            self.unlock_reentry(&e, owner_id, &info, updated).await
        } else {
            self.unlock_release(&e, owner_id, &info, updated).await
        }
    }

    /// Step one level down while still holding; the lease is refreshed in
    /// passing and the watch dog keeps running.
    async fn unlock_reentry(
        &self,
        e: &Event,
        owner_id: &str,
        observed: &LockInformation,
        mut updated: LockInformation,
    ) -> Result<(), LockError> {
        e.emit(Action::new(actions::UNLOCK_REENTRY)).await;

        updated.lease_expire_time = self.lease_expire_time(e).await?;
        self.executor
            .update_with_version(
                e,
                &self.options.lock_id,
                &CasPredicate::owned(observed.version, owner_id),
                updated.version,
                &updated,
            )
            .await?;
        Ok(())
    }

    /// Release the last level: write the tombstone (count zero, owner left
    /// in place for the next acquirer's CAS), then stop the watch dog. The
    /// record is deliberately not deleted.
    async fn unlock_release(
        &self,
        e: &Event,
        owner_id: &str,
        observed: &LockInformation,
        updated: LockInformation,
    ) -> Result<(), LockError> {
        e.emit(Action::new(actions::UNLOCK_RELEASE)).await;

        self.executor
            .update_with_version(
                e,
                &self.options.lock_id,
                &CasPredicate::owned(observed.version, owner_id),
                updated.version,
                &updated,
            )
            .await?;

        self.stop_resident_watch_dog(e).await;
        Ok(())
    }
}
