//! The lock state machine.
//!
//! A [`StorageLock`] binds one lock id to one storage backend. Acquisition
//! reads the current record, classifies the situation (absent, released,
//! expired, self-held, busy) and commits its decision with a single
//! compare-and-swap write; version misses are retried with randomized
//! backoff until the caller's cancellation token fires. Every successful
//! acquisition starts a watch dog that keeps the lease alive until release.
//!
//! One instance may be shared behind an `Arc`, but concurrent `lock`/`unlock`
//! calls on the same instance should be externally serialized: the instance
//! tracks a single watch-dog handle, so interleaved acquisitions for
//! different owners would fight over it. Separate instances over the same
//! storage coordinate freely; the storage is the serialization point.

mod acquire;
mod release;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use latch_storage::error::StorageError;
use latch_storage::info::LockInformation;
use latch_storage::storage::LockStorage;

use crate::error::LockError;
use crate::event::{Action, Event, EventType, actions};
use crate::executor::StorageExecutor;
use crate::options::{OptionsError, StorageLockOptions};
use crate::watchdog::WatchDog;

/// A distributed, reentrant, leased mutex over a pluggable storage backend.
pub struct StorageLock {
    executor: StorageExecutor,
    options: StorageLockOptions,
    watch_dog: Mutex<Option<Box<dyn WatchDog>>>,
}

impl StorageLock {
    /// Build a lock over `storage` with the given options.
    ///
    /// # Errors
    ///
    /// Returns an [`OptionsError`] when the options fail validation.
    pub async fn new(
        storage: Arc<dyn LockStorage>,
        options: StorageLockOptions,
    ) -> Result<Self, OptionsError> {
        options.validate()?;
        let lock = Self {
            executor: StorageExecutor::new(storage),
            options,
            watch_dog: Mutex::new(None),
        };
        lock.root_event(EventType::CreateLock, None).publish().await;
        Ok(lock)
    }

    /// Build a lock for `lock_id` with default options.
    pub async fn with_lock_id(
        storage: Arc<dyn LockStorage>,
        lock_id: impl Into<String>,
    ) -> Result<Self, OptionsError> {
        Self::new(storage, StorageLockOptions::new(lock_id)).await
    }

    #[must_use]
    pub fn options(&self) -> &StorageLockOptions {
        &self.options
    }

    /// [`lock`](Self::lock) bounded by a deadline instead of an external
    /// token.
    pub async fn lock_with_timeout(
        &self,
        owner_id: &str,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        });
        let result = self.lock(&child, owner_id).await;
        deadline.abort();
        result
    }

    /// [`unlock`](Self::unlock) bounded by a deadline instead of an external
    /// token.
    pub async fn unlock_with_timeout(
        &self,
        owner_id: &str,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        });
        let result = self.unlock(&child, owner_id).await;
        deadline.abort();
        result
    }

    pub(crate) fn root_event(&self, event_type: EventType, owner_id: Option<&str>) -> Event {
        let mut event = Event::new(&self.options.lock_id)
            .with_type(event_type)
            .with_storage_name(self.executor.storage_name())
            .with_listeners(self.options.event_listeners.clone());
        if let Some(owner_id) = owner_id {
            event = event.with_owner_id(owner_id);
        }
        event
    }

    pub(crate) fn lease_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.options.lease_expire_after).unwrap_or(TimeDelta::MAX)
    }

    /// Where the lease deadline lands if extended from the storage's now.
    pub(crate) async fn lease_expire_time(&self, e: &Event) -> Result<DateTime<Utc>, StorageError> {
        let storage_time = self.executor.get_time(e).await?;
        Ok(storage_time + self.lease_delta())
    }

    /// The current record, decoded. `None` when the lock has never been
    /// taken.
    pub(crate) async fn lock_information(
        &self,
        e: &Event,
    ) -> Result<Option<LockInformation>, StorageError> {
        match self.executor.get(e, &self.options.lock_id).await? {
            Some(json) => Ok(Some(LockInformation::from_json(&json)?)),
            None => {
                e.emit(Action::new(actions::LOCK_NOT_FOUND)).await;
                Ok(None)
            }
        }
    }

    /// Baseline retry interval plus uniform jitter, so competing waiters
    /// do not stampede the storage in sync.
    pub(crate) fn retry_sleep(&self) -> Duration {
        let jitter_micros = rand::thread_rng().gen_range(50..1000);
        self.options.version_miss_retry_interval + Duration::from_micros(jitter_micros)
    }

    /// Stop and drop the resident watch dog, if any, emitting the stop
    /// outcome.
    pub(crate) async fn stop_resident_watch_dog(&self, e: &Event) {
        let mut slot = self.watch_dog.lock().await;
        if let Some(dog) = slot.take() {
            let stop_event = e.fork().with_watch_dog_id(dog.id());
            stop_event.emit(Action::new(actions::WATCH_DOG_STOP)).await;
            match dog.stop().await {
                Ok(()) => {
                    stop_event
                        .emit(Action::new(actions::WATCH_DOG_STOP_SUCCESS))
                        .await;
                }
                Err(err) => {
                    stop_event
                        .emit(Action::new(actions::WATCH_DOG_STOP_ERROR).with_error(&err))
                        .await;
                }
            }
        }
    }

    pub(crate) async fn set_watch_dog(&self, dog: Box<dyn WatchDog>) {
        *self.watch_dog.lock().await = Some(dog);
    }
}
