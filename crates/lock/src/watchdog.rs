//! Lease renewal.
//!
//! Each successful acquisition gets its own watch dog, dedicated to exactly
//! one `(lock id, owner, acquisition)` triple; a dog never renews on behalf
//! of any other owner. The built-in implementation, [`LeaseRefresher`],
//! periodically re-reads the record, validates ownership, bumps the version
//! and pushes the lease deadline out. Transient storage errors never
//! terminate it: an outage shorter than the lease must not cause
//! self-shutdown and eventual loss of the lock. It exits only on explicit
//! stop, on a vanished record, or on observing another owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use latch_storage::info::LockInformation;
use latch_storage::storage::CasPredicate;

use crate::error::LockError;
use crate::event::{Action, Event, actions};
use crate::executor::StorageExecutor;

/// Background lease renewer bound to one acquisition.
#[async_trait]
pub trait WatchDog: Send + Sync {
    /// Which breed of watch dog this is.
    fn name(&self) -> &str;

    /// Unique id of this instance, carried on its events.
    fn id(&self) -> &str;

    /// Begin renewing. Idempotent.
    async fn start(&self) -> Result<(), LockError>;

    /// Stop renewing. The background task observes the stop at its next
    /// wakeup and exits.
    async fn stop(&self) -> Result<(), LockError>;
}

/// Everything a watch dog needs to renew one lease. Deliberately not a
/// reference to the lock itself: the lock owns the watch-dog handle, the
/// watch dog owns nothing of the lock.
#[derive(Clone)]
pub struct RefreshContext {
    pub executor: StorageExecutor,
    pub lock_id: String,
    pub owner_id: String,
    pub lease_expire_after: Duration,
    pub lease_refresh_interval: Duration,
}

/// Builds watch dogs; injectable through the lock options so embedders can
/// replace the renewal strategy wholesale.
#[async_trait]
pub trait WatchDogFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Build a watch dog for a fresh acquisition. `event` is the parent for
    /// everything the dog will emit.
    async fn create(
        &self,
        event: &Event,
        context: RefreshContext,
    ) -> Result<Box<dyn WatchDog>, LockError>;
}

/// What one renewal attempt concluded.
enum RefreshOutcome {
    Refreshed,
    /// The record is gone: the lock was removed or the storage cleaned up.
    LockGone,
    /// Someone else holds the lock now.
    OwnershipLost,
}

/// The built-in [`WatchDog`]: one spawned task per acquisition.
pub struct LeaseRefresher {
    id: String,
    context: RefreshContext,
    root: Event,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    refresh_success_count: Arc<AtomicU64>,
}

impl LeaseRefresher {
    fn new(parent: &Event, context: RefreshContext) -> Self {
        let id = format!("watch-dog-{}", Uuid::new_v4().simple());
        let root = parent
            .fork()
            .with_watch_dog_id(&id)
            .with_owner_id(&context.owner_id);
        Self {
            id,
            context,
            root,
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            refresh_success_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// How many renewals have succeeded so far.
    #[must_use]
    pub fn refresh_success_count(&self) -> u64 {
        self.refresh_success_count.load(Ordering::Acquire)
    }

    /// One renewal attempt. Storage errors bubble out as transient; the two
    /// self-stop conditions come back as outcomes.
    async fn refresh_once(
        context: &RefreshContext,
        e: &Event,
    ) -> Result<RefreshOutcome, LockError> {
        let Some(json) = context.executor.get(e, &context.lock_id).await? else {
            return Ok(RefreshOutcome::LockGone);
        };
        let info = LockInformation::from_json(&json)?;

        if info.owner_id != context.owner_id {
            e.emit(
                Action::new(actions::NOT_LOCK_OWNER)
                    .with_payload(actions::PAYLOAD_LOCK_INFORMATION, &info),
            )
            .await;
            return Ok(RefreshOutcome::OwnershipLost);
        }

        let now = context.executor.get_time(e).await?;
        let lease = chrono::TimeDelta::from_std(context.lease_expire_after)
            .unwrap_or(chrono::TimeDelta::MAX);

        let mut renewed = info.clone();
        renewed.version = info.version.next();
        renewed.lease_expire_time = now + lease;

        context
            .executor
            .update_with_version(
                e,
                &context.lock_id,
                &CasPredicate::owned(info.version, &context.owner_id),
                renewed.version,
                &renewed,
            )
            .await?;
        Ok(RefreshOutcome::Refreshed)
    }

    async fn run(
        context: RefreshContext,
        root: Event,
        running: Arc<AtomicBool>,
        cancel: CancellationToken,
        success_total: Arc<AtomicU64>,
    ) {
        // A short critical section may release the lock before the first
        // renewal is even due; waiting a beat avoids renewing a lock that is
        // already gone.
        let initial_sleep = context
            .lease_refresh_interval
            .min(Duration::from_secs(1));
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep(initial_sleep) => {}
        }

        let mut consecutive_errors: u64 = 0;
        while running.load(Ordering::Acquire) && !cancel.is_cancelled() {
            let iteration_start = tokio::time::Instant::now();
            root.emit(
                Action::new(actions::WATCH_DOG_REFRESH_BEGIN)
                    .with_payload(
                        actions::PAYLOAD_REFRESH_SUCCESS_COUNT,
                        success_total.load(Ordering::Acquire),
                    )
                    .with_payload(actions::PAYLOAD_CONSECUTIVE_ERROR_COUNT, consecutive_errors),
            )
            .await;

            // Bound each attempt so a hung storage call cannot swallow the
            // refresh cadence.
            let attempt = tokio::time::timeout(
                context.lease_refresh_interval,
                Self::refresh_once(&context, &root),
            )
            .await;

            match attempt {
                Ok(Ok(RefreshOutcome::Refreshed)) => {
                    let total = success_total.fetch_add(1, Ordering::AcqRel) + 1;
                    consecutive_errors = 0;
                    debug!(
                        lock_id = %context.lock_id,
                        owner_id = %context.owner_id,
                        refresh_success_count = total,
                        "lease renewed"
                    );
                    root.emit(
                        Action::new(actions::WATCH_DOG_REFRESH_SUCCESS)
                            .with_payload(actions::PAYLOAD_REFRESH_SUCCESS_COUNT, total),
                    )
                    .await;
                }
                Ok(Ok(RefreshOutcome::LockGone)) => {
                    debug!(lock_id = %context.lock_id, "lock record gone, watch dog exiting");
                    root.emit(Action::new(actions::LOCK_NOT_FOUND)).await;
                    break;
                }
                Ok(Ok(RefreshOutcome::OwnershipLost)) => {
                    debug!(
                        lock_id = %context.lock_id,
                        owner_id = %context.owner_id,
                        "lock held by another owner, watch dog exiting"
                    );
                    break;
                }
                Ok(Err(e)) => {
                    consecutive_errors += 1;
                    warn!(
                        lock_id = %context.lock_id,
                        error = %e,
                        consecutive_error_count = consecutive_errors,
                        "lease renewal failed"
                    );
                    root.emit(
                        Action::new(actions::WATCH_DOG_REFRESH_ERROR)
                            .with_error(&e)
                            .with_payload(
                                actions::PAYLOAD_CONSECUTIVE_ERROR_COUNT,
                                consecutive_errors,
                            ),
                    )
                    .await;
                }
                Err(_elapsed) => {
                    consecutive_errors += 1;
                    warn!(
                        lock_id = %context.lock_id,
                        consecutive_error_count = consecutive_errors,
                        "lease renewal timed out"
                    );
                    root.emit(
                        Action::new(actions::WATCH_DOG_REFRESH_ERROR)
                            .with_error(&"refresh timed out")
                            .with_payload(
                                actions::PAYLOAD_CONSECUTIVE_ERROR_COUNT,
                                consecutive_errors,
                            ),
                    )
                    .await;
                }
            }

            let elapsed = iteration_start.elapsed();
            let remainder = context.lease_refresh_interval.saturating_sub(elapsed);
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(remainder) => {}
            }
        }

        running.store(false, Ordering::Release);
        root.emit(
            Action::new(actions::WATCH_DOG_EXIT).with_payload(
                actions::PAYLOAD_REFRESH_SUCCESS_COUNT,
                success_total.load(Ordering::Acquire),
            ),
        )
        .await;
    }
}

pub const LEASE_REFRESHER_NAME: &str = "lease-refresher";

#[async_trait]
impl WatchDog for LeaseRefresher {
    fn name(&self) -> &str {
        LEASE_REFRESHER_NAME
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&self) -> Result<(), LockError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.root.emit(Action::new(actions::WATCH_DOG_START)).await;

        tokio::spawn(Self::run(
            self.context.clone(),
            self.root.clone(),
            Arc::clone(&self.running),
            self.cancel.clone(),
            Arc::clone(&self.refresh_success_count),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<(), LockError> {
        self.running.store(false, Ordering::Release);
        self.cancel.cancel();
        Ok(())
    }
}

/// The default factory: one [`LeaseRefresher`] per acquisition.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeaseRefresherFactory;

#[async_trait]
impl WatchDogFactory for LeaseRefresherFactory {
    fn name(&self) -> &str {
        LEASE_REFRESHER_NAME
    }

    async fn create(
        &self,
        event: &Event,
        context: RefreshContext,
    ) -> Result<Box<dyn WatchDog>, LockError> {
        let dog = LeaseRefresher::new(event, context);
        dog.root.emit(Action::new(actions::WATCH_DOG_CREATE)).await;
        Ok(Box::new(dog))
    }
}

type FactoryFn =
    dyn Fn(Event, RefreshContext) -> BoxFuture<'static, Result<Box<dyn WatchDog>, LockError>>
        + Send
        + Sync;

/// Builds watch dogs from a closure; the easiest way to swap in a custom
/// renewal strategy (or none at all) without a full factory type.
pub struct FnWatchDogFactory {
    name: String,
    create: Box<FactoryFn>,
}

impl FnWatchDogFactory {
    pub fn new<F>(name: impl Into<String>, create: F) -> Self
    where
        F: Fn(Event, RefreshContext) -> BoxFuture<'static, Result<Box<dyn WatchDog>, LockError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            create: Box::new(create),
        }
    }
}

#[async_trait]
impl WatchDogFactory for FnWatchDogFactory {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(
        &self,
        event: &Event,
        context: RefreshContext,
    ) -> Result<Box<dyn WatchDog>, LockError> {
        (self.create)(event.clone(), context).await
    }
}
