use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::event::EventListener;
use crate::watchdog::{LeaseRefresherFactory, WatchDogFactory};

/// Default lease extension granted on acquisition and on every renewal.
///
/// Too long and a crashed holder blocks everyone for the whole lease; too
/// short and a renewal hiccup loses the lock mid-critical-section. No upper
/// bound is imposed; the lower bound is [`MIN_LEASE_EXPIRE_AFTER`].
pub const DEFAULT_LEASE_EXPIRE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Default cadence of the watch dog. Must stay strictly below the lease
/// duration or renewal is pointless. Raise it under high contention or slow
/// networks to reduce version-miss pressure on the storage.
pub const DEFAULT_LEASE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Default baseline sleep between CAS retries; randomized jitter is added
/// on top.
pub const DEFAULT_VERSION_MISS_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Lower bound on the lease duration.
pub const MIN_LEASE_EXPIRE_AFTER: Duration = Duration::from_secs(3);

/// Construction-time validation failures.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("lock id must not be empty")]
    LockIdEmpty,

    #[error("lease_expire_after must be at least {min:?}, got {got:?}")]
    LeaseExpireAfterTooShort { min: Duration, got: Duration },

    #[error(
        "lease_refresh_interval ({refresh:?}) must be strictly less than \
         lease_expire_after ({lease:?})"
    )]
    LeaseRefreshIntervalTooLong { refresh: Duration, lease: Duration },
}

/// Options for one [`StorageLock`](crate::lock::StorageLock).
///
/// Only `lock_id` is required. Coordinating a resource across processes
/// means every participant must use the same lock id, typically derived
/// from the resource's own identity (a user id, a job name).
#[derive(Clone)]
pub struct StorageLockOptions {
    /// Identity of the contended resource. Required, non-empty.
    pub lock_id: String,

    /// How far each acquisition and renewal pushes the lease deadline out.
    pub lease_expire_after: Duration,

    /// Watch-dog renewal cadence.
    pub lease_refresh_interval: Duration,

    /// Baseline sleep between CAS retries (jitter is added per retry).
    pub version_miss_retry_interval: Duration,

    /// Observers of the protocol event stream.
    pub event_listeners: Vec<Arc<dyn EventListener>>,

    /// Builds the per-acquisition watch dog.
    pub watch_dog_factory: Arc<dyn WatchDogFactory>,
}

impl StorageLockOptions {
    /// Options for `lock_id` with every other field at its default.
    #[must_use]
    pub fn new(lock_id: impl Into<String>) -> Self {
        Self {
            lock_id: lock_id.into(),
            lease_expire_after: DEFAULT_LEASE_EXPIRE_AFTER,
            lease_refresh_interval: DEFAULT_LEASE_REFRESH_INTERVAL,
            version_miss_retry_interval: DEFAULT_VERSION_MISS_RETRY_INTERVAL,
            event_listeners: Vec::new(),
            watch_dog_factory: Arc::new(LeaseRefresherFactory),
        }
    }

    #[must_use]
    pub fn with_lease_expire_after(mut self, lease_expire_after: Duration) -> Self {
        self.lease_expire_after = lease_expire_after;
        self
    }

    #[must_use]
    pub fn with_lease_refresh_interval(mut self, lease_refresh_interval: Duration) -> Self {
        self.lease_refresh_interval = lease_refresh_interval;
        self
    }

    #[must_use]
    pub fn with_version_miss_retry_interval(mut self, interval: Duration) -> Self {
        self.version_miss_retry_interval = interval;
        self
    }

    #[must_use]
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.event_listeners.push(listener);
        self
    }

    #[must_use]
    pub fn with_watch_dog_factory(mut self, factory: Arc<dyn WatchDogFactory>) -> Self {
        self.watch_dog_factory = factory;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), OptionsError> {
        if self.lock_id.is_empty() {
            return Err(OptionsError::LockIdEmpty);
        }
        if self.lease_expire_after < MIN_LEASE_EXPIRE_AFTER {
            return Err(OptionsError::LeaseExpireAfterTooShort {
                min: MIN_LEASE_EXPIRE_AFTER,
                got: self.lease_expire_after,
            });
        }
        if self.lease_refresh_interval >= self.lease_expire_after {
            return Err(OptionsError::LeaseRefreshIntervalTooLong {
                refresh: self.lease_refresh_interval,
                lease: self.lease_expire_after,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(StorageLockOptions::new("resource").validate().is_ok());
    }

    #[test]
    fn empty_lock_id_is_rejected() {
        let err = StorageLockOptions::new("").validate().unwrap_err();
        assert!(matches!(err, OptionsError::LockIdEmpty));
    }

    #[test]
    fn short_lease_is_rejected() {
        let err = StorageLockOptions::new("resource")
            .with_lease_expire_after(Duration::from_secs(2))
            .validate()
            .unwrap_err();
        assert!(matches!(err, OptionsError::LeaseExpireAfterTooShort { .. }));
    }

    #[test]
    fn refresh_interval_must_undercut_lease() {
        let err = StorageLockOptions::new("resource")
            .with_lease_expire_after(Duration::from_secs(10))
            .with_lease_refresh_interval(Duration::from_secs(10))
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            OptionsError::LeaseRefreshIntervalTooLong { .. }
        ));

        assert!(
            StorageLockOptions::new("resource")
                .with_lease_expire_after(Duration::from_secs(10))
                .with_lease_refresh_interval(Duration::from_secs(9))
                .validate()
                .is_ok()
        );
    }
}
