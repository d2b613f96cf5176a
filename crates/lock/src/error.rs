use thiserror::Error;

use latch_storage::error::StorageError;

/// Errors returned by [`StorageLock::lock`] and [`StorageLock::unlock`].
///
/// Version misses never reach the caller while the cancellation token is
/// live; the state machine absorbs and retries them. Everything else is
/// surfaced as-is.
///
/// [`StorageLock::lock`]: crate::lock::StorageLock::lock
/// [`StorageLock::unlock`]: crate::lock::StorageLock::unlock
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock is held by another owner and its lease has not expired.
    /// Callers decide their own wait-and-retry policy for this.
    #[error("lock is held by another owner")]
    Busy,

    /// The caller asked to release or refresh a lock it does not hold.
    #[error("lock does not belong to this owner")]
    NotOwner,

    /// `owner_id` must be a non-empty identifier, unique per participant.
    #[error("owner id must not be empty")]
    OwnerIdEmpty,

    /// The watch dog could not be created or started; the acquisition was
    /// rolled back.
    #[error("watch dog failed: {0}")]
    WatchDog(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LockError {
    /// Whether the state machine's retry loop may absorb this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use latch_storage::info::Version;

    use super::*;

    #[test]
    fn only_version_misses_are_retryable() {
        let miss: LockError = StorageError::version_miss("r", Version::INITIAL).into();
        assert!(miss.is_retryable());

        assert!(!LockError::Busy.is_retryable());
        assert!(!LockError::NotOwner.is_retryable());
        assert!(!LockError::from(StorageError::LockNotFound("r".into())).is_retryable());
    }
}
