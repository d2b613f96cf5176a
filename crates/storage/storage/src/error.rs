use thiserror::Error;

use crate::info::Version;

/// Errors surfaced by storage adapters and interpreted by the lock protocol.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record exists for the requested lock id.
    #[error("lock not found: {0}")]
    LockNotFound(String),

    /// A record for this lock id already exists; the create lost the race.
    #[error("lock already exists: {0}")]
    LockAlreadyExists(String),

    /// A compare-and-swap predicate did not match the stored record.
    #[error("version miss on lock {lock_id}: expected version {expected}")]
    VersionMiss { lock_id: String, expected: Version },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("time provider unavailable: {0}")]
    TimeProviderUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Build a [`StorageError::VersionMiss`] for the given lock and the
    /// version the caller expected to find.
    #[must_use]
    pub fn version_miss(lock_id: impl Into<String>, expected: Version) -> Self {
        Self::VersionMiss {
            lock_id: lock_id.into(),
            expected,
        }
    }

    /// Whether the lock protocol may retry the operation that produced this
    /// error. A lost create race counts as a version miss: the record the
    /// caller observed as absent has since appeared, so a re-read will
    /// reclassify the situation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionMiss { .. } | Self::LockAlreadyExists(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_miss_is_retryable() {
        assert!(StorageError::version_miss("a", Version::new(3)).is_retryable());
        assert!(StorageError::LockAlreadyExists("a".into()).is_retryable());
        assert!(!StorageError::LockNotFound("a".into()).is_retryable());
        assert!(!StorageError::Backend("boom".into()).is_retryable());
    }
}
