use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Monotone CAS token guarding a lock record.
///
/// Every mutation of the record bumps the version by exactly one, so a
/// matching `(lock_id, version)` pair pins the exact record state a caller
/// observed and keeps compare-and-swap free of ABA hazards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    /// The version a record carries on first creation.
    pub const INITIAL: Version = Version(1);

    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The version the record must carry after one more mutation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The single persisted record for one lock id.
///
/// Stored as canonical snake_case JSON. Both timestamps come from the
/// storage clock ([`crate::storage::LockStorage::get_time`]), never from the
/// client's clock. A record with `lock_count == 0` is a tombstone: released,
/// reclaimable by any owner, kept around so the next acquirer performs a
/// clean CAS update instead of a create that races stale readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInformation {
    /// Identity of the contended resource.
    pub lock_id: String,

    /// Current holder. Non-empty whenever `lock_count > 0`.
    pub owner_id: String,

    /// CAS token, strictly increasing across the lifetime of the lock id.
    pub version: Version,

    /// Reentrancy depth. Zero means released/reclaimable.
    pub lock_count: u32,

    /// When the current holder first acquired the lock.
    pub lock_begin_time: DateTime<Utc>,

    /// Deadline after which a non-owner may reclaim the lock.
    pub lease_expire_time: DateTime<Utc>,
}

impl LockInformation {
    /// Serialize to the canonical JSON wire form.
    pub fn to_json(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the JSON wire form.
    ///
    /// An empty input means the record does not exist and yields
    /// [`StorageError::LockNotFound`], never a record with zeroed fields.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        if json.is_empty() {
            return Err(StorageError::LockNotFound(String::new()));
        }
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample() -> LockInformation {
        LockInformation {
            lock_id: "orders-reconciler".to_owned(),
            owner_id: "worker-7".to_owned(),
            version: Version::new(42),
            lock_count: 2,
            lock_begin_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            lease_expire_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap(),
        }
    }

    #[test]
    fn json_round_trip() {
        let info = sample();
        let json = info.to_json().unwrap();
        let back = LockInformation::from_json(&json).unwrap();
        assert_eq!(info, back);
    }

    #[test]
    fn wire_form_uses_snake_case_keys() {
        let json = sample().to_json().unwrap();
        for key in [
            "lock_id",
            "owner_id",
            "version",
            "lock_count",
            "lock_begin_time",
            "lease_expire_time",
        ] {
            assert!(json.contains(key), "missing key {key} in {json}");
        }
    }

    #[test]
    fn empty_string_is_not_found() {
        let err = LockInformation::from_json("").unwrap_err();
        assert!(matches!(err, StorageError::LockNotFound(_)));
    }

    #[test]
    fn version_is_transparent_in_json() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"version\":42"), "got {json}");
    }

    #[test]
    fn version_next_increments_by_one() {
        assert_eq!(Version::INITIAL.next(), Version::new(2));
        assert_eq!(Version::new(9).next().get(), 10);
    }
}
