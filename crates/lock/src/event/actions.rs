//! The fixed vocabulary of action names carried by the event stream.
//!
//! Listeners match on these names; they are part of the public contract and
//! never change meaning.

// Acquisition
pub const LOCK_BEGIN: &str = "StorageLock.Lock.Begin";
pub const LOCK_FINISH: &str = "StorageLock.Lock.Finish";
pub const LOCK_SUCCESS: &str = "StorageLock.Lock.Success";
pub const LOCK_ERROR: &str = "StorageLock.Lock.Error";
pub const LOCK_BUSY: &str = "StorageLock.Lock.Busy";
pub const LOCK_VERSION_MISS: &str = "StorageLock.Lock.VersionMiss";

pub const LOCK_TRY_BEGIN: &str = "StorageLock.Lock.Try.Begin";
pub const LOCK_EXISTS: &str = "StorageLock.Lock.Exists";
pub const LOCK_NOT_EXISTS: &str = "StorageLock.Lock.NotExists";
pub const LOCK_RELEASED: &str = "StorageLock.Lock.Released";
pub const LOCK_EXPIRED: &str = "StorageLock.Lock.Expired";
pub const LOCK_REENTRY: &str = "StorageLock.Lock.Reentry";

pub const LOCK_ROLLBACK: &str = "StorageLock.Lock.Rollback";
pub const LOCK_ROLLBACK_SUCCESS: &str = "StorageLock.Lock.Rollback.Success";
pub const LOCK_ROLLBACK_ERROR: &str = "StorageLock.Lock.Rollback.Error";

// Release
pub const UNLOCK_BEGIN: &str = "StorageLock.Unlock.Begin";
pub const UNLOCK_FINISH: &str = "StorageLock.Unlock.Finish";
pub const UNLOCK_SUCCESS: &str = "StorageLock.Unlock.Success";
pub const UNLOCK_ERROR: &str = "StorageLock.Unlock.Error";
pub const UNLOCK_VERSION_MISS: &str = "StorageLock.Unlock.VersionMiss";
pub const UNLOCK_REENTRY: &str = "StorageLock.Unlock.Reentry";
pub const UNLOCK_RELEASE: &str = "StorageLock.Unlock.Release";

// Shared protocol situations
pub const LOCK_NOT_FOUND: &str = "StorageLock.LockNotFound";
pub const NOT_LOCK_OWNER: &str = "StorageLock.NotLockOwner";
pub const SLEEP: &str = "StorageLock.Sleep";
pub const SLEEP_RETRY: &str = "StorageLock.SleepRetry";
pub const TIMEOUT: &str = "StorageLock.Timeout";

// Watch dog lifecycle
pub const WATCH_DOG_CREATE: &str = "WatchDog.Create";
pub const WATCH_DOG_CREATE_SUCCESS: &str = "WatchDog.Create.Success";
pub const WATCH_DOG_CREATE_ERROR: &str = "WatchDog.Create.Error";
pub const WATCH_DOG_START: &str = "WatchDog.Start";
pub const WATCH_DOG_START_SUCCESS: &str = "WatchDog.Start.Success";
pub const WATCH_DOG_START_ERROR: &str = "WatchDog.Start.Error";
pub const WATCH_DOG_STOP: &str = "WatchDog.Stop";
pub const WATCH_DOG_STOP_SUCCESS: &str = "WatchDog.Stop.Success";
pub const WATCH_DOG_STOP_ERROR: &str = "WatchDog.Stop.Error";
pub const WATCH_DOG_REFRESH_BEGIN: &str = "WatchDog.Refresh.Begin";
pub const WATCH_DOG_REFRESH_SUCCESS: &str = "WatchDog.Refresh.Success";
pub const WATCH_DOG_REFRESH_ERROR: &str = "WatchDog.Refresh.Error";
pub const WATCH_DOG_EXIT: &str = "WatchDog.Exit";

// Storage executor
pub const STORAGE_INIT: &str = "Storage.Init";
pub const STORAGE_GET: &str = "Storage.Get";
pub const STORAGE_CREATE: &str = "Storage.CreateWithVersion";
pub const STORAGE_UPDATE: &str = "Storage.UpdateWithVersion";
pub const STORAGE_DELETE: &str = "Storage.DeleteWithVersion";
pub const STORAGE_GET_TIME: &str = "Storage.GetTime";
pub const STORAGE_CLOSE: &str = "Storage.Close";
pub const STORAGE_LIST: &str = "Storage.List";

// Payload keys
pub const PAYLOAD_LOCK_ID: &str = "lock_id";
pub const PAYLOAD_EXPECTED_VERSION: &str = "expected_version";
pub const PAYLOAD_EXPECTED_OWNER: &str = "expected_owner";
pub const PAYLOAD_NEW_VERSION: &str = "new_version";
pub const PAYLOAD_LOCK_INFORMATION: &str = "lock_information";
pub const PAYLOAD_VERSION_MISS_COUNT: &str = "version_miss_count";
pub const PAYLOAD_SLEEP_MICROS: &str = "sleep_micros";
pub const PAYLOAD_REFRESH_SUCCESS_COUNT: &str = "refresh_success_count";
pub const PAYLOAD_CONSECUTIVE_ERROR_COUNT: &str = "consecutive_error_count";
