//! File-system storage backend.
//!
//! Coordinates processes that share a file system. Each lock gets one
//! directory, `<workspace>/storage-lock-<lockId>.lock/`, holding one file
//! per record version; the highest-numbered file is the authoritative
//! record. Creating a version file is the compare-and-swap point: the file
//! is populated under a temporary name and then hard-linked into place, so
//! the link either installs a complete record or fails because another
//! writer got there first.
//!
//! The clock defaults to the process clock. On a genuinely shared file
//! system the machines involved do not necessarily agree on time; inject a
//! shared [`TimeProvider`](latch_storage::time::TimeProvider) (for example
//! the NTP provider) when that matters.

mod store;

pub use store::FsLockStorage;
