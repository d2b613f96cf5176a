//! Distributed locks over pluggable storage backends.
//!
//! A [`StorageLock`] grants exclusive, time-bounded access to a named
//! resource to one owner at a time. The hold is a lease: a background watch
//! dog renews it while the owner works, and if the owner disappears the
//! lease expires and anyone else may reclaim the lock. Holds are reentrant
//! per owner, and every state transition is a single optimistic
//! compare-and-swap against the storage, which is the only serialization
//! point — no coordinator process is involved.
//!
//! Persistence is behind the [`LockStorage`](latch_storage::LockStorage)
//! contract; the `latch-storage-*` crates ship memory, file-system and
//! PostgreSQL adapters, and embedders can implement their own.
//!
//! ```ignore
//! use std::sync::Arc;
//! use latch::{StorageLock, StorageLockOptions};
//! use latch_storage_postgres::{PostgresConfig, PostgresLockStorage};
//! use tokio_util::sync::CancellationToken;
//!
//! let storage = Arc::new(PostgresLockStorage::connect(PostgresConfig::default()).await?);
//! let lock = StorageLock::new(storage, StorageLockOptions::new("nightly-report")).await?;
//!
//! let cancel = CancellationToken::new();
//! lock.lock(&cancel, "worker-1").await?;
//! // ... the critical section; the lease renews itself in the background ...
//! lock.unlock(&cancel, "worker-1").await?;
//! ```

pub mod error;
pub mod event;
pub mod executor;
pub mod lock;
pub mod options;
pub mod owner;
pub mod watchdog;

pub use error::LockError;
pub use event::{Action, Event, EventListener, EventType, TracingEventListener};
pub use executor::StorageExecutor;
pub use lock::StorageLock;
pub use options::{OptionsError, StorageLockOptions};
pub use owner::OwnerIdGenerator;
pub use watchdog::{
    FnWatchDogFactory, LeaseRefresher, LeaseRefresherFactory, RefreshContext, WatchDog,
    WatchDogFactory,
};
