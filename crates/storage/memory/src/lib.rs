//! In-memory storage backend.
//!
//! Coordinates lock holders within a single process only. Mostly useful as
//! the reference implementation of the storage contract and as the backend
//! the core crate's tests run against; other adapters can mirror its CAS
//! logic.

mod store;

pub use store::MemoryLockStorage;
