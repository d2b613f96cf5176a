//! PostgreSQL storage backend.
//!
//! One row per lock in `{schema}.{prefix}locks`, with `lock_id`, `owner_id`
//! and `version` as indexed columns next to the full JSON record, so the
//! compare-and-swap predicates run entirely inside single `UPDATE`/`DELETE`
//! statements. The protocol clock is the database's `NOW()`, which every
//! participant shares regardless of its own wall clock.

mod config;
mod migrations;
mod store;

pub use config::PostgresConfig;
pub use store::PostgresLockStorage;
