use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Create the locks table and its owner index if they do not exist.
///
/// Safe to run repeatedly; this backs the storage contract's idempotent
/// `init`.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let locks_table = config.locks_table();
    let index_name = format!("{}locks_owner_idx", config.table_prefix);

    let create_locks = format!(
        "CREATE TABLE IF NOT EXISTS {locks_table} (
            lock_id VARCHAR(255) PRIMARY KEY,
            owner_id VARCHAR(255) NOT NULL,
            version BIGINT NOT NULL,
            lock_information_json_string TEXT NOT NULL
        )"
    );

    let create_owner_index =
        format!("CREATE INDEX IF NOT EXISTS {index_name} ON {locks_table} (owner_id)");

    sqlx::query(&create_locks).execute(pool).await?;
    sqlx::query(&create_owner_index).execute(pool).await?;

    Ok(())
}
