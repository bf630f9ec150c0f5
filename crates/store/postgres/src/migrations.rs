use sqlx::PgPool;
use tracing::info;

use crate::config::PostgresConfig;

/// Run database migrations, creating the accounts table if it does not exist.
///
/// The composite index on `(role, status, last_activity_at)` serves the
/// candidate query; paging walks the primary key.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    sqlx::query(&accounts_table_ddl(config)).execute(pool).await?;
    sqlx::query(&candidates_index_ddl(config)).execute(pool).await?;

    info!(table = %config.accounts_table(), "account table migrations applied");
    Ok(())
}

/// The id column is collated `"C"` so the primary key btree already holds
/// the byte-wise order the keyset cursor compares in.
pub(crate) fn accounts_table_ddl(config: &PostgresConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT COLLATE \"C\" PRIMARY KEY,
            role TEXT NOT NULL,
            status TEXT NOT NULL,
            last_activity_at TIMESTAMPTZ NOT NULL,
            suspended_at TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        config.accounts_table()
    )
}

pub(crate) fn candidates_index_ddl(config: &PostgresConfig) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} (role, status, last_activity_at)",
        config.candidates_index(),
        config.accounts_table()
    )
}
