use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use lapse_core::{Account, AccountId, AccountStatus, SuspendOutcome};
use lapse_store::error::StoreError;
use lapse_store::query::{AccountPage, InactiveQuery, PageCursor};
use lapse_store::repository::{AccountRepository, validate_limit};

use crate::config::PostgresConfig;
use crate::migrations;

type AccountRow = (String, String, String, DateTime<Utc>, Option<DateTime<Utc>>);

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, StoreError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| StoreError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(StoreError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    Ok(options)
}

/// Classify a driver error: lost connectivity versus a failing statement.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StoreError::Connection(err.to_string()),
        other => StoreError::Backend(other.to_string()),
    }
}

fn row_to_account(row: AccountRow) -> Result<Account, StoreError> {
    let (id, role, status, last_activity_at, suspended_at) = row;
    let status: AccountStatus = status
        .parse()
        .map_err(|e: lapse_core::CoreError| StoreError::Serialization(e.to_string()))?;
    Ok(Account {
        id: AccountId::from(id),
        role: role.into(),
        status,
        last_activity_at,
        suspended_at,
    })
}

/// Guarded updates to retry while the row keeps reading back `active`.
const SUSPEND_ATTEMPTS: usize = 3;

fn parse_status(status: Option<String>) -> Result<Option<AccountStatus>, StoreError> {
    status
        .map(|s| s.parse())
        .transpose()
        .map_err(|e: lapse_core::CoreError| StoreError::Serialization(e.to_string()))
}

/// Outcome for a row the guarded update did not transition, given its
/// status. `None` means the row is still `active` and the update should be
/// retried.
fn settle(status: Option<AccountStatus>) -> Option<SuspendOutcome> {
    match status {
        None => Some(SuspendOutcome::NotFound),
        Some(AccountStatus::Active) => None,
        Some(AccountStatus::Suspended) => Some(SuspendOutcome::AlreadySuspended),
        Some(other @ AccountStatus::Other(_)) => Some(SuspendOutcome::Ineligible(other)),
    }
}

/// PostgreSQL-backed implementation of [`AccountRepository`].
///
/// Candidates are read with keyset paging over the primary key. The suspend
/// transition is a single `UPDATE ... WHERE status = 'active'`, so concurrent
/// sweeps can never both observe a transition for the same row.
pub struct PostgresAccountRepository {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresAccountRepository {
    /// Connect, create the connection pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StoreError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a repository from an existing pool. Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, StoreError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Insert or replace an account row.
    ///
    /// Account creation belongs to the owning account subsystem; this exists
    /// for seeding and tests.
    pub async fn upsert(&self, account: &Account) -> Result<(), StoreError> {
        let table = self.config.accounts_table();
        let query = format!(
            "INSERT INTO {table} (id, role, status, last_activity_at, suspended_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (id) DO UPDATE SET role = $2, status = $3, \
             last_activity_at = $4, suspended_at = $5, updated_at = NOW()"
        );

        sqlx::query(&query)
            .bind(account.id.as_str())
            .bind(account.role.as_str())
            .bind(account.status.as_str())
            .bind(account.last_activity_at)
            .bind(account.suspended_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn find_inactive(
        &self,
        query: &InactiveQuery,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<AccountPage, StoreError> {
        validate_limit(limit)?;
        let fetch = i64::try_from(limit.saturating_add(1))
            .map_err(|_| StoreError::InvalidQuery(format!("page limit {limit} is too large")))?;

        let table = self.config.accounts_table();
        // Byte-wise order, matching the cursor comparison and the id column.
        let sql = format!(
            "SELECT id, role, status, last_activity_at, suspended_at FROM {table} \
             WHERE role = $1 AND status = 'active' AND last_activity_at <= $2 \
             AND ($3::TEXT IS NULL OR id COLLATE \"C\" > $3) \
             ORDER BY id COLLATE \"C\" \
             LIMIT $4"
        );

        let rows: Vec<AccountRow> = sqlx::query_as(&sql)
            .bind(query.role.as_str())
            .bind(query.inactive_before)
            .bind(cursor.map(|c| c.last_id().as_str()))
            .bind(fetch)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let accounts = rows
            .into_iter()
            .map(row_to_account)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AccountPage::from_overfetch(accounts, limit))
    }

    async fn suspend(&self, id: &AccountId) -> Result<SuspendOutcome, StoreError> {
        let table = self.config.accounts_table();
        // The status subquery reads the pre-update snapshot.
        let guarded = format!(
            "WITH updated AS ( \
                UPDATE {table} SET status = 'suspended', suspended_at = NOW(), updated_at = NOW() \
                WHERE id = $1 AND status = 'active' \
                RETURNING suspended_at \
             ) \
             SELECT (SELECT suspended_at FROM updated), \
                    (SELECT status FROM {table} WHERE id = $1)"
        );
        let committed = format!("SELECT status FROM {table} WHERE id = $1");

        for _ in 0..SUSPEND_ATTEMPTS {
            let (suspended_at, status): (Option<DateTime<Utc>>, Option<String>) =
                sqlx::query_as(&guarded)
                    .bind(id.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

            if let Some(at) = suspended_at {
                return Ok(SuspendOutcome::Suspended { at });
            }
            if let Some(outcome) = settle(parse_status(status)?) {
                return Ok(outcome);
            }

            // Active in the snapshot but the guard did not match: a concurrent
            // writer changed the row. Read what it committed.
            let status: Option<String> = sqlx::query_scalar(&committed)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if let Some(outcome) = settle(parse_status(status)?) {
                return Ok(outcome);
            }
        }

        Err(StoreError::Backend(format!(
            "suspend of {id} kept losing to concurrent updates"
        )))
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let table = self.config.accounts_table();
        let sql = format!(
            "SELECT id, role, status, last_activity_at, suspended_at FROM {table} WHERE id = $1"
        );

        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(row_to_account).transpose()
    }
}
