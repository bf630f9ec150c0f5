//! The suspension sweep.
//!
//! One invocation walks every page of candidates matching the inactivity
//! predicate and asks the repository to suspend each one. Per-account
//! failures are recorded and the sweep moves on; only a failing candidate
//! query aborts the invocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use lapse_core::{Account, AccountId, AccountRole, InactivityThreshold, SuspendOutcome};
use lapse_store::{AccountRepository, InactiveQuery, PageCursor, StoreError};

use crate::error::JobError;
use crate::metrics::SweepMetrics;

/// Default number of accounts fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Per-account failures kept in a [`SweepReport`]. `failed` still counts all
/// of them.
pub const MAX_REPORTED_FAILURES: usize = 100;

/// Configuration for the suspension sweep.
#[derive(Debug, Clone)]
pub struct SuspensionJobConfig {
    /// Only accounts with this role are candidates.
    pub role: AccountRole,
    /// Accounts idle for at least this long are suspended.
    pub threshold: InactivityThreshold,
    /// Maximum accounts held in memory per page.
    pub page_size: usize,
}

impl SuspensionJobConfig {
    /// Target `provider` accounts with the default page size.
    #[must_use]
    pub fn new(threshold: InactivityThreshold) -> Self {
        Self {
            role: AccountRole::provider(),
            threshold,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: AccountRole) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

/// Event emitted when an account actually transitions to `suspended`.
///
/// Never emitted for accounts that were already suspended, so re-running a
/// sweep does not re-notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSuspendedEvent {
    pub account_id: AccountId,
    pub role: AccountRole,
    pub last_activity_at: DateTime<Utc>,
    pub suspended_at: DateTime<Utc>,
}

/// One account whose suspend call failed during a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub account_id: AccountId,
    pub error: String,
}

/// Per-invocation summary of a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Accounts idle since this instant were candidates.
    pub cutoff: DateTime<Utc>,
    pub pages: u64,
    pub processed: u64,
    pub suspended: u64,
    pub skipped: u64,
    pub failed: u64,
    /// The first [`MAX_REPORTED_FAILURES`] failures.
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>, cutoff: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            cutoff,
            pages: 0,
            processed: 0,
            suspended: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
        }
    }

    /// Returns `true` if no account in the sweep failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Suspends accounts that have been inactive past the configured threshold.
pub struct SuspensionJob {
    repository: Arc<dyn AccountRepository>,
    config: SuspensionJobConfig,
    metrics: Arc<SweepMetrics>,
    suspended_tx: Option<mpsc::Sender<AccountSuspendedEvent>>,
}

impl SuspensionJob {
    /// Create a job over the given repository.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Configuration`] if the page size is zero.
    pub fn new(
        repository: Arc<dyn AccountRepository>,
        config: SuspensionJobConfig,
    ) -> Result<Self, JobError> {
        if config.page_size == 0 {
            return Err(JobError::Configuration("page_size must be at least 1".into()));
        }
        Ok(Self {
            repository,
            config,
            metrics: Arc::new(SweepMetrics::default()),
            suspended_tx: None,
        })
    }

    /// Share a metrics instance with the scheduler or the daemon.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SweepMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set a channel to receive suspension events.
    #[must_use]
    pub fn with_suspended_channel(mut self, tx: mpsc::Sender<AccountSuspendedEvent>) -> Self {
        self.suspended_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &SuspensionJobConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<SweepMetrics> {
        &self.metrics
    }

    /// Run one sweep using the current time.
    pub async fn sweep(&self) -> Result<SweepReport, JobError> {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep as if the current time were `now`.
    ///
    /// The cutoff is computed once, so every page is evaluated against the
    /// same instant.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, JobError> {
        let query = InactiveQuery::at(self.config.role.clone(), self.config.threshold, now);
        let mut report = SweepReport::new(now, query.inactive_before);
        self.metrics.increment_sweeps_started();

        debug!(
            role = %query.role,
            cutoff = %query.inactive_before,
            page_size = self.config.page_size,
            "suspension sweep starting"
        );

        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = match self
                .repository
                .find_inactive(&query, cursor.as_ref(), self.config.page_size)
                .await
            {
                Ok(page) => page,
                Err(e) => return Err(self.abort(&report, e)),
            };
            report.pages += 1;
            self.metrics.increment_pages_fetched();

            for account in page.accounts {
                self.process(account, &mut report).await;
            }

            let Some(next) = page.next_cursor else {
                break;
            };
            // Keyset cursors strictly increase; anything else would loop.
            if let Some(prev) = cursor.as_ref()
                && next.last_id() <= prev.last_id()
            {
                let err = StoreError::Backend(format!(
                    "page cursor {} did not advance past {}",
                    next.last_id(),
                    prev.last_id()
                ));
                return Err(self.abort(&report, err));
            }
            cursor = Some(next);
        }

        report.finished_at = Utc::now();
        self.metrics.increment_sweeps_completed();

        if report.is_clean() {
            info!(
                pages = report.pages,
                processed = report.processed,
                suspended = report.suspended,
                skipped = report.skipped,
                failed = report.failed,
                "suspension sweep complete"
            );
        } else {
            warn!(
                pages = report.pages,
                processed = report.processed,
                suspended = report.suspended,
                skipped = report.skipped,
                failed = report.failed,
                "suspension sweep complete with failures"
            );
        }

        Ok(report)
    }

    fn abort(&self, report: &SweepReport, err: StoreError) -> JobError {
        self.metrics.increment_sweeps_failed();
        error!(
            error = %err,
            pages = report.pages,
            processed = report.processed,
            suspended = report.suspended,
            "suspension sweep aborted: candidate query failed"
        );
        JobError::RepositoryUnavailable(err)
    }

    async fn process(&self, account: Account, report: &mut SweepReport) {
        report.processed += 1;
        self.metrics.increment_accounts_processed();

        if !account.is_active() {
            debug!(
                account_id = %account.id,
                status = %account.status,
                "skipping non-active account"
            );
            self.skip(report);
            return;
        }

        match self.repository.suspend(&account.id).await {
            Ok(SuspendOutcome::Suspended { at }) => {
                report.suspended += 1;
                self.metrics.increment_accounts_suspended();
                debug!(account_id = %account.id, "account suspended");
                self.notify(&account, at).await;
            }
            Ok(SuspendOutcome::AlreadySuspended) => {
                debug!(account_id = %account.id, "account already suspended");
                self.skip(report);
            }
            Ok(SuspendOutcome::NotFound) => {
                debug!(account_id = %account.id, "account disappeared before suspend");
                self.skip(report);
            }
            Ok(SuspendOutcome::Ineligible(status)) => {
                debug!(account_id = %account.id, status = %status, "account no longer eligible");
                self.skip(report);
            }
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "failed to suspend account");
                report.failed += 1;
                if report.failures.len() < MAX_REPORTED_FAILURES {
                    report.failures.push(SweepFailure {
                        account_id: account.id,
                        error: e.to_string(),
                    });
                }
                self.metrics.increment_accounts_failed();
            }
        }
    }

    fn skip(&self, report: &mut SweepReport) {
        report.skipped += 1;
        self.metrics.increment_accounts_skipped();
    }

    async fn notify(&self, account: &Account, suspended_at: DateTime<Utc>) {
        let Some(ref tx) = self.suspended_tx else {
            return;
        };
        let event = AccountSuspendedEvent {
            account_id: account.id.clone(),
            role: account.role.clone(),
            last_activity_at: account.last_activity_at,
            suspended_at,
        };
        if tx.send(event).await.is_err() {
            warn!(account_id = %account.id, "suspension event channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration;
    use lapse_core::AccountStatus;
    use lapse_store::AccountPage;
    use lapse_store_memory::MemoryAccountRepository;

    use super::*;

    fn idle(id: &str, days: i64, now: DateTime<Utc>) -> Account {
        Account::new(id, "provider", now - Duration::days(days))
    }

    fn job(repo: Arc<dyn AccountRepository>, page_size: usize) -> SuspensionJob {
        let config = SuspensionJobConfig::new(InactivityThreshold::from_days(30).unwrap())
            .with_page_size(page_size);
        SuspensionJob::new(repo, config).unwrap()
    }

    /// Returns the same full page forever.
    struct StuckRepository {
        inner: MemoryAccountRepository,
    }

    #[async_trait]
    impl AccountRepository for StuckRepository {
        async fn find_inactive(
            &self,
            query: &InactiveQuery,
            _cursor: Option<&PageCursor>,
            limit: usize,
        ) -> Result<AccountPage, StoreError> {
            let mut page = self.inner.find_inactive(query, None, limit).await?;
            page.next_cursor = page
                .accounts
                .last()
                .map(|a| PageCursor::after(a.id.clone()));
            Ok(page)
        }

        async fn suspend(&self, _id: &AccountId) -> Result<SuspendOutcome, StoreError> {
            // Leave the row active so the query keeps returning it.
            Ok(SuspendOutcome::AlreadySuspended)
        }

        async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
            self.inner.get(id).await
        }
    }

    #[test]
    fn zero_page_size_rejected() {
        let config =
            SuspensionJobConfig::new(InactivityThreshold::from_days(30).unwrap()).with_page_size(0);
        let result = SuspensionJob::new(Arc::new(MemoryAccountRepository::new()), config);
        assert!(matches!(result, Err(JobError::Configuration(_))));
    }

    #[test]
    fn config_defaults_to_provider_role() {
        let config = SuspensionJobConfig::new(InactivityThreshold::from_days(30).unwrap());
        assert_eq!(config.role, AccountRole::provider());
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn emits_one_event_per_transition() {
        let now = Utc::now();
        let repo = Arc::new(MemoryAccountRepository::with_accounts([
            idle("a", 40, now),
            idle("b", 45, now),
            idle("c", 5, now),
        ]));
        let (tx, mut rx) = mpsc::channel(16);
        let job = job(repo, 10).with_suspended_channel(tx);

        job.sweep_at(now).await.unwrap();
        job.sweep_at(now).await.unwrap();

        let mut ids = Vec::new();
        while let Ok(event) = rx.try_recv() {
            ids.push(event.account_id.to_string());
        }
        assert_eq!(ids, vec!["a", "b"], "second sweep must not re-notify");
    }

    #[tokio::test]
    async fn closed_event_channel_does_not_fail_items() {
        let now = Utc::now();
        let repo = Arc::new(MemoryAccountRepository::with_accounts([idle("a", 40, now)]));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let job = job(repo.clone(), 10).with_suspended_channel(tx);

        let report = job.sweep_at(now).await.unwrap();
        assert_eq!(report.suspended, 1);
        assert_eq!(report.failed, 0);
        assert!(repo.get(&AccountId::from("a")).await.unwrap().unwrap().is_suspended());
    }

    #[tokio::test]
    async fn counts_pages() {
        let now = Utc::now();
        let repo = Arc::new(MemoryAccountRepository::with_accounts(
            (0..5).map(|i| idle(&format!("acct-{i}"), 40, now)),
        ));
        let job = job(repo, 2);

        let report = job.sweep_at(now).await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.suspended, 5);
        assert_eq!(job.metrics().snapshot().pages_fetched, 3);
    }

    #[tokio::test]
    async fn stalled_cursor_fails_the_invocation() {
        let now = Utc::now();
        let inner =
            MemoryAccountRepository::with_accounts([idle("a", 40, now), idle("b", 40, now)]);
        let job = job(Arc::new(StuckRepository { inner }), 2);

        let err = job.sweep_at(now).await.unwrap_err();
        assert!(matches!(err, JobError::RepositoryUnavailable(_)));
        assert!(err.to_string().contains("did not advance"));
        assert_eq!(job.metrics().snapshot().sweeps_failed, 1);
    }

    #[tokio::test]
    async fn cycling_cursor_fails_the_invocation() {
        /// Alternates its cursor between two ids and never runs out of pages.
        struct CyclingRepository {
            inner: MemoryAccountRepository,
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl AccountRepository for CyclingRepository {
            async fn find_inactive(
                &self,
                _query: &InactiveQuery,
                _cursor: Option<&PageCursor>,
                _limit: usize,
            ) -> Result<AccountPage, StoreError> {
                let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let last = if call % 2 == 0 { "a" } else { "b" };
                Ok(AccountPage {
                    accounts: Vec::new(),
                    next_cursor: Some(PageCursor::after(AccountId::from(last))),
                })
            }

            async fn suspend(&self, id: &AccountId) -> Result<SuspendOutcome, StoreError> {
                self.inner.suspend(id).await
            }

            async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
                self.inner.get(id).await
            }
        }

        let now = Utc::now();
        let repo = CyclingRepository {
            inner: MemoryAccountRepository::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        let job = job(Arc::new(repo), 10);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), job.sweep_at(now))
            .await
            .expect("sweep must terminate on a cursor that moves backwards");
        let err = result.unwrap_err();
        assert!(matches!(err, JobError::RepositoryUnavailable(_)));
        assert!(err.to_string().contains("did not advance past b"));
        assert_eq!(job.metrics().snapshot().pages_fetched, 3);
    }

    #[tokio::test]
    async fn non_transition_outcomes_are_skipped_silently() {
        /// Serves three active candidates and answers `suspend` with a
        /// different non-transition outcome for each.
        struct OutcomeRepository {
            accounts: Vec<Account>,
        }

        #[async_trait]
        impl AccountRepository for OutcomeRepository {
            async fn find_inactive(
                &self,
                _query: &InactiveQuery,
                _cursor: Option<&PageCursor>,
                _limit: usize,
            ) -> Result<AccountPage, StoreError> {
                Ok(AccountPage {
                    accounts: self.accounts.clone(),
                    next_cursor: None,
                })
            }

            async fn suspend(&self, id: &AccountId) -> Result<SuspendOutcome, StoreError> {
                Ok(match id.as_str() {
                    "already" => SuspendOutcome::AlreadySuspended,
                    "gone" => SuspendOutcome::NotFound,
                    _ => SuspendOutcome::Ineligible(AccountStatus::Other("pending".into())),
                })
            }

            async fn get(&self, _id: &AccountId) -> Result<Option<Account>, StoreError> {
                Ok(None)
            }
        }

        let now = Utc::now();
        let repo = OutcomeRepository {
            accounts: vec![
                idle("already", 40, now),
                idle("gone", 40, now),
                idle("pending", 40, now),
            ],
        };
        let (tx, mut rx) = mpsc::channel(16);
        let job = job(Arc::new(repo), 10).with_suspended_channel(tx);

        let report = job.sweep_at(now).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.suspended, 0);
        assert_eq!(report.failed, 0);
        assert!(rx.try_recv().is_err(), "no event without a transition");
        assert_eq!(job.metrics().snapshot().accounts_skipped, 3);
    }

    #[tokio::test]
    async fn event_carries_stored_suspension_time() {
        let now = Utc::now();
        let repo = Arc::new(MemoryAccountRepository::with_accounts([idle("a", 40, now)]));
        let (tx, mut rx) = mpsc::channel(4);
        let job = job(repo.clone(), 10).with_suspended_channel(tx);

        job.sweep_at(now).await.unwrap();

        let event = rx.try_recv().unwrap();
        let stored = repo.get(&AccountId::from("a")).await.unwrap().unwrap();
        assert_eq!(Some(event.suspended_at), stored.suspended_at);
    }

    #[tokio::test]
    async fn failure_list_is_capped_but_counted() {
        /// Every suspend call fails.
        struct BrokenWrites {
            inner: MemoryAccountRepository,
        }

        #[async_trait]
        impl AccountRepository for BrokenWrites {
            async fn find_inactive(
                &self,
                query: &InactiveQuery,
                cursor: Option<&PageCursor>,
                limit: usize,
            ) -> Result<AccountPage, StoreError> {
                self.inner.find_inactive(query, cursor, limit).await
            }

            async fn suspend(&self, _id: &AccountId) -> Result<SuspendOutcome, StoreError> {
                Err(StoreError::Backend("read-only replica".into()))
            }

            async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
                self.inner.get(id).await
            }
        }

        let now = Utc::now();
        let total = MAX_REPORTED_FAILURES + 50;
        let inner = MemoryAccountRepository::with_accounts(
            (0..total).map(|i| idle(&format!("acct-{i:04}"), 40, now)),
        );
        let job = job(Arc::new(BrokenWrites { inner }), 64);
        let total = u64::try_from(total).unwrap();

        let report = job.sweep_at(now).await.unwrap();
        assert_eq!(report.failed, total);
        assert_eq!(report.failures.len(), MAX_REPORTED_FAILURES);
        assert_eq!(report.failures[0].account_id.as_str(), "acct-0000");
        assert_eq!(job.metrics().snapshot().accounts_failed, total);
    }

    #[tokio::test]
    async fn non_active_rows_are_skipped_without_a_suspend_call() {
        let now = Utc::now();

        /// Reports a suspended row as a candidate and fails any suspend call.
        struct StaleRepository {
            account: Account,
        }

        #[async_trait]
        impl AccountRepository for StaleRepository {
            async fn find_inactive(
                &self,
                _query: &InactiveQuery,
                _cursor: Option<&PageCursor>,
                _limit: usize,
            ) -> Result<AccountPage, StoreError> {
                Ok(AccountPage {
                    accounts: vec![self.account.clone()],
                    next_cursor: None,
                })
            }

            async fn suspend(&self, _id: &AccountId) -> Result<SuspendOutcome, StoreError> {
                Err(StoreError::Backend("suspend should not be called".into()))
            }

            async fn get(&self, _id: &AccountId) -> Result<Option<Account>, StoreError> {
                Ok(Some(self.account.clone()))
            }
        }

        let repo = StaleRepository {
            account: idle("a", 40, now).with_status(AccountStatus::Suspended),
        };
        let report = job(Arc::new(repo), 10).sweep_at(now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
    }
}
