use std::collections::BinaryHeap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use lapse_core::{Account, AccountId, SuspendOutcome};
use lapse_store::error::StoreError;
use lapse_store::query::{AccountPage, InactiveQuery, PageCursor};
use lapse_store::repository::{AccountRepository, validate_limit};

/// In-memory [`AccountRepository`] backed by a [`DashMap`].
///
/// `suspend` runs under the map's per-entry lock, so concurrent suspends of
/// the same account observe exactly one `Suspended` outcome.
#[derive(Debug, Default)]
pub struct MemoryAccountRepository {
    accounts: DashMap<AccountId, Account>,
}

impl MemoryAccountRepository {
    /// Create a new, empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository holding the given accounts.
    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let repo = Self::new();
        for account in accounts {
            repo.insert(account);
        }
        repo
    }

    /// Load accounts from a JSON array of [`Account`] objects.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let accounts: Vec<Account> =
            serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))?;
        debug!(count = accounts.len(), "seeding in-memory account repository");
        Ok(Self::with_accounts(accounts))
    }

    /// Insert or replace an account.
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl AccountRepository for MemoryAccountRepository {
    async fn find_inactive(
        &self,
        query: &InactiveQuery,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<AccountPage, StoreError> {
        validate_limit(limit)?;

        // Max-heap of the `limit + 1` smallest matching ids seen so far, so a
        // page never holds more than one page of keys.
        let keep = limit.saturating_add(1);
        let after = cursor.map(PageCursor::last_id);
        let mut smallest: BinaryHeap<AccountId> = BinaryHeap::with_capacity(keep.min(1024));
        for entry in &self.accounts {
            if after.is_some_and(|last| entry.key() <= last) || !query.matches(entry.value()) {
                continue;
            }
            if smallest.len() < keep {
                smallest.push(entry.key().clone());
            } else if smallest.peek().is_some_and(|largest| entry.key() < largest) {
                smallest.pop();
                smallest.push(entry.key().clone());
            }
        }

        let mut ids = smallest.into_sorted_vec();
        let has_more = ids.len() > limit;
        ids.truncate(limit);
        let next_cursor = if has_more {
            ids.last().cloned().map(PageCursor::after)
        } else {
            None
        };

        // Rows removed since the scan are dropped; the cursor still advances.
        let accounts = ids
            .iter()
            .filter_map(|id| self.accounts.get(id).map(|entry| entry.value().clone()))
            .collect();

        Ok(AccountPage {
            accounts,
            next_cursor,
        })
    }

    async fn suspend(&self, id: &AccountId) -> Result<SuspendOutcome, StoreError> {
        let Some(mut account) = self.accounts.get_mut(id) else {
            return Ok(SuspendOutcome::NotFound);
        };
        Ok(account.suspend(Utc::now()))
    }

    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(id).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use lapse_core::AccountRole;
    use lapse_store::testing::{fixture_accounts, run_repository_conformance_tests};

    use super::*;

    #[tokio::test]
    async fn conformance() {
        let now = Utc::now();
        let repo = MemoryAccountRepository::with_accounts(fixture_accounts(now));
        run_repository_conformance_tests(&repo, now)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test]
    async fn pages_cover_every_match_once() {
        let now = Utc::now();
        let repo = MemoryAccountRepository::with_accounts((0..25).map(|i| {
            Account::new(format!("acct-{i:03}"), "provider", now - Duration::days(90))
        }));
        let query = InactiveQuery::new(AccountRole::provider(), now - Duration::days(30));

        let mut seen = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = repo.find_inactive(&query, cursor.as_ref(), 10).await.unwrap();
            assert!(page.accounts.len() <= 10);
            seen.extend(page.accounts.into_iter().map(|a| a.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        let mut deduped = seen.clone();
        deduped.dedup();
        assert_eq!(deduped, seen, "no account should appear twice");
    }

    #[tokio::test]
    async fn pages_are_the_smallest_ids_after_the_cursor() {
        let now = Utc::now();
        let idle = now - Duration::days(90);
        // Insert out of order and interleave rows that do not match.
        let repo = MemoryAccountRepository::with_accounts((0..40).rev().map(|i| {
            let account = Account::new(format!("acct-{i:03}"), "provider", idle);
            if i % 4 == 0 {
                account.with_status(lapse_core::AccountStatus::Suspended)
            } else {
                account
            }
        }));
        let query = InactiveQuery::new(AccountRole::provider(), now - Duration::days(30));

        let first = repo.find_inactive(&query, None, 7).await.unwrap();
        let ids: Vec<&str> = first.accounts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["acct-001", "acct-002", "acct-003", "acct-005", "acct-006", "acct-007", "acct-009"]
        );
        let cursor = first.next_cursor.expect("more pages remain");
        assert_eq!(cursor.last_id().as_str(), "acct-009");

        let mut total = first.accounts.len();
        let mut cursor = Some(cursor);
        while let Some(current) = cursor {
            let page = repo.find_inactive(&query, Some(&current), 7).await.unwrap();
            assert!(page.accounts.iter().all(|a| a.id > *current.last_id()));
            assert!(page.accounts.windows(2).all(|w| w[0].id < w[1].id));
            total += page.accounts.len();
            cursor = page.next_cursor;
        }
        assert_eq!(total, 30);
    }

    #[tokio::test]
    async fn exact_page_has_no_cursor() {
        let now = Utc::now();
        let repo = MemoryAccountRepository::with_accounts(
            (0..5).map(|i| Account::new(format!("acct-{i}"), "provider", now - Duration::days(90))),
        );
        let query = InactiveQuery::new(AccountRole::provider(), now - Duration::days(30));

        let page = repo.find_inactive(&query, None, 5).await.unwrap();
        assert_eq!(page.accounts.len(), 5);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn concurrent_suspends_transition_once() {
        let now = Utc::now();
        let repo = Arc::new(MemoryAccountRepository::with_accounts([Account::new(
            "racy",
            "provider",
            now - Duration::days(90),
        )]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.suspend(&AccountId::from("racy")).await.unwrap()
            }));
        }

        let mut transitions = 0;
        for handle in handles {
            if handle.await.unwrap().is_transition() {
                transitions += 1;
            }
        }
        assert_eq!(transitions, 1);
    }

    #[test]
    fn from_json_seeds_accounts() {
        let json = r#"[
            {"id": "a", "role": "provider", "status": "active",
             "last_activity_at": "2024-01-01T00:00:00Z"},
            {"id": "b", "role": "buyer", "status": "suspended",
             "last_activity_at": "2024-01-01T00:00:00Z",
             "suspended_at": "2024-02-01T00:00:00Z"}
        ]"#;
        let repo = MemoryAccountRepository::from_json(json).unwrap();
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn from_json_rejects_garbage() {
        let err = MemoryAccountRepository::from_json("{not json").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
