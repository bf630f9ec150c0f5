use chrono::{DateTime, Duration, Utc};

use lapse_core::{Account, AccountId, AccountRole, AccountStatus, SuspendOutcome};

use crate::error::StoreError;
use crate::query::InactiveQuery;
use crate::repository::AccountRepository;

const THRESHOLD_DAYS: i64 = 30;

fn account(id: &str, role: &str, idle_days: i64, now: DateTime<Utc>) -> Account {
    Account::new(id, role, now - Duration::days(idle_days))
}

fn query(now: DateTime<Utc>) -> InactiveQuery {
    InactiveQuery::new(AccountRole::provider(), now - Duration::days(THRESHOLD_DAYS))
}

fn ids(accounts: &[Account]) -> Vec<&str> {
    accounts.iter().map(|a| a.id.as_str()).collect()
}

/// Accounts the conformance suite expects to find in a fresh repository.
///
/// Insert these (with the same `now`) before calling
/// [`run_repository_conformance_tests`].
pub fn fixture_accounts(now: DateTime<Utc>) -> Vec<Account> {
    vec![
        account("conf-active-old-1", "provider", 40, now),
        account("conf-active-old-2", "provider", 45, now),
        account("conf-active-old-3", "provider", 50, now),
        account("conf-active-recent", "provider", 10, now),
        account("conf-buyer-old", "buyer", 40, now),
        account("conf-suspended-old", "provider", 60, now).with_status(AccountStatus::Suspended),
        account("conf-pending-old", "provider", 60, now)
            .with_status(AccountStatus::Other("pending".into())),
    ]
}

/// Run the full repository conformance test suite.
///
/// Call this from your backend's test module with a repository seeded with
/// [`fixture_accounts`].
///
/// # Errors
///
/// Returns an error if any repository call fails.
pub async fn run_repository_conformance_tests(
    repo: &dyn AccountRepository,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    test_single_page(repo, now).await?;
    test_keyset_paging(repo, now).await?;
    test_zero_limit(repo, now).await;
    test_get_missing(repo).await?;
    test_non_transition_outcomes(repo).await?;
    test_suspend_is_idempotent(repo, now).await?;
    Ok(())
}

async fn test_single_page(
    repo: &dyn AccountRepository,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let page = repo.find_inactive(&query(now), None, 100).await?;
    assert_eq!(
        ids(&page.accounts),
        vec!["conf-active-old-1", "conf-active-old-2", "conf-active-old-3"],
        "only active, eligible, idle accounts should match, ordered by id"
    );
    assert!(page.next_cursor.is_none(), "a short page is the last page");
    Ok(())
}

async fn test_keyset_paging(
    repo: &dyn AccountRepository,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let q = query(now);
    let first = repo.find_inactive(&q, None, 2).await?;
    assert_eq!(ids(&first.accounts), vec!["conf-active-old-1", "conf-active-old-2"]);
    let cursor = first
        .next_cursor
        .expect("a full page with more rows should carry a cursor");

    let second = repo.find_inactive(&q, Some(&cursor), 2).await?;
    assert_eq!(ids(&second.accounts), vec!["conf-active-old-3"]);
    assert!(second.next_cursor.is_none());
    Ok(())
}

async fn test_zero_limit(repo: &dyn AccountRepository, now: DateTime<Utc>) {
    let result = repo.find_inactive(&query(now), None, 0).await;
    assert!(
        matches!(result, Err(StoreError::InvalidQuery(_))),
        "a zero page limit should be rejected"
    );
}

async fn test_get_missing(repo: &dyn AccountRepository) -> Result<(), StoreError> {
    let missing = repo.get(&AccountId::from("conf-missing")).await?;
    assert!(missing.is_none(), "get on a missing account should return None");
    Ok(())
}

async fn test_non_transition_outcomes(repo: &dyn AccountRepository) -> Result<(), StoreError> {
    let outcome = repo.suspend(&AccountId::from("conf-missing")).await?;
    assert_eq!(outcome, SuspendOutcome::NotFound);

    let outcome = repo.suspend(&AccountId::from("conf-suspended-old")).await?;
    assert_eq!(outcome, SuspendOutcome::AlreadySuspended);

    let pending = AccountId::from("conf-pending-old");
    let outcome = repo.suspend(&pending).await?;
    assert_eq!(
        outcome,
        SuspendOutcome::Ineligible(AccountStatus::Other("pending".into()))
    );
    let stored = repo.get(&pending).await?.expect("pending account exists");
    assert_eq!(stored.status.as_str(), "pending", "ineligible status must not change");
    Ok(())
}

async fn test_suspend_is_idempotent(
    repo: &dyn AccountRepository,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let id = AccountId::from("conf-active-old-1");

    let outcome = repo.suspend(&id).await?;
    let SuspendOutcome::Suspended { at } = outcome else {
        panic!("an active account should transition, got {outcome:?}");
    };

    let stored = repo.get(&id).await?.expect("suspended account exists");
    assert!(stored.is_suspended());
    let suspended_at = stored.suspended_at;
    assert_eq!(suspended_at, Some(at), "outcome should carry the stored timestamp");

    let outcome = repo.suspend(&id).await?;
    assert_eq!(outcome, SuspendOutcome::AlreadySuspended);
    let stored = repo.get(&id).await?.expect("suspended account exists");
    assert_eq!(stored.suspended_at, suspended_at, "second suspend must not rewrite");

    let page = repo.find_inactive(&query(now), None, 100).await?;
    assert_eq!(
        ids(&page.accounts),
        vec!["conf-active-old-2", "conf-active-old-3"],
        "suspended accounts leave the candidate set"
    );
    Ok(())
}
