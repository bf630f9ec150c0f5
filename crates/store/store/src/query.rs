use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lapse_core::{Account, AccountId, AccountRole, InactivityThreshold};

/// Selection predicate for suspension candidates.
///
/// Matches accounts with the given role, status `active`, and no activity
/// since `inactive_before` (inclusive). The cutoff is absolute so that every
/// page of a sweep is evaluated against the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactiveQuery {
    pub role: AccountRole,
    pub inactive_before: DateTime<Utc>,
}

impl InactiveQuery {
    #[must_use]
    pub fn new(role: AccountRole, inactive_before: DateTime<Utc>) -> Self {
        Self {
            role,
            inactive_before,
        }
    }

    /// Build a query whose cutoff is `now - threshold`.
    #[must_use]
    pub fn at(role: AccountRole, threshold: InactivityThreshold, now: DateTime<Utc>) -> Self {
        Self::new(role, threshold.cutoff(now))
    }

    /// Evaluate the predicate against an in-memory account.
    #[must_use]
    pub fn matches(&self, account: &Account) -> bool {
        account.role == self.role
            && account.is_active()
            && account.inactive_since(self.inactive_before)
    }
}

/// Keyset cursor: the id of the last account on the previous page.
///
/// Pages are ordered by account id, and the next page starts strictly after
/// the cursor. Accounts leaving the matching set between pages (for example
/// because they were just suspended) therefore never shift later pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(AccountId);

impl PageCursor {
    #[must_use]
    pub fn after(id: AccountId) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn last_id(&self) -> &AccountId {
        &self.0
    }
}

/// One bounded page of candidate accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    /// `None` once the matching set is exhausted.
    pub next_cursor: Option<PageCursor>,
}

impl AccountPage {
    /// Build a page from `limit + 1` fetched rows: the extra row only signals
    /// that another page exists and is dropped.
    #[must_use]
    pub fn from_overfetch(mut accounts: Vec<Account>, limit: usize) -> Self {
        let has_more = accounts.len() > limit;
        accounts.truncate(limit);
        let next_cursor = if has_more {
            accounts.last().map(|a| PageCursor::after(a.id.clone()))
        } else {
            None
        };
        Self {
            accounts,
            next_cursor,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
