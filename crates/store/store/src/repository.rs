use async_trait::async_trait;

use lapse_core::{Account, AccountId, SuspendOutcome};

use crate::error::StoreError;
use crate::query::{AccountPage, InactiveQuery, PageCursor};

/// Trait for the account store consumed by the suspension worker.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// `suspend` must be idempotent: calling it on an already-suspended account
/// reports [`SuspendOutcome::AlreadySuspended`] and changes nothing.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fetch one page of accounts matching `query`, ordered by account id.
    ///
    /// `cursor` is `None` for the first page and the previous page's
    /// `next_cursor` afterwards. At most `limit` accounts are returned; a
    /// `limit` of zero is an [`StoreError::InvalidQuery`].
    async fn find_inactive(
        &self,
        query: &InactiveQuery,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<AccountPage, StoreError>;

    /// Apply the `active -> suspended` transition to one account.
    async fn suspend(&self, id: &AccountId) -> Result<SuspendOutcome, StoreError>;

    /// Load a single account. Returns `None` if it does not exist.
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;
}

/// Reject page sizes the backends cannot serve.
pub fn validate_limit(limit: usize) -> Result<(), StoreError> {
    if limit == 0 {
        return Err(StoreError::InvalidQuery("page limit must be at least 1".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify object safety.
    fn _assert_dyn_repository(_: &dyn AccountRepository) {}

    #[test]
    fn zero_limit_rejected() {
        assert!(matches!(validate_limit(0), Err(StoreError::InvalidQuery(_))));
        assert!(validate_limit(1).is_ok());
    }
}
