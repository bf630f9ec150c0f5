use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AccountId, AccountRole};

/// Lifecycle status of an account.
///
/// Only `active -> suspended` is performed by the suspension worker. Any other
/// status owned by the account subsystem is carried through verbatim in
/// [`AccountStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccountStatus {
    Active,
    Suspended,
    Other(String),
}

impl AccountStatus {
    /// Return the storage representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(CoreError::InvalidStatus(s.to_owned())),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            other => Ok(Self::Other(other.to_owned())),
        }
    }
}

impl TryFrom<String> for AccountStatus {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountStatus> for String {
    fn from(status: AccountStatus) -> Self {
        status.as_str().to_owned()
    }
}

/// Result of asking a store to suspend one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SuspendOutcome {
    /// The account moved from `active` to `suspended`; `at` is the stored
    /// `suspended_at`.
    Suspended { at: DateTime<Utc> },
    /// The account was already suspended; nothing changed.
    AlreadySuspended,
    /// No account with the given id exists.
    NotFound,
    /// The account is in a status the suspend transition does not apply to.
    Ineligible(AccountStatus),
}

impl SuspendOutcome {
    /// Returns `true` only when the call performed a state change.
    #[must_use]
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// An account as seen by the suspension worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub role: AccountRole,
    pub status: AccountStatus,
    /// Last time the account showed any activity.
    pub last_activity_at: DateTime<Utc>,
    /// When the account was suspended, if it is.
    #[serde(default)]
    pub suspended_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create an active account.
    #[must_use]
    pub fn new(
        id: impl Into<AccountId>,
        role: impl Into<AccountRole>,
        last_activity_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            status: AccountStatus::Active,
            last_activity_at,
            suspended_at: None,
        }
    }

    /// Override the status (builder style).
    #[must_use]
    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.status == AccountStatus::Suspended
    }

    /// Returns `true` if the account has had no activity since `cutoff`
    /// (inclusive).
    #[must_use]
    pub fn inactive_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity_at <= cutoff
    }

    /// Apply the suspend transition in place.
    ///
    /// Idempotent: a suspended account is left untouched and reports
    /// [`SuspendOutcome::AlreadySuspended`].
    pub fn suspend(&mut self, at: DateTime<Utc>) -> SuspendOutcome {
        match self.status {
            AccountStatus::Active => {
                self.status = AccountStatus::Suspended;
                self.suspended_at = Some(at);
                SuspendOutcome::Suspended { at }
            }
            AccountStatus::Suspended => SuspendOutcome::AlreadySuspended,
            ref other @ AccountStatus::Other(_) => SuspendOutcome::Ineligible(other.clone()),
        }
    }
}
