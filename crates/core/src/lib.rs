pub mod account;
pub mod error;
pub mod threshold;
pub mod types;

pub use account::{Account, AccountStatus, SuspendOutcome};
pub use error::CoreError;
pub use threshold::InactivityThreshold;
pub use types::{AccountId, AccountRole};
